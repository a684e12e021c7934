use std::collections::HashMap;

use bitcoin::{Transaction, Txid, consensus};
use indexmap::IndexMap;
use tracing::warn;

use crate::{
    client::IndexerApi,
    error::Error,
    indexers::{Indexer, Owners, ParseResult, Txo, default_indexers},
    types::Outpoint,
    wallet::WalletStorage,
};

use super::types::IndexSummary;

/*
    Parser pipeline

    Runs every decoder's `parse` over each spent source output and each
    output of the transaction, in the fixed decoder order, then gives each
    decoder one cross-cutting `summarize` pass over the whole context.
*/

/// Per-transaction working set produced by the pipeline.
pub struct ParseContext {
    pub txid: Txid,
    pub tx: Transaction,
    /// One entry per output, in order.
    pub txos: Vec<Txo>,
    /// One entry per input, in order, annotated from the spent source output.
    /// Inputs whose source could not be resolved carry an empty placeholder.
    pub spends: Vec<Txo>,
    /// Transaction-level summaries keyed by decoder tag.
    pub summary: IndexMap<String, IndexSummary>,
    /// Hydrated source transactions keyed by txid.
    pub sources: HashMap<Txid, Transaction>,
}

pub struct Parser {
    indexers: Vec<Box<dyn Indexer>>,
    pub owners: Owners,
}

impl Parser {
    pub fn new(owners: Owners) -> Self {
        Self {
            indexers: default_indexers(owners.clone()),
            owners,
        }
    }

    pub fn with_indexers(owners: Owners, indexers: Vec<Box<dyn Indexer>>) -> Self {
        Self { indexers, owners }
    }

    pub async fn parse(
        &self,
        tx: &Transaction,
        api: &dyn IndexerApi,
        store: &dyn WalletStorage,
        is_broadcast: bool,
    ) -> Result<ParseContext, Error> {
        let txid = tx.compute_txid();

        let sources = self.hydrate_sources(tx, api, store).await?;

        let mut ctx = ParseContext {
            txid,
            tx: tx.clone(),
            txos: vec![],
            spends: vec![],
            summary: IndexMap::new(),
            sources,
        };

        // annotate each input from the source output it consumes
        for input in &tx.input {
            let prev = input.previous_output;
            let outpoint = Outpoint::new(prev.txid, prev.vout);

            let mut spend = Txo::new(outpoint, 0, bitcoin::ScriptBuf::new());

            if let Some(source) = ctx.sources.get(&prev.txid) {
                if let Some(output) = source.output.get(prev.vout as usize) {
                    spend = Txo::new(
                        outpoint,
                        output.value.to_sat(),
                        output.script_pubkey.clone(),
                    );
                    self.run_parsers(&mut spend, source, prev.vout as usize);
                }
            }

            ctx.spends.push(spend);
        }

        // annotate each output
        for (vout, output) in tx.output.iter().enumerate() {
            let mut txo = Txo::new(
                Outpoint::new(txid, vout as u32),
                output.value.to_sat(),
                output.script_pubkey.clone(),
            );

            self.run_parsers(&mut txo, tx, vout);

            ctx.txos.push(txo);
        }

        // summarize runs after all parse calls so cross-output observations
        // are complete
        for indexer in &self.indexers {
            if let Some(summary) = indexer.summarize(&mut ctx, api, is_broadcast).await? {
                ctx.summary.insert(indexer.tag().to_string(), summary);
            }
        }

        Ok(ctx)
    }

    fn run_parsers(&self, txo: &mut Txo, tx: &Transaction, vout: usize) {
        for indexer in &self.indexers {
            if let Some(result) = indexer.parse(txo, tx, vout) {
                apply(txo, indexer.tag(), result);
            }
        }
    }

    /// Resolve the source transaction of every input, storage first, then the
    /// beef service. One level deep only.
    async fn hydrate_sources(
        &self,
        tx: &Transaction,
        api: &dyn IndexerApi,
        store: &dyn WalletStorage,
    ) -> Result<HashMap<Txid, Transaction>, Error> {
        let mut sources = HashMap::new();

        for input in &tx.input {
            let source_txid = input.previous_output.txid;

            if input.previous_output.is_null() || sources.contains_key(&source_txid) {
                continue;
            }

            let raw = match store.find_transaction(&source_txid)? {
                Some(record) => Some(record.raw_tx),
                None => match api.fetch_raw_tx(&source_txid).await {
                    Ok(raw) => Some(raw),
                    Err(err) if err.is_not_found() => None,
                    Err(err) => return Err(err.into()),
                },
            };

            match raw {
                Some(raw) => {
                    let source: Transaction = consensus::deserialize(&raw)?;
                    sources.insert(source_txid, source);
                }
                None => warn!(%source_txid, "source transaction unavailable"),
            }
        }

        Ok(sources)
    }
}

fn apply(txo: &mut Txo, tag: &str, result: ParseResult) {
    let ParseResult {
        payload,
        tags,
        owner,
        basket,
        content,
        sidecar,
    } = result;

    if owner.is_some() {
        txo.owner = owner;
    }
    if basket.is_some() {
        txo.basket = basket;
    }

    txo.data.insert(
        tag.to_string(),
        super::types::IndexData {
            data: payload,
            tags,
            content,
        },
    );

    for (side_tag, data) in sidecar {
        txo.data.insert(side_tag.to_string(), data);
    }
}
