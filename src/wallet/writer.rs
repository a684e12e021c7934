use std::collections::{HashSet, VecDeque};

use base64::Engine;
use bitcoin::{Transaction, Txid, consensus};
use tracing::{debug, warn};

use crate::{
    client::IndexerApi,
    error::Error,
    indexers::{ParseContext, Parser},
};

use super::{
    NewOutput, NewTransaction, OutputPatch, TxRecordStatus, WalletStorage,
    with_wallet_transaction,
};

const MAX_CUSTOM_INSTRUCTIONS: usize = 1000;

pub struct IngestOutcome {
    pub ctx: ParseContext,
    /// Owned outputs newly created by this call.
    pub internalized: usize,
}

/// Map a parsed transaction onto the wallet store: transaction row, source
/// chain, spend flips and owned-output rows, all inside one storage
/// transaction. Re-ingesting the same transaction is a no-op.
pub async fn ingest_transaction(
    parser: &Parser,
    api: &dyn IndexerApi,
    store: &dyn WalletStorage,
    tx: &Transaction,
    is_broadcast: bool,
    labels: &[String],
) -> Result<IngestOutcome, Error> {
    let ctx = parser.parse(tx, api, store, is_broadcast).await?;

    let owned: Vec<usize> = ctx
        .txos
        .iter()
        .enumerate()
        .filter(|(_, txo)| {
            txo.owner
                .as_deref()
                .is_some_and(|owner| crate::indexers::is_owned(&parser.owners, owner))
        })
        .map(|(vout, _)| vout)
        .collect();

    // fetch any un-stored ancestry up front; inserts happen inside the
    // storage transaction below
    let missing_sources = collect_missing_sources(tx, &ctx, api, store).await?;

    let internalized = with_wallet_transaction(store, || {
        let existing = store.find_transaction(&ctx.txid)?;

        let (transaction_id, inserted) = match existing {
            Some(record) => (record.id, false),
            None => {
                let id = insert_new_transaction(store, tx, &ctx, &owned, is_broadcast)?;

                for (source_txid, source) in &missing_sources {
                    if store.find_transaction(source_txid)?.is_none() {
                        insert_source_transaction(store, *source_txid, source)?;
                    }
                }

                for label in labels {
                    let label_id = store.find_or_insert_label(label)?;
                    store.label_transaction(id, label_id)?;
                }

                (id, true)
            }
        };

        // spends are only applied the first time the transaction lands
        if inserted {
            for input in &tx.input {
                let prev = input.previous_output;

                if let Some(output) = store.find_output(&prev.txid, prev.vout)? {
                    if output.spendable {
                        store.update_output(
                            output.id,
                            OutputPatch {
                                spendable: Some(false),
                                spent_by: Some(Some(transaction_id)),
                            },
                        )?;
                    }
                }
            }
        }

        let mut internalized = 0;

        for &vout in &owned {
            let txo = &ctx.txos[vout];

            if store.find_output(&txo.outpoint.txid, txo.outpoint.vout)?.is_some() {
                continue;
            }

            let owner = txo.owner.clone().expect("filtered on owner");

            let basket = txo.basket.clone().unwrap_or_else(|| "default".to_string());
            let basket_id = store.find_or_insert_basket(&basket)?;
            let change = basket == "default";

            let content = txo.data.values().find_map(|entry| entry.content.clone());

            let output_id = store.insert_output(NewOutput {
                transaction_id,
                txid: txo.outpoint.txid,
                vout: txo.outpoint.vout,
                satoshis: txo.satoshis,
                locking_script: txo.script.to_bytes(),
                basket_id,
                spendable: true,
                spent_by: None,
                change,
                purpose: if change { "change" } else { "" }.to_string(),
                output_type: "custom".to_string(),
                provided_by: "you".to_string(),
                custom_instructions: content.map(truncate_utf8),
            })?;

            let own_tag = store.find_or_insert_tag(&format!("own:{owner}"))?;
            store.tag_output(output_id, own_tag)?;

            for tag in txo.data.values().flat_map(|entry| entry.tags.iter()) {
                let tag_id = store.find_or_insert_tag(tag)?;
                store.tag_output(output_id, tag_id)?;
            }

            internalized += 1;
        }

        Ok(internalized)
    })?;

    debug!(txid = %ctx.txid, internalized, "ingested transaction");

    Ok(IngestOutcome { ctx, internalized })
}

fn insert_new_transaction(
    store: &dyn WalletStorage,
    tx: &Transaction,
    ctx: &ParseContext,
    owned: &[usize],
    is_broadcast: bool,
) -> Result<i64, Error> {
    let mut is_outgoing = false;
    let mut satoshis_spent = 0u64;

    for input in &tx.input {
        let prev = input.previous_output;

        if let Some(output) = store.find_output(&prev.txid, prev.vout)? {
            is_outgoing = true;
            satoshis_spent += output.satoshis;
        }
    }

    let satoshis_received: u64 = owned.iter().map(|&vout| ctx.txos[vout].satoshis).sum();

    store.insert_transaction(NewTransaction {
        txid: ctx.txid,
        status: if is_broadcast {
            TxRecordStatus::Completed
        } else {
            TxRecordStatus::Unproven
        },
        is_outgoing,
        satoshis: satoshis_received as i64 - satoshis_spent as i64,
        satoshis_spent,
        satoshis_received,
        raw_tx: consensus::serialize(tx),
        reference: new_reference(),
    })
}

fn insert_source_transaction(
    store: &dyn WalletStorage,
    txid: Txid,
    source: &Transaction,
) -> Result<i64, Error> {
    store.insert_transaction(NewTransaction {
        txid,
        status: TxRecordStatus::Unproven,
        is_outgoing: false,
        satoshis: 0,
        satoshis_spent: 0,
        satoshis_received: 0,
        raw_tx: consensus::serialize(source),
        reference: new_reference(),
    })
}

/// Breadth-first walk of un-stored ancestry: the new transaction's sources,
/// then each just-discovered source's own sources, stopping at rows storage
/// already has. The source DAG is finite, so the walk terminates.
async fn collect_missing_sources(
    tx: &Transaction,
    ctx: &ParseContext,
    api: &dyn IndexerApi,
    store: &dyn WalletStorage,
) -> Result<Vec<(Txid, Transaction)>, Error> {
    let mut queue: VecDeque<Txid> = tx
        .input
        .iter()
        .filter(|input| !input.previous_output.is_null())
        .map(|input| input.previous_output.txid)
        .collect();

    let mut seen = HashSet::new();
    let mut missing = vec![];

    while let Some(txid) = queue.pop_front() {
        if !seen.insert(txid) || store.find_transaction(&txid)?.is_some() {
            continue;
        }

        let source = match ctx.sources.get(&txid) {
            Some(source) => source.clone(),
            None => match api.fetch_raw_tx(&txid).await {
                Ok(raw) => consensus::deserialize(&raw)?,
                Err(err) if err.is_not_found() => {
                    warn!(%txid, "ancestor transaction unavailable");
                    continue;
                }
                Err(err) => return Err(err.into()),
            },
        };

        queue.extend(
            source
                .input
                .iter()
                .filter(|input| !input.previous_output.is_null())
                .map(|input| input.previous_output.txid),
        );

        missing.push((txid, source));
    }

    Ok(missing)
}

fn new_reference() -> String {
    let nonce: [u8; 12] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(nonce)
}

fn truncate_utf8(mut content: String) -> String {
    if content.len() <= MAX_CUSTOM_INSTRUCTIONS {
        return content;
    }

    let mut end = MAX_CUSTOM_INSTRUCTIONS;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    content.truncate(end);
    content
}
