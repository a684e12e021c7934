use std::collections::HashMap;

use async_trait::async_trait;
use bitcoin::{Script, Transaction};
use serde::Deserialize;
use tracing::debug;

use crate::{
    client::{ApiError, IndexerApi},
    error::Error,
};

use super::{
    Indexer, Owners, ParseContext, ParseResult, Txo, is_owned, script,
    types::{IndexPayload, IndexSummary},
};

pub const BSV21_CONTENT_TYPE: &str = "application/bsv-20";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bsv21Op {
    DeployMint,
    Transfer,
    Burn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bsv21Status {
    Pending,
    Valid,
    Invalid,
}

impl Bsv21Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bsv21Status::Pending => "pending",
            Bsv21Status::Valid => "valid",
            Bsv21Status::Invalid => "invalid",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bsv21Data {
    /// Token id; a deploy+mint claims its own outpoint during summarize.
    pub id: Option<String>,
    pub op: Bsv21Op,
    pub amt: u64,
    pub sym: Option<String>,
    pub icon: Option<String>,
    pub dec: Option<u8>,
    /// Settled during summarize.
    pub status: Option<Bsv21Status>,
}

#[derive(Deserialize)]
struct TokenPayload {
    p: String,
    op: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    amt: Option<String>,
    #[serde(default)]
    sym: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    dec: Option<u8>,
}

/// Whether a script carries a fungible-token inscription payload.
pub fn is_token_payload(script: &Script) -> bool {
    script::find_envelope(script).is_some_and(|e| e.content_type == BSV21_CONTENT_TYPE)
}

fn decode_payload(script: &Script) -> Option<Bsv21Data> {
    let envelope = script::find_envelope(script)?;

    if envelope.content_type != BSV21_CONTENT_TYPE {
        return None;
    }

    let payload: TokenPayload = serde_json::from_slice(&envelope.content).ok()?;

    if payload.p != "bsv-20" {
        return None;
    }

    let op = match payload.op.as_str() {
        "deploy+mint" => Bsv21Op::DeployMint,
        "transfer" => Bsv21Op::Transfer,
        "burn" => Bsv21Op::Burn,
        _ => return None,
    };

    let amt = payload.amt.as_deref().and_then(|a| a.parse().ok())?;

    Some(Bsv21Data {
        id: payload.id,
        op,
        amt,
        sym: payload.sym,
        icon: payload.icon,
        dec: payload.dec,
        status: None,
    })
}

/// Fungible-token overlay on 1-sat outputs.
pub struct Bsv21Indexer {
    owners: Owners,
}

impl Bsv21Indexer {
    pub fn new(owners: Owners) -> Self {
        Self { owners }
    }
}

#[derive(Default)]
struct TokenFlow {
    tokens_in: u64,
    tokens_out: u64,
    owned_in: i64,
    owned_out: i64,
    pending: bool,
    has_inputs: bool,
}

#[async_trait]
impl Indexer for Bsv21Indexer {
    fn tag(&self) -> &'static str {
        "bsv21"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        if txo.satoshis != 1 {
            return None;
        }

        let data = decode_payload(&txo.script)?;

        Some(ParseResult::new(IndexPayload::Bsv21(data)).with_basket("bsv21"))
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        api: &dyn IndexerApi,
        _is_broadcast: bool,
    ) -> Result<Option<IndexSummary>, Error> {
        let mut flows: HashMap<String, TokenFlow> = HashMap::new();

        // inputs: confirm each token input against the overlay; a missing
        // entry marks the whole token id pending for this transaction
        for spend in &ctx.spends {
            let Some(data) = token_data(spend, self.tag()) else {
                continue;
            };
            let Some(id) = token_id(spend, &data) else {
                continue;
            };

            let flow = flows.entry(id.clone()).or_default();
            flow.has_inputs = true;
            flow.tokens_in += data.amt;

            let owned = spend
                .owner
                .as_deref()
                .is_some_and(|owner| is_owned(&self.owners, owner));
            if owned {
                flow.owned_in += data.amt as i64;
            }

            match api.token_tx(&id, &spend.outpoint.txid).await {
                Ok(_) => {}
                Err(ApiError::NotFound) => {
                    debug!(%id, "token input unknown to overlay; marking pending");
                    flow.pending = true;
                }
                Err(err) => return Err(err.into()),
            }
        }

        // output totals over transfer and burn operations
        for txo in &ctx.txos {
            let Some(data) = token_data(txo, self.tag()) else {
                continue;
            };
            let Some(id) = token_id(txo, &data) else {
                continue;
            };

            let flow = flows.entry(id).or_default();

            if matches!(data.op, Bsv21Op::Transfer | Bsv21Op::Burn) {
                flow.tokens_out += data.amt;
            }
        }

        // overlay metadata adopted by outputs, fetched once per id
        let mut details: HashMap<String, crate::client::TokenDetails> = HashMap::new();

        for id in flows.keys() {
            match api.token_details(id).await {
                Ok(d) => {
                    details.insert(id.clone(), d);
                }
                Err(ApiError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let mut summary_id = None;
        let mut summary_icon = None;

        for txo in &mut ctx.txos {
            let own_outpoint = txo.outpoint;

            let owned = txo
                .owner
                .as_deref()
                .is_some_and(|owner| is_owned(&self.owners, owner));

            let Some(entry) = txo.data.get_mut(self.tag()) else {
                continue;
            };
            let IndexPayload::Bsv21(data) = &mut entry.data else {
                continue;
            };

            // a mint names its own outpoint
            if data.op == Bsv21Op::DeployMint && data.id.is_none() {
                data.id = Some(own_outpoint.to_string());
            }

            let Some(id) = data.id.clone() else {
                continue;
            };

            let flow = flows.entry(id.clone()).or_default();

            let status = match data.op {
                Bsv21Op::DeployMint => Bsv21Status::Valid,
                _ if !flow.has_inputs => Bsv21Status::Invalid,
                // pending inputs cascade to the outputs of that id
                _ if flow.pending => Bsv21Status::Pending,
                _ if flow.tokens_in >= flow.tokens_out => Bsv21Status::Valid,
                _ => Bsv21Status::Invalid,
            };

            data.status = Some(status);

            if let Some(detail) = details.get(&id) {
                data.sym = detail.sym.clone().or(data.sym.take());
                data.icon = detail.icon.clone().or(data.icon.take());
                data.dec = detail.dec.or(data.dec);
            }

            let amt = data.amt;

            if owned {
                flow.owned_out += amt as i64;

                entry.tags.push(format!("id:{id}"));
                entry.tags.push(format!("id:{id}:{}", status.as_str()));
                entry.tags.push(format!("amt:{amt}"));

                if summary_id.is_none() {
                    summary_id = Some(id.clone());
                    summary_icon = details.get(&id).and_then(|d| d.icon.clone());
                }
            }
        }

        if flows.is_empty() {
            return Ok(None);
        }

        // balance delta across owned inputs and outputs of the leading id
        let amount = summary_id
            .as_ref()
            .and_then(|id| flows.get(id))
            .map(|flow| flow.owned_out - flow.owned_in);

        let statuses: serde_json::Value = flows
            .iter()
            .map(|(id, flow)| {
                let status = if flow.pending { "pending" } else { "settled" };
                (id.clone(), serde_json::json!(status))
            })
            .collect::<serde_json::Map<String, serde_json::Value>>()
            .into();

        Ok(Some(IndexSummary {
            id: summary_id,
            amount,
            icon: summary_icon,
            data: Some(statuses),
        }))
    }
}

fn token_data(txo: &Txo, tag: &str) -> Option<Bsv21Data> {
    match &txo.data.get(tag)?.data {
        IndexPayload::Bsv21(data) => Some(data.clone()),
        _ => None,
    }
}

// an input minted at its own outpoint has no id field
fn token_id(txo: &Txo, data: &Bsv21Data) -> Option<String> {
    match (&data.id, data.op) {
        (Some(id), _) => Some(id.clone()),
        (None, Bsv21Op::DeployMint) => Some(txo.outpoint.to_string()),
        (None, _) => None,
    }
}
