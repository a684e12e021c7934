use bitcoin::ScriptBuf;
use indexmap::IndexMap;

use crate::types::{Address, Outpoint};

use super::{
    bsv21::Bsv21Data, cosign::CosignData, inscription::InscriptionData, lock::LockData,
    map::MapData, opns::OpnsData, ordlock::OrdLockData, origin::OriginData, sigma::SigmaRecord,
};

/// Decoder-specific payload, one variant per protocol.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexPayload {
    Fund,
    Lock(LockData),
    Inscription(Box<InscriptionData>),
    Sigma(Vec<SigmaRecord>),
    Map(MapData),
    Origin(Box<OriginData>),
    Bsv21(Bsv21Data),
    OrdLock(OrdLockData),
    Opns(OpnsData),
    Cosign(CosignData),
}

/// One decoder's annotation on an output.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexData {
    pub data: IndexPayload,
    pub tags: Vec<String>,
    pub content: Option<String>,
}

impl IndexData {
    pub fn new(data: IndexPayload) -> Self {
        Self {
            data,
            tags: vec![],
            content: None,
        }
    }
}

/// Per-output annotation accumulated while parsing a transaction.
#[derive(Clone, Debug)]
pub struct Txo {
    pub outpoint: Outpoint,
    pub satoshis: u64,
    pub script: ScriptBuf,
    pub owner: Option<Address>,
    pub basket: Option<String>,
    pub data: IndexMap<String, IndexData>,
}

impl Txo {
    pub fn new(outpoint: Outpoint, satoshis: u64, script: ScriptBuf) -> Self {
        Self {
            outpoint,
            satoshis,
            script,
            owner: None,
            basket: None,
            data: IndexMap::new(),
        }
    }
}

/// What a decoder's `parse` returns for a matched output. `sidecar` entries
/// are written under another decoder's tag, the one documented cross-decoder
/// side effect.
#[derive(Clone, Debug)]
pub struct ParseResult {
    pub payload: IndexPayload,
    pub tags: Vec<String>,
    pub owner: Option<Address>,
    pub basket: Option<String>,
    pub content: Option<String>,
    pub sidecar: Vec<(&'static str, IndexData)>,
}

impl ParseResult {
    pub fn new(payload: IndexPayload) -> Self {
        Self {
            payload,
            tags: vec![],
            owner: None,
            basket: None,
            content: None,
            sidecar: vec![],
        }
    }

    pub fn with_owner(mut self, owner: Address) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_basket(mut self, basket: &str) -> Self {
        self.basket = Some(basket.to_string());
        self
    }

    pub fn with_tag(mut self, tag: String) -> Self {
        self.tags.push(tag);
        self
    }
}

/// Transaction-level summary contributed by a decoder's summarize phase.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IndexSummary {
    pub id: Option<String>,
    pub amount: Option<i64>,
    pub icon: Option<String>,
    pub data: Option<serde_json::Value>,
}
