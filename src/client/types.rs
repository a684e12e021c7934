use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Chain tip / header shape returned by the chaintracks endpoints.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainHeader {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub merkle_root: Option<String>,
    #[serde(default)]
    pub previous_hash: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdfsMetadata {
    pub outpoint: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content_length: Option<u64>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub map: Option<BTreeMap<String, String>>,
}

/// Headers accompanying an ordfs content fetch.
#[derive(Clone, Debug, Default)]
pub struct ContentInfo {
    pub content_type: Option<String>,
    pub outpoint: Option<String>,
    pub origin: Option<String>,
    pub seq: Option<u64>,
    pub map: Option<BTreeMap<String, String>>,
    pub parent: Option<String>,
}

/// Immutable token details from the fungible-token overlay.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDetails {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sym: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub dec: Option<u8>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TokenTxEntry {
    pub outpoint: String,
    #[serde(default)]
    pub amt: u64,
}

/// Per-transaction token data from the overlay.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct TokenTxData {
    pub txid: String,
    #[serde(default)]
    pub inputs: Vec<TokenTxEntry>,
    #[serde(default)]
    pub outputs: Vec<TokenTxEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Unknown,
    Received,
    SentToNetwork,
    AcceptedByNetwork,
    SeenOnNetwork,
    DoubleSpendAttempted,
    Rejected,
    Mined,
    Immutable,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastResponse {
    pub txid: String,
    pub tx_status: TxStatus,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub merkle_path: Option<String>,
    #[serde(default)]
    pub extra_info: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct BroadcastCallback {
    pub url: String,
    pub token: Option<String>,
}

/// One event delivered on the owner sync stream.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutput {
    pub outpoint: String,
    pub score: f64,
    #[serde(default)]
    pub spend_txid: Option<String>,
}

/// Message on the owner subscription: a delivered output, or the terminal
/// catch-up marker.
#[derive(Clone, Debug)]
pub enum StreamMessage {
    Output(SyncOutput),
    Done,
}
