#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Mutex,
};

use async_trait::async_trait;
use bitcoin::{
    ScriptBuf, Transaction, TxIn, TxOut, Txid,
    hashes::Hash,
    opcodes::all::{OP_ENDIF, OP_IF},
    script::{Builder, PushBytesBuf},
};

use ordsync::{
    Outpoint,
    client::{
        ApiError, BroadcastCallback, BroadcastResponse, ChainHeader, ContentInfo, IndexerApi,
        OrdfsMetadata, OwnerEventStream, StreamMessage, SyncOutput, TokenDetails, TokenTxData,
        TxStatus,
    },
    types::address_from_pkh,
};

/// Scriptable in-process indexer double.
#[derive(Default)]
pub struct MockIndexer {
    pub tip_height: u64,
    pub raw_txs: Mutex<HashMap<Txid, Vec<u8>>>,
    pub metadata: Mutex<HashMap<String, OrdfsMetadata>>,
    pub content: Mutex<HashMap<String, Vec<u8>>>,
    pub token_details: Mutex<HashMap<String, TokenDetails>>,
    /// (token id, txid) pairs the overlay knows about.
    pub token_txs: Mutex<HashSet<(String, String)>>,
    /// Messages delivered on the next owner subscription.
    pub events: Mutex<Vec<Result<StreamMessage, ApiError>>>,
}

impl MockIndexer {
    pub fn new(tip_height: u64) -> Self {
        Self {
            tip_height,
            ..Self::default()
        }
    }

    pub fn add_raw_tx(&self, tx: &Transaction) {
        self.raw_txs
            .lock()
            .unwrap()
            .insert(tx.compute_txid(), bitcoin::consensus::serialize(tx));
    }

    pub fn add_metadata(&self, outpoint: &str, metadata: OrdfsMetadata) {
        self.metadata
            .lock()
            .unwrap()
            .insert(outpoint.to_string(), metadata);
    }

    pub fn add_content(&self, outpoint: &str, bytes: Vec<u8>) {
        self.content
            .lock()
            .unwrap()
            .insert(outpoint.to_string(), bytes);
    }

    pub fn script_events(&self, events: Vec<Result<StreamMessage, ApiError>>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn output_event(outpoint: String, score: f64, spend_txid: Option<String>) -> Result<StreamMessage, ApiError> {
        Ok(StreamMessage::Output(SyncOutput {
            outpoint,
            score,
            spend_txid,
        }))
    }
}

#[async_trait]
impl IndexerApi for MockIndexer {
    async fn fetch_beef(&self, txid: &Txid) -> Result<Vec<u8>, ApiError> {
        self.fetch_raw_tx(txid).await
    }

    async fn fetch_raw_tx(&self, txid: &Txid) -> Result<Vec<u8>, ApiError> {
        self.raw_txs
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn fetch_proof(&self, _txid: &Txid) -> Result<Vec<u8>, ApiError> {
        Err(ApiError::NotFound)
    }

    async fn tip(&self) -> Result<ChainHeader, ApiError> {
        Ok(ChainHeader {
            height: self.tip_height,
            hash: "00".repeat(32),
            merkle_root: None,
            previous_hash: None,
        })
    }

    async fn header_at(&self, height: u64) -> Result<ChainHeader, ApiError> {
        Ok(ChainHeader {
            height,
            hash: "00".repeat(32),
            merkle_root: None,
            previous_hash: None,
        })
    }

    async fn headers(&self, _height: u64, count: u64) -> Result<Vec<u8>, ApiError> {
        Ok(vec![0u8; 80 * count as usize])
    }

    async fn ordfs_metadata(
        &self,
        outpoint: &Outpoint,
        _seq: Option<u64>,
    ) -> Result<OrdfsMetadata, ApiError> {
        self.metadata
            .lock()
            .unwrap()
            .get(&outpoint.to_string())
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn ordfs_content(
        &self,
        outpoint: &Outpoint,
    ) -> Result<(Vec<u8>, ContentInfo), ApiError> {
        self.content
            .lock()
            .unwrap()
            .get(&outpoint.to_string())
            .cloned()
            .map(|bytes| (bytes, ContentInfo::default()))
            .ok_or(ApiError::NotFound)
    }

    async fn token_details(&self, token_id: &str) -> Result<TokenDetails, ApiError> {
        self.token_details
            .lock()
            .unwrap()
            .get(token_id)
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn token_tx(&self, token_id: &str, txid: &Txid) -> Result<TokenTxData, ApiError> {
        let known = self
            .token_txs
            .lock()
            .unwrap()
            .contains(&(token_id.to_string(), txid.to_string()));

        if known {
            Ok(TokenTxData {
                txid: txid.to_string(),
                inputs: vec![],
                outputs: vec![],
            })
        } else {
            Err(ApiError::NotFound)
        }
    }

    async fn broadcast(
        &self,
        raw_tx: Vec<u8>,
        _callback: Option<BroadcastCallback>,
    ) -> Result<BroadcastResponse, ApiError> {
        let tx: Transaction = bitcoin::consensus::deserialize(&raw_tx)
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(BroadcastResponse {
            txid: tx.compute_txid().to_string(),
            tx_status: TxStatus::SeenOnNetwork,
            block_hash: None,
            block_height: None,
            merkle_path: None,
            extra_info: None,
        })
    }

    async fn subscribe_owner_events(
        &self,
        _owners: &[String],
        _from: f64,
    ) -> Result<OwnerEventStream, ApiError> {
        let events = std::mem::take(&mut *self.events.lock().unwrap());

        let (tx, rx) = tokio::sync::mpsc::channel(events.len().max(1));

        for event in events {
            tx.try_send(event).expect("event channel sized to fit");
        }

        Ok(OwnerEventStream::from_channel(rx))
    }
}

// --- transaction builders

pub fn p2pkh_script(pkh: [u8; 20]) -> ScriptBuf {
    ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(pkh))
}

pub fn owner_address(pkh: [u8; 20]) -> String {
    address_from_pkh(&pkh)
}

pub fn dummy_txid(byte: u8) -> Txid {
    Txid::from_str(&hex::encode([byte; 32])).unwrap()
}

pub fn input(txid: Txid, vout: u32) -> TxIn {
    TxIn {
        previous_output: bitcoin::OutPoint { txid, vout },
        ..TxIn::default()
    }
}

pub fn output(satoshis: u64, script: ScriptBuf) -> TxOut {
    TxOut {
        value: bitcoin::Amount::from_sat(satoshis),
        script_pubkey: script,
    }
}

pub fn build_tx(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: bitcoin::transaction::Version::TWO,
        lock_time: bitcoin::absolute::LockTime::ZERO,
        input: inputs,
        output: outputs,
    }
}

/// P2PKH locking script followed by an inscription envelope.
pub fn inscription_script(pkh: [u8; 20], content_type: &str, content: &[u8]) -> ScriptBuf {
    let push = |builder: Builder, data: &[u8]| {
        builder.push_slice(PushBytesBuf::try_from(data.to_vec()).unwrap())
    };

    let builder = Builder::new()
        .push_opcode(bitcoin::opcodes::all::OP_DUP)
        .push_opcode(bitcoin::opcodes::all::OP_HASH160);
    let builder = push(builder, &pkh)
        .push_opcode(bitcoin::opcodes::all::OP_EQUALVERIFY)
        .push_opcode(bitcoin::opcodes::all::OP_CHECKSIG)
        .push_opcode(bitcoin::opcodes::OP_FALSE)
        .push_opcode(OP_IF);
    let builder = push(builder, b"ord");
    let builder = push(builder, &[1u8]);
    let builder = push(builder, content_type.as_bytes());
    let builder = push(builder, &[]);
    push(builder, content).push_opcode(OP_ENDIF).into_script()
}

/// Fungible-token transfer payload inscription.
pub fn token_script(pkh: [u8; 20], op: &str, id: Option<&str>, amt: u64) -> ScriptBuf {
    let payload = match id {
        Some(id) => format!(r#"{{"p":"bsv-20","op":"{op}","id":"{id}","amt":"{amt}"}}"#),
        None => format!(r#"{{"p":"bsv-20","op":"{op}","amt":"{amt}"}}"#),
    };

    inscription_script(pkh, "application/bsv-20", payload.as_bytes())
}
