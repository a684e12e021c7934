use bitcoin::Txid;

use crate::error::Error;

pub mod memory;
pub mod writer;

pub use memory::MemoryWalletStore;
pub use writer::{IngestOutcome, ingest_transaction};

/*
    Wallet storage contract

    The engine treats the wallet's UTXO store as an external collaborator;
    only these operations are relied upon. A storage handle is scoped to one
    account. Mutations performed between `begin` and `commit` must be applied
    atomically; `with_wallet_transaction` is the scoped wrapper the writer
    uses.
*/

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxRecordStatus {
    /// Broadcast by us; accepted for relay.
    Completed,
    /// Seen via sync; proof not yet checked.
    Unproven,
}

impl TxRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxRecordStatus::Completed => "completed",
            TxRecordStatus::Unproven => "unproven",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransactionRecord {
    pub id: i64,
    pub txid: Txid,
    pub status: TxRecordStatus,
    pub is_outgoing: bool,
    /// Net effect on the wallet: received minus spent.
    pub satoshis: i64,
    pub satoshis_spent: u64,
    pub satoshis_received: u64,
    pub raw_tx: Vec<u8>,
    pub reference: String,
}

#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub txid: Txid,
    pub status: TxRecordStatus,
    pub is_outgoing: bool,
    pub satoshis: i64,
    pub satoshis_spent: u64,
    pub satoshis_received: u64,
    pub raw_tx: Vec<u8>,
    pub reference: String,
}

#[derive(Clone, Debug)]
pub struct OutputRecord {
    pub id: i64,
    pub transaction_id: i64,
    pub txid: Txid,
    pub vout: u32,
    pub satoshis: u64,
    pub locking_script: Vec<u8>,
    pub basket_id: i64,
    pub spendable: bool,
    pub spent_by: Option<i64>,
    pub change: bool,
    pub purpose: String,
    pub output_type: String,
    pub provided_by: String,
    pub custom_instructions: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewOutput {
    pub transaction_id: i64,
    pub txid: Txid,
    pub vout: u32,
    pub satoshis: u64,
    pub locking_script: Vec<u8>,
    pub basket_id: i64,
    pub spendable: bool,
    pub spent_by: Option<i64>,
    pub change: bool,
    pub purpose: String,
    pub output_type: String,
    pub provided_by: String,
    pub custom_instructions: Option<String>,
}

/// Partial output update; `None` fields are untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutputPatch {
    pub spendable: Option<bool>,
    pub spent_by: Option<Option<i64>>,
}

pub trait WalletStorage: Send + Sync {
    fn find_transaction(&self, txid: &Txid) -> Result<Option<TransactionRecord>, Error>;

    fn insert_transaction(&self, tx: NewTransaction) -> Result<i64, Error>;

    fn find_output(&self, txid: &Txid, vout: u32) -> Result<Option<OutputRecord>, Error>;

    fn insert_output(&self, output: NewOutput) -> Result<i64, Error>;

    fn update_output(&self, output_id: i64, patch: OutputPatch) -> Result<(), Error>;

    fn find_or_insert_basket(&self, name: &str) -> Result<i64, Error>;

    fn find_or_insert_tag(&self, name: &str) -> Result<i64, Error>;

    fn tag_output(&self, output_id: i64, tag_id: i64) -> Result<(), Error>;

    fn find_or_insert_label(&self, name: &str) -> Result<i64, Error>;

    fn label_transaction(&self, transaction_id: i64, label_id: i64) -> Result<(), Error>;

    fn begin(&self) -> Result<(), Error>;

    fn commit(&self) -> Result<(), Error>;

    fn rollback(&self) -> Result<(), Error>;
}

/// Run `f` inside a storage transaction, rolling back on any error.
pub fn with_wallet_transaction<T>(
    store: &dyn WalletStorage,
    f: impl FnOnce() -> Result<T, Error>,
) -> Result<T, Error> {
    store.begin()?;

    match f() {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(err) => {
            store.rollback()?;
            Err(err)
        }
    }
}
