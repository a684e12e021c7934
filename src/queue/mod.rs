use std::time::{SystemTime, UNIX_EPOCH};

use bitcoin::Txid;
use indexmap::IndexMap;
use ordsync_macros::{Decode, Encode};

use crate::{error::Error, types::Outpoint};

pub mod kv;
pub mod sql;

pub use kv::KvSyncQueue;
pub use sql::SqlSyncQueue;

/// Store name prefix; one queue store per account.
pub const QUEUE_STORE_PREFIX: &str = "sync-queue-";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "done" => Some(QueueStatus::Done),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// Input to `enqueue`: one delivered stream event.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub outpoint: Outpoint,
    pub score: f64,
    pub spend_txid: Option<Txid>,
}

#[derive(Clone, Debug)]
pub struct SyncQueueItem {
    pub id: String,
    pub outpoint: Outpoint,
    pub score: f64,
    pub spend_txid: Option<Txid>,
    pub status: QueueStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Per-status counts, distinct by txid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SyncState {
    pub last_queued_score: f64,
    pub last_synced_at: Option<u64>,
}

/// Partial state update; `None` fields are left untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatePatch {
    pub last_queued_score: Option<f64>,
    pub last_synced_at: Option<u64>,
}

pub fn item_id(outpoint: &Outpoint, score: f64) -> String {
    format!("{outpoint}:{score}")
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_secs()
}

/// Persistent FIFO-by-score of outpoint events with crash-safe
/// claim/complete semantics.
///
/// Each operation is serializable with respect to the rows it touches. The
/// orchestrator is the single writer; the peek methods (`stats`,
/// `get_by_status`, `get_by_txid`) may be called concurrently from other
/// threads.
pub trait SyncQueue: Send + Sync {
    /// Upsert. Rows already `done` are skipped; otherwise the row returns to
    /// `pending`, preserving `attempts` and `created_at`.
    fn enqueue(&self, items: &[QueueEntry]) -> Result<(), Error>;

    /// Claim up to `count` seed rows plus every other pending row sharing a
    /// seed's txid, flipping all of them to `processing` atomically. Returned
    /// groups are keyed by txid hex and always complete.
    fn claim(&self, count: usize) -> Result<IndexMap<String, Vec<SyncQueueItem>>, Error>;

    /// `processing -> done`. Idempotent.
    fn complete(&self, id: &str) -> Result<(), Error>;

    fn complete_many(&self, ids: &[String]) -> Result<(), Error> {
        for id in ids {
            self.complete(id)?;
        }
        Ok(())
    }

    fn fail(&self, id: &str, error: &str) -> Result<(), Error>;

    fn get_by_txid(&self, txid: &str) -> Result<Vec<SyncQueueItem>, Error>;

    fn get_by_status(&self, status: QueueStatus, limit: usize)
    -> Result<Vec<SyncQueueItem>, Error>;

    fn stats(&self) -> Result<QueueStats, Error>;

    fn state(&self) -> Result<SyncState, Error>;

    fn set_state(&self, patch: StatePatch) -> Result<(), Error>;

    /// Flip all `processing` rows back to `pending`; returns how many. Run on
    /// every fresh start to recover from a crash between claim and complete.
    fn reset_processing(&self) -> Result<usize, Error>;

    /// Delete all queue rows and state; the next sync restarts from score 0.
    fn clear(&self) -> Result<(), Error>;

    fn close(&self) -> Result<(), Error>;
}
