use std::{collections::HashSet, path::Path, str::FromStr};

use indexmap::IndexMap;
use ordsync_macros::{Decode, Encode};
use rocksdb::WriteBatch;
use tracing::debug;

use crate::{
    define_table,
    error::Error,
    storage::{encdec::Encode, kv_store::StorageHandler, table::Table},
    types::Outpoint,
};

use super::{
    QueueEntry, QueueStats, QueueStatus, StatePatch, SyncQueue, SyncQueueItem, SyncState, item_id,
    unix_now,
};

/*
    Key-value queue backend

    Items are keyed by their id string. Because the id begins with the
    outpoint's txid hex, a prefix scan over the item table doubles as the
    by-txid lookup. A secondary (status, score, id) index drives seed
    selection in score order and the status scans.
*/

#[derive(Encode, Decode, Clone, Debug)]
struct StoredItem {
    outpoint: String,
    score: f64,
    spend_txid: Option<String>,
    status: QueueStatus,
    attempts: u32,
    last_error: Option<String>,
    created_at: u64,
    updated_at: u64,
}

#[derive(Encode, Decode, Clone, Debug)]
struct StatusKey {
    status: QueueStatus,
    score: f64,
    id: String,
}

#[derive(Encode, Decode, Clone, Copy, Debug, Default)]
struct StoredState {
    last_queued_score: f64,
    last_synced_at: Option<u64>,
}

/// Item key encoded as raw utf8 with no length prefix, so ids sharing a txid
/// share a key prefix and the by-txid lookup is a plain range scan.
#[derive(Clone, Debug)]
struct RawId(String);

impl crate::storage::encdec::Encode for RawId {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.0.as_bytes());
    }
}

impl crate::storage::encdec::Decode for RawId {
    fn take(bytes: &mut &[u8]) -> Result<Self, crate::CodecError> {
        let id = String::from_utf8(bytes.to_vec())?;
        *bytes = &bytes[bytes.len()..];
        Ok(RawId(id))
    }
}

define_table! {
    name: ItemByIdKV,
    key_type: RawId,
    value_type: StoredItem,
    table: b'q'
}

define_table! {
    name: StatusIndexKV,
    key_type: StatusKey,
    value_type: (),
    table: b's'
}

define_table! {
    name: StateKV,
    key_type: u8,
    value_type: StoredState,
    table: b'c'
}

const STATE_KEY: u8 = 0;

pub struct KvSyncQueue {
    store: StorageHandler,
}

impl KvSyncQueue {
    pub fn open(path: &Path) -> Result<Self, Error> {
        Ok(Self {
            store: StorageHandler::open(path)?,
        })
    }

    fn item(&self, id: &str) -> Result<Option<StoredItem>, Error> {
        self.store.get::<ItemByIdKV>(&RawId(id.to_string()))
    }

    fn put_item(&self, batch: &mut WriteBatch, id: &str, item: &StoredItem) {
        batch.put(ItemByIdKV::encode_key(&RawId(id.to_string())), item.encode());
    }

    fn index_key(id: &str, item: &StoredItem) -> Vec<u8> {
        StatusIndexKV::encode_key(&StatusKey {
            status: item.status,
            score: item.score,
            id: id.to_string(),
        })
    }

    /// Rewrite an item under a new status, keeping the index in step.
    fn transition(
        &self,
        batch: &mut WriteBatch,
        id: &str,
        mut item: StoredItem,
        status: QueueStatus,
    ) -> StoredItem {
        batch.delete(Self::index_key(id, &item));

        item.status = status;
        item.updated_at = unix_now();

        self.put_item(batch, id, &item);
        batch.put(Self::index_key(id, &item), [0u8; 0]);

        item
    }

    fn items_with_status(
        &self,
        status: QueueStatus,
        limit: Option<usize>,
    ) -> Result<Vec<(String, StoredItem)>, Error> {
        let range = StatusIndexKV::encode_range(Some(&status), Some(&next_status(status)));

        let mut out = vec![];

        for entry in self.store.iter::<StatusIndexKV>(range) {
            let (key, _) = entry?;

            let Some(item) = self.item(&key.id)? else {
                continue;
            };

            out.push((key.id, item));

            if limit.is_some_and(|l| out.len() >= l) {
                break;
            }
        }

        Ok(out)
    }

    fn pending_by_txid(&self, txid: &str) -> Result<Vec<(String, StoredItem)>, Error> {
        Ok(self
            .rows_by_txid(txid)?
            .into_iter()
            .filter(|(_, item)| item.status == QueueStatus::Pending)
            .collect())
    }

    fn rows_by_txid(&self, txid: &str) -> Result<Vec<(String, StoredItem)>, Error> {
        let prefix = [&[ItemByIdKV::TABLE_ID][..], txid.as_bytes()].concat();
        let range = crate::storage::encdec::prefix_range(&prefix);

        let mut out = vec![];
        for entry in self.store.iter::<ItemByIdKV>(range) {
            let (id, item) = entry?;
            out.push((id.0, item));
        }

        Ok(out)
    }
}

// exclusive upper bound for a status range scan
fn next_status(status: QueueStatus) -> u8 {
    status.encode()[0] + 1
}

fn to_queue_item(id: String, item: StoredItem) -> Result<SyncQueueItem, Error> {
    Ok(SyncQueueItem {
        id,
        outpoint: Outpoint::from_str(&item.outpoint)?,
        score: item.score,
        spend_txid: item
            .spend_txid
            .as_deref()
            .map(bitcoin::Txid::from_str)
            .transpose()
            .map_err(|e| Error::storage(format!("bad spend txid: {e}")))?,
        status: item.status,
        attempts: item.attempts,
        last_error: item.last_error,
        created_at: item.created_at,
        updated_at: item.updated_at,
    })
}

impl SyncQueue for KvSyncQueue {
    fn enqueue(&self, items: &[QueueEntry]) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        let now = unix_now();

        for entry in items {
            let id = item_id(&entry.outpoint, entry.score);

            let item = match self.item(&id)? {
                Some(existing) if existing.status == QueueStatus::Done => continue,
                Some(existing) => {
                    batch.delete(Self::index_key(&id, &existing));

                    StoredItem {
                        spend_txid: entry.spend_txid.map(|t| t.to_string()),
                        status: QueueStatus::Pending,
                        updated_at: now,
                        ..existing
                    }
                }
                None => StoredItem {
                    outpoint: entry.outpoint.to_string(),
                    score: entry.score,
                    spend_txid: entry.spend_txid.map(|t| t.to_string()),
                    status: QueueStatus::Pending,
                    attempts: 0,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                },
            };

            self.put_item(&mut batch, &id, &item);
            batch.put(Self::index_key(&id, &item), [0u8; 0]);
        }

        self.store.write(batch)
    }

    fn claim(&self, count: usize) -> Result<IndexMap<String, Vec<SyncQueueItem>>, Error> {
        if count == 0 {
            return Ok(IndexMap::new());
        }

        let seeds = self.items_with_status(QueueStatus::Pending, Some(count))?;

        let mut txids: Vec<String> = vec![];
        for (id, _) in &seeds {
            let txid = id[..64].to_string();
            if !txids.contains(&txid) {
                txids.push(txid);
            }
        }

        let mut batch = WriteBatch::new();
        let mut groups = IndexMap::new();

        for txid in txids {
            let mut group = vec![];

            for (id, item) in self.pending_by_txid(&txid)? {
                let mut item = self.transition(&mut batch, &id, item, QueueStatus::Processing);
                item.attempts += 1;
                self.put_item(&mut batch, &id, &item);

                group.push(to_queue_item(id, item)?);
            }

            if !group.is_empty() {
                groups.insert(txid, group);
            }
        }

        self.store.write(batch)?;

        debug!(groups = groups.len(), "claimed queue groups");

        Ok(groups)
    }

    fn complete(&self, id: &str) -> Result<(), Error> {
        let Some(item) = self.item(id)? else {
            return Ok(());
        };

        if item.status == QueueStatus::Done {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        self.transition(&mut batch, id, item, QueueStatus::Done);
        self.store.write(batch)
    }

    fn fail(&self, id: &str, error: &str) -> Result<(), Error> {
        let Some(item) = self.item(id)? else {
            return Ok(());
        };

        let mut batch = WriteBatch::new();
        let mut item = self.transition(&mut batch, id, item, QueueStatus::Failed);
        item.last_error = Some(error.to_string());
        self.put_item(&mut batch, id, &item);
        self.store.write(batch)
    }

    fn get_by_txid(&self, txid: &str) -> Result<Vec<SyncQueueItem>, Error> {
        self.rows_by_txid(txid)?
            .into_iter()
            .map(|(id, item)| to_queue_item(id, item))
            .collect()
    }

    fn get_by_status(
        &self,
        status: QueueStatus,
        limit: usize,
    ) -> Result<Vec<SyncQueueItem>, Error> {
        self.items_with_status(status, Some(limit))?
            .into_iter()
            .map(|(id, item)| to_queue_item(id, item))
            .collect()
    }

    fn stats(&self) -> Result<QueueStats, Error> {
        let mut stats = QueueStats::default();

        for (count, status) in [
            (&mut stats.pending, QueueStatus::Pending),
            (&mut stats.processing, QueueStatus::Processing),
            (&mut stats.done, QueueStatus::Done),
            (&mut stats.failed, QueueStatus::Failed),
        ] {
            let mut txids = HashSet::new();
            for (id, _) in self.items_with_status(status, None)? {
                txids.insert(id[..64].to_string());
            }
            *count = txids.len();
        }

        Ok(stats)
    }

    fn state(&self) -> Result<SyncState, Error> {
        let stored = self.store.get::<StateKV>(&STATE_KEY)?.unwrap_or_default();

        Ok(SyncState {
            last_queued_score: stored.last_queued_score,
            last_synced_at: stored.last_synced_at,
        })
    }

    fn set_state(&self, patch: StatePatch) -> Result<(), Error> {
        let mut stored = self.store.get::<StateKV>(&STATE_KEY)?.unwrap_or_default();

        if let Some(score) = patch.last_queued_score {
            stored.last_queued_score = score;
        }
        if let Some(at) = patch.last_synced_at {
            stored.last_synced_at = Some(at);
        }

        let mut batch = WriteBatch::new();
        batch.put(StateKV::encode_key(&STATE_KEY), stored.encode());
        self.store.write(batch)
    }

    fn reset_processing(&self) -> Result<usize, Error> {
        let stuck = self.items_with_status(QueueStatus::Processing, None)?;

        let mut batch = WriteBatch::new();
        for (id, item) in &stuck {
            self.transition(&mut batch, id, item.clone(), QueueStatus::Pending);
        }
        self.store.write(batch)?;

        Ok(stuck.len())
    }

    fn clear(&self) -> Result<(), Error> {
        let mut batch = WriteBatch::new();

        for range in [
            ItemByIdKV::full_range(),
            StatusIndexKV::full_range(),
            StateKV::full_range(),
        ] {
            batch.delete_range(range.start, range.end);
        }

        self.store.write(batch)
    }

    fn close(&self) -> Result<(), Error> {
        self.store.flush()
    }
}
