use std::{path::Path, str::FromStr, sync::Mutex};

use indexmap::IndexMap;
use itertools::Itertools;
use rusqlite::{Connection, OptionalExtension, params};

use crate::{error::Error, types::Outpoint};

use super::{
    QueueEntry, QueueStats, QueueStatus, StatePatch, SyncQueue, SyncQueueItem, SyncState, item_id,
    unix_now,
};

/*
    Relational queue backend

    Schema mirrors the queue contract directly: one row per (outpoint, score)
    with status/attempts bookkeeping, indexed by status and outpoint, plus a
    single-row state table. Claim runs inside one SQL transaction.
*/

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue (
    id          TEXT PRIMARY KEY,
    outpoint    TEXT NOT NULL,
    score       REAL NOT NULL,
    spend_txid  TEXT,
    status      TEXT NOT NULL,
    attempts    INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_queue_status ON queue (status, score);
CREATE INDEX IF NOT EXISTS idx_queue_outpoint ON queue (outpoint);
CREATE TABLE IF NOT EXISTS state (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL
);
";

const STATE_KEY: &str = "syncState";

pub struct SqlSyncQueue {
    conn: Mutex<Connection>,
}

impl SqlSyncQueue {
    pub fn open(path: &Path) -> Result<Self, Error> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory queue, handy for tests and throwaway syncs.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("queue connection poisoned")
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, SyncQueueItem)> {
    let id: String = row.get("id")?;
    let outpoint: String = row.get("outpoint")?;
    let spend_txid: Option<String> = row.get("spend_txid")?;
    let status: String = row.get("status")?;

    let item = SyncQueueItem {
        id: id.clone(),
        outpoint: Outpoint::from_str(&outpoint)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        score: row.get("score")?,
        spend_txid: spend_txid
            .as_deref()
            .map(bitcoin::Txid::from_str)
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?,
        status: QueueStatus::from_str(&status).unwrap_or(QueueStatus::Failed),
        attempts: row.get("attempts")?,
        last_error: row.get("last_error")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };

    Ok((id, item))
}

impl SyncQueue for SqlSyncQueue {
    fn enqueue(&self, items: &[QueueEntry]) -> Result<(), Error> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = unix_now();

        for entry in items {
            let id = item_id(&entry.outpoint, entry.score);
            let spend_txid = entry.spend_txid.map(|t| t.to_string());

            let existing: Option<String> = tx
                .query_row("SELECT status FROM queue WHERE id = ?1", [&id], |row| {
                    row.get(0)
                })
                .optional()?;

            match existing.as_deref() {
                Some("done") => continue,
                Some(_) => {
                    tx.execute(
                        "UPDATE queue SET status = 'pending', spend_txid = ?2, updated_at = ?3
                         WHERE id = ?1",
                        params![id, spend_txid, now],
                    )?;
                }
                None => {
                    tx.execute(
                        "INSERT INTO queue
                         (id, outpoint, score, spend_txid, status, attempts, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?5)",
                        params![
                            id,
                            entry.outpoint.to_string(),
                            entry.score,
                            spend_txid,
                            now
                        ],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn claim(&self, count: usize) -> Result<IndexMap<String, Vec<SyncQueueItem>>, Error> {
        let mut groups: IndexMap<String, Vec<SyncQueueItem>> = IndexMap::new();

        if count == 0 {
            return Ok(groups);
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = unix_now();

        let seed_txids: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT outpoint FROM queue
                 WHERE status = 'pending' ORDER BY score ASC LIMIT ?1",
            )?;

            let outpoints = stmt
                .query_map([count], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            outpoints
                .into_iter()
                .map(|outpoint| outpoint[..64].to_string())
                .unique()
                .collect()
        };

        for txid in seed_txids {
            let items: Vec<(String, SyncQueueItem)> = {
                let mut stmt = tx.prepare(
                    "SELECT * FROM queue
                     WHERE status = 'pending' AND substr(outpoint, 1, 64) = ?1",
                )?;

                let rows = stmt
                    .query_map([&txid], row_to_item)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows
            };

            if items.is_empty() {
                continue;
            }

            let mut group = vec![];

            for (id, mut item) in items {
                tx.execute(
                    "UPDATE queue SET status = 'processing', attempts = attempts + 1,
                     updated_at = ?2 WHERE id = ?1",
                    params![id, now],
                )?;

                item.status = QueueStatus::Processing;
                item.attempts += 1;
                item.updated_at = now;
                group.push(item);
            }

            groups.insert(txid, group);
        }

        tx.commit()?;
        Ok(groups)
    }

    fn complete(&self, id: &str) -> Result<(), Error> {
        self.lock().execute(
            "UPDATE queue SET status = 'done', updated_at = ?2 WHERE id = ?1",
            params![id, unix_now()],
        )?;
        Ok(())
    }

    fn complete_many(&self, ids: &[String]) -> Result<(), Error> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = unix_now();

        for id in ids {
            tx.execute(
                "UPDATE queue SET status = 'done', updated_at = ?2 WHERE id = ?1",
                params![id, now],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn fail(&self, id: &str, error: &str) -> Result<(), Error> {
        self.lock().execute(
            "UPDATE queue SET status = 'failed', last_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, unix_now()],
        )?;
        Ok(())
    }

    fn get_by_txid(&self, txid: &str) -> Result<Vec<SyncQueueItem>, Error> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM queue WHERE substr(outpoint, 1, 64) = ?1 ORDER BY score")?;

        let rows = stmt
            .query_map([txid], row_to_item)?
            .map_ok(|(_, item)| item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn get_by_status(
        &self,
        status: QueueStatus,
        limit: usize,
    ) -> Result<Vec<SyncQueueItem>, Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM queue WHERE status = ?1 ORDER BY score ASC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![status.as_str(), limit], row_to_item)?
            .map_ok(|(_, item)| item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn stats(&self) -> Result<QueueStats, Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(DISTINCT substr(outpoint, 1, 64)) FROM queue GROUP BY status",
        )?;

        let mut stats = QueueStats::default();

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, usize>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;

            match QueueStatus::from_str(&status) {
                Some(QueueStatus::Pending) => stats.pending = count,
                Some(QueueStatus::Processing) => stats.processing = count,
                Some(QueueStatus::Done) => stats.done = count,
                Some(QueueStatus::Failed) => stats.failed = count,
                None => {}
            }
        }

        Ok(stats)
    }

    fn state(&self) -> Result<SyncState, Error> {
        let value: Option<String> = self
            .lock()
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                [STATE_KEY],
                |row| row.get(0),
            )
            .optional()?;

        let Some(value) = value else {
            return Ok(SyncState::default());
        };

        let parsed: serde_json::Value =
            serde_json::from_str(&value).map_err(|e| Error::storage(e))?;

        Ok(SyncState {
            last_queued_score: parsed["lastQueuedScore"].as_f64().unwrap_or_default(),
            last_synced_at: parsed["lastSyncedAt"].as_u64(),
        })
    }

    fn set_state(&self, patch: StatePatch) -> Result<(), Error> {
        let mut state = self.state()?;

        if let Some(score) = patch.last_queued_score {
            state.last_queued_score = score;
        }
        if let Some(at) = patch.last_synced_at {
            state.last_synced_at = Some(at);
        }

        let value = serde_json::json!({
            "lastQueuedScore": state.last_queued_score,
            "lastSyncedAt": state.last_synced_at,
        });

        self.lock().execute(
            "INSERT INTO state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![STATE_KEY, value.to_string()],
        )?;

        Ok(())
    }

    fn reset_processing(&self) -> Result<usize, Error> {
        let count = self.lock().execute(
            "UPDATE queue SET status = 'pending', updated_at = ?1 WHERE status = 'processing'",
            [unix_now()],
        )?;

        Ok(count)
    }

    fn clear(&self) -> Result<(), Error> {
        let conn = self.lock();
        conn.execute("DELETE FROM queue", [])?;
        conn.execute("DELETE FROM state", [])?;
        Ok(())
    }

    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}
