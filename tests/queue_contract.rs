mod common;

use std::str::FromStr;

use ordsync::{
    Outpoint,
    queue::{KvSyncQueue, QueueEntry, QueueStatus, SqlSyncQueue, StatePatch, SyncQueue},
};

/*
    Queue contract tests, run against both backends.
*/

fn kv_queue() -> (tempfile::TempDir, Box<dyn SyncQueue>) {
    let dir = tempfile::tempdir().unwrap();
    let queue = KvSyncQueue::open(&dir.path().join("queue")).unwrap();
    (dir, Box::new(queue))
}

fn sql_queue() -> (tempfile::TempDir, Box<dyn SyncQueue>) {
    let dir = tempfile::tempdir().unwrap();
    let queue = SqlSyncQueue::open(&dir.path().join("queue.db")).unwrap();
    (dir, Box::new(queue))
}

fn each_backend(test: impl Fn(&dyn SyncQueue)) {
    let (_kv_dir, kv) = kv_queue();
    test(kv.as_ref());

    let (_sql_dir, sql) = sql_queue();
    test(sql.as_ref());
}

fn outpoint(byte: u8, vout: u32) -> Outpoint {
    Outpoint::from_str(&format!("{}_{vout}", hex::encode([byte; 32]))).unwrap()
}

fn entry(byte: u8, vout: u32, score: f64) -> QueueEntry {
    QueueEntry {
        outpoint: outpoint(byte, vout),
        score,
        spend_txid: None,
    }
}

#[test]
fn enqueue_is_an_upsert() {
    each_backend(|queue| {
        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();
        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();

        let items = queue.get_by_txid(&"aa".repeat(32)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].attempts, 0);
        assert_eq!(items[0].status, QueueStatus::Pending);

        // same outpoint, different score is a distinct row
        queue.enqueue(&[entry(0xaa, 0, 11.0)]).unwrap();
        assert_eq!(queue.get_by_txid(&"aa".repeat(32)).unwrap().len(), 2);
    });
}

#[test]
fn enqueue_skips_done_rows() {
    each_backend(|queue| {
        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();

        let groups = queue.claim(5).unwrap();
        let id = groups.values().next().unwrap()[0].id.clone();
        queue.complete(&id).unwrap();

        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();

        let items = queue.get_by_txid(&"aa".repeat(32)).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueStatus::Done);
    });
}

#[test]
fn failed_rows_return_to_pending_on_redelivery() {
    each_backend(|queue| {
        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();

        let groups = queue.claim(5).unwrap();
        let item = &groups.values().next().unwrap()[0];
        queue.fail(&item.id, "boom").unwrap();

        let failed = queue.get_by_status(QueueStatus::Failed, 10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));

        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();

        let items = queue.get_by_txid(&"aa".repeat(32)).unwrap();
        assert_eq!(items[0].status, QueueStatus::Pending);
        // attempts survive the re-delivery
        assert_eq!(items[0].attempts, 1);
    });
}

#[test]
fn claim_returns_complete_groups() {
    each_backend(|queue| {
        // three outputs of one transaction, one of another
        queue
            .enqueue(&[
                entry(0xaa, 0, 10.0),
                entry(0xaa, 1, 10.1),
                entry(0xaa, 2, 10.2),
                entry(0xbb, 0, 20.0),
            ])
            .unwrap();

        // a single seed pulls in every pending row of its txid
        let groups = queue.claim(1).unwrap();
        assert_eq!(groups.len(), 1);

        let (txid, items) = groups.iter().next().unwrap();
        assert_eq!(txid, &"aa".repeat(32));
        assert_eq!(items.len(), 3);

        for item in items {
            assert_eq!(item.status, QueueStatus::Processing);
            assert_eq!(item.attempts, 1);
        }

        // no pending rows with that txid remain
        let remaining = queue.get_by_status(QueueStatus::Pending, 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].outpoint, outpoint(0xbb, 0));
    });
}

#[test]
fn claim_empty_queue_is_empty() {
    each_backend(|queue| {
        assert!(queue.claim(10).unwrap().is_empty());
        assert!(queue.claim(0).unwrap().is_empty());
    });
}

#[test]
fn complete_is_idempotent() {
    each_backend(|queue| {
        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();

        let groups = queue.claim(5).unwrap();
        let id = groups.values().next().unwrap()[0].id.clone();

        queue.complete(&id).unwrap();
        queue.complete(&id).unwrap();

        let items = queue.get_by_txid(&"aa".repeat(32)).unwrap();
        assert_eq!(items[0].status, QueueStatus::Done);
        assert_eq!(items[0].attempts, 1);
    });
}

#[test]
fn reset_processing_recovers_claimed_rows() {
    each_backend(|queue| {
        queue
            .enqueue(&[entry(0xaa, 0, 10.0), entry(0xbb, 0, 11.0)])
            .unwrap();

        let claimed = queue.claim(5).unwrap();
        assert_eq!(claimed.len(), 2);

        // crash happens here; on restart everything goes back to pending
        let recovered = queue.reset_processing().unwrap();
        assert_eq!(recovered, 2);

        assert!(queue.get_by_status(QueueStatus::Processing, 10).unwrap().is_empty());

        let reclaimed = queue.claim(5).unwrap();
        assert_eq!(reclaimed.len(), 2);

        for items in reclaimed.values() {
            assert_eq!(items[0].attempts, 2);
        }
    });
}

#[test]
fn stats_count_distinct_txids() {
    each_backend(|queue| {
        // a 3-output transaction contributes 1 to its status count
        queue
            .enqueue(&[
                entry(0xaa, 0, 10.0),
                entry(0xaa, 1, 10.1),
                entry(0xaa, 2, 10.2),
                entry(0xbb, 0, 20.0),
            ])
            .unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.done, 0);

        let groups = queue.claim(1).unwrap();
        let ids: Vec<_> = groups
            .values()
            .flat_map(|items| items.iter().map(|i| i.id.clone()))
            .collect();
        queue.complete_many(&ids).unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.done, 1);
    });
}

#[test]
fn state_round_trips_through_patches() {
    each_backend(|queue| {
        let state = queue.state().unwrap();
        assert_eq!(state.last_queued_score, 0.0);
        assert!(state.last_synced_at.is_none());

        queue
            .set_state(StatePatch {
                last_queued_score: Some(123.5),
                last_synced_at: None,
            })
            .unwrap();

        let state = queue.state().unwrap();
        assert_eq!(state.last_queued_score, 123.5);
        assert!(state.last_synced_at.is_none());

        queue
            .set_state(StatePatch {
                last_queued_score: None,
                last_synced_at: Some(42),
            })
            .unwrap();

        let state = queue.state().unwrap();
        assert_eq!(state.last_queued_score, 123.5);
        assert_eq!(state.last_synced_at, Some(42));
    });
}

#[test]
fn clear_wipes_rows_and_state() {
    each_backend(|queue| {
        queue.enqueue(&[entry(0xaa, 0, 10.0)]).unwrap();
        queue
            .set_state(StatePatch {
                last_queued_score: Some(99.0),
                last_synced_at: Some(1),
            })
            .unwrap();

        queue.clear().unwrap();

        assert!(queue.get_by_txid(&"aa".repeat(32)).unwrap().is_empty());
        assert_eq!(queue.stats().unwrap().pending, 0);
        assert_eq!(queue.state().unwrap().last_queued_score, 0.0);
    });
}

#[test]
fn spend_txid_survives_the_round_trip() {
    each_backend(|queue| {
        let spend = common::dummy_txid(0xcc);

        queue
            .enqueue(&[QueueEntry {
                outpoint: outpoint(0xaa, 0),
                score: 50.0,
                spend_txid: Some(spend),
            }])
            .unwrap();

        let items = queue.get_by_txid(&"aa".repeat(32)).unwrap();
        assert_eq!(items[0].spend_txid, Some(spend));
        assert_eq!(items[0].score, 50.0);
    });
}

#[test]
fn crash_mid_batch_converges_after_restart() {
    each_backend(|queue| {
        // twenty single-output transactions
        let entries: Vec<QueueEntry> = (0..20)
            .map(|i| entry(i as u8 + 1, 0, 100.0 + i as f64))
            .collect();
        queue.enqueue(&entries).unwrap();

        let groups = queue.claim(20).unwrap();
        assert_eq!(groups.len(), 20);

        // half the batch completes before the crash
        let ids: Vec<_> = groups
            .values()
            .take(10)
            .flat_map(|items| items.iter().map(|i| i.id.clone()))
            .collect();
        queue.complete_many(&ids).unwrap();

        // restart: stranded rows return to pending and reclaim drains them
        let recovered = queue.reset_processing().unwrap();
        assert_eq!(recovered, 10);

        let reclaimed = queue.claim(20).unwrap();
        let remaining: Vec<_> = reclaimed
            .values()
            .flat_map(|items| items.iter().map(|i| i.id.clone()))
            .collect();
        assert_eq!(remaining.len(), 10);

        queue.complete_many(&remaining).unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.done, 20);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.processing, 0);
    });
}
