use std::{
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bitcoin::{Transaction, Txid, consensus};
use futures_util::future::join_all;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    client::{IndexerApi, StreamMessage},
    error::Error,
    indexers::{Owners, Parser},
    queue::{QueueEntry, StatePatch, SyncQueue, SyncQueueItem, unix_now},
    types::Outpoint,
    wallet::{OutputPatch, WalletStorage, ingest_transaction, with_wallet_transaction},
};

use super::{EventBus, REORG_SAFE_DEPTH, SyncConfig, SyncEvent};

/*
    Sync orchestrator

    Two cooperating loops. The stream loop drains the owner event stream
    into the queue, advancing the persisted resume point only for events
    safely below the re-org window. The processor loop claims batches,
    groups them by transaction, and drives each group through the parser
    and the storage writer, reporting progress after every batch.
*/

#[derive(Default)]
struct Flags {
    stream_active: AtomicBool,
    stream_done: AtomicBool,
    processor_active: AtomicBool,
    stop_requested: AtomicBool,
}

pub struct Orchestrator {
    worker: Worker,
    flags: Arc<Flags>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
    processor_task: Mutex<Option<JoinHandle<()>>>,
    stream_close: Mutex<Option<oneshot::Sender<()>>>,
}

// the shared handles each loop task owns
#[derive(Clone)]
struct Worker {
    queue: Arc<dyn SyncQueue>,
    api: Arc<dyn IndexerApi>,
    store: Arc<dyn WalletStorage>,
    parser: Arc<Parser>,
    owners: Owners,
    events: Arc<EventBus>,
    config: SyncConfig,
    flags: Arc<Flags>,
}

impl Orchestrator {
    pub fn new(
        queue: Arc<dyn SyncQueue>,
        api: Arc<dyn IndexerApi>,
        store: Arc<dyn WalletStorage>,
        parser: Arc<Parser>,
        owners: Owners,
        events: Arc<EventBus>,
        config: SyncConfig,
    ) -> Self {
        let flags = Arc::new(Flags::default());

        Self {
            worker: Worker {
                queue,
                api,
                store,
                parser,
                owners,
                events,
                config,
                flags: flags.clone(),
            },
            flags,
            stream_task: Mutex::new(None),
            processor_task: Mutex::new(None),
            stream_close: Mutex::new(None),
        }
    }

    pub fn is_stream_active(&self) -> bool {
        self.flags.stream_active.load(Ordering::SeqCst)
    }

    pub fn is_stream_done(&self) -> bool {
        self.flags.stream_done.load(Ordering::SeqCst)
    }

    pub fn is_processor_active(&self) -> bool {
        self.flags.processor_active.load(Ordering::SeqCst)
    }

    /// Open the owner subscription and start draining it into the queue.
    pub async fn start_stream(&self) -> Result<(), Error> {
        if self.flags.stream_active.swap(true, Ordering::SeqCst) {
            warn!("stream loop already active");
            return Ok(());
        }

        self.flags.stream_done.store(false, Ordering::SeqCst);
        self.flags.stop_requested.store(false, Ordering::SeqCst);

        let worker = self.worker.clone();

        let prelude = async {
            // recover any rows stranded in processing by a prior crash
            let recovered = worker.queue.reset_processing()?;
            if recovered > 0 {
                info!(recovered, "reset stranded processing rows");
            }

            let from = worker.queue.state()?.last_queued_score;
            let current_height = worker.api.tip().await?.height;

            Ok::<_, Error>((from, current_height))
        };

        let (from, current_height) = match prelude.await {
            Ok(prelude) => prelude,
            Err(err) => {
                self.flags.stream_active.store(false, Ordering::SeqCst);
                self.flags.stream_done.store(true, Ordering::SeqCst);
                return Err(err);
            }
        };

        let addresses: Vec<_> = {
            let owners = worker.owners.read().expect("owners lock");
            let mut addresses: Vec<_> = owners.iter().cloned().collect();
            addresses.sort();
            addresses
        };

        info!(from, current_height, owners = addresses.len(), "starting sync stream");

        worker.events.emit(&SyncEvent::Start {
            addresses: addresses.clone(),
        });

        let mut subscription = match worker.api.subscribe_owner_events(&addresses, from).await {
            Ok(subscription) => subscription,
            Err(err) => {
                self.flags.stream_active.store(false, Ordering::SeqCst);
                self.flags.stream_done.store(true, Ordering::SeqCst);
                return Err(err.into());
            }
        };

        let (close_tx, mut close_rx) = oneshot::channel();
        *self.stream_close.lock().expect("close lock") = Some(close_tx);

        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = &mut close_rx => break,
                    message = subscription.next() => message,
                };

                match message {
                    Some(Ok(StreamMessage::Output(output))) => {
                        if let Err(err) = worker.enqueue_output(&output, current_height) {
                            warn!("failed to enqueue stream event: {err}");
                        }
                    }
                    Some(Ok(StreamMessage::Done)) => {
                        debug!("owner stream caught up");
                        worker.flags.stream_done.store(true, Ordering::SeqCst);
                        break;
                    }
                    Some(Err(err)) => {
                        worker.flags.stream_done.store(true, Ordering::SeqCst);
                        worker.events.emit(&SyncEvent::Error {
                            message: err.to_string(),
                        });
                        break;
                    }
                    None => {
                        worker.flags.stream_done.store(true, Ordering::SeqCst);
                        worker.events.emit(&SyncEvent::Error {
                            message: "stream closed unexpectedly".to_string(),
                        });
                        break;
                    }
                }
            }

            subscription.close();
            worker.flags.stream_active.store(false, Ordering::SeqCst);
        });

        *self.stream_task.lock().expect("task lock") = Some(task);

        Ok(())
    }

    /// Start claiming and processing queue batches.
    pub fn start_processor(&self) -> Result<(), Error> {
        if self.flags.processor_active.swap(true, Ordering::SeqCst) {
            warn!("processor loop already active");
            return Ok(());
        }

        let worker = self.worker.clone();

        let task = tokio::spawn(async move {
            worker.process_queue_loop().await;
            worker.flags.processor_active.store(false, Ordering::SeqCst);
        });

        *self.processor_task.lock().expect("task lock") = Some(task);

        Ok(())
    }

    /// Cooperative stop: close the subscription, let in-flight batch work
    /// settle, and wait for both loops.
    pub async fn stop_sync(&self) {
        self.flags.stop_requested.store(true, Ordering::SeqCst);

        if let Some(close) = self.stream_close.lock().expect("close lock").take() {
            let _ = close.send(());
        }

        self.wait().await;
    }

    pub fn stop_stream(&self) {
        if let Some(close) = self.stream_close.lock().expect("close lock").take() {
            let _ = close.send(());
        }
    }

    pub fn stop_processor(&self) {
        self.flags.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Wait for whichever loops are running to finish.
    pub async fn wait(&self) {
        let stream = self.stream_task.lock().expect("task lock").take();
        let processor = self.processor_task.lock().expect("task lock").take();

        if let Some(task) = stream {
            if let Err(err) = task.await {
                warn!("stream task join error: {err}");
            }
        }

        if let Some(task) = processor {
            if let Err(err) = task.await {
                warn!("processor task join error: {err}");
            }
        }
    }
}

impl Worker {
    fn enqueue_output(
        &self,
        output: &crate::client::SyncOutput,
        current_height: u64,
    ) -> Result<(), Error> {
        let outpoint = Outpoint::from_str(&output.outpoint)?;

        let spend_txid = output
            .spend_txid
            .as_deref()
            .map(Txid::from_str)
            .transpose()
            .map_err(|e| Error::Stream(format!("bad spend txid: {e}")))?;

        self.queue.enqueue(&[QueueEntry {
            outpoint,
            score: output.score,
            spend_txid,
        }])?;

        // only advance the resume point once the event's block is safely
        // below the re-org window
        let block_height = output.score.floor() as u64;

        if block_height + REORG_SAFE_DEPTH <= current_height {
            self.queue.set_state(StatePatch {
                last_queued_score: Some(output.score),
                last_synced_at: Some(unix_now()),
            })?;
        }

        Ok(())
    }

    async fn process_queue_loop(&self) {
        let batch_size = self.config.batch_size();
        let poll = Duration::from_millis(self.config.poll_interval_ms());

        loop {
            if self.flags.stop_requested.load(Ordering::SeqCst) {
                debug!("processor stop requested");
                break;
            }

            let groups = match self.queue.claim(batch_size) {
                Ok(groups) => groups,
                Err(err) => {
                    self.events.emit(&SyncEvent::Error {
                        message: err.to_string(),
                    });
                    tokio::time::sleep(poll).await;
                    continue;
                }
            };

            if groups.is_empty() {
                if self.flags.stream_done.load(Ordering::SeqCst) {
                    info!("queue drained and stream done");
                    self.events.emit(&SyncEvent::Complete);
                    break;
                }

                tokio::time::sleep(poll).await;
                continue;
            }

            let work = groups.into_iter().map(|(txid, items)| {
                let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();

                async move {
                    let result = self.process_group(&txid, &items).await;
                    (ids, result)
                }
            });

            for (ids, result) in join_all(work).await {
                let outcome = match result {
                    Ok(()) => self.queue.complete_many(&ids),
                    Err(err) => {
                        self.events.emit(&SyncEvent::Error {
                            message: err.to_string(),
                        });

                        let reason = err.to_string();
                        ids.iter().try_for_each(|id| self.queue.fail(id, &reason))
                    }
                };

                if let Err(err) = outcome {
                    warn!("queue bookkeeping failed: {err}");
                }
            }

            match self.queue.stats() {
                Ok(stats) => self.events.emit(&SyncEvent::Progress {
                    pending: stats.pending,
                    done: stats.done,
                    failed: stats.failed,
                }),
                Err(err) => warn!("stats query failed: {err}"),
            }
        }
    }

    async fn process_group(&self, txid: &str, items: &[SyncQueueItem]) -> Result<(), Error> {
        let txid = Txid::from_str(txid).map_err(|e| Error::custom(format!("bad txid: {e}")))?;

        if items.iter().all(|item| item.spend_txid.is_some()) {
            return self.process_spend_only_group(txid, items).await;
        }

        let tx = self.load_transaction(&txid).await?;

        ingest_transaction(
            &self.parser,
            self.api.as_ref(),
            self.store.as_ref(),
            &tx,
            false,
            &[],
        )
        .await?;

        // any of the just-created outputs already known spent gets flipped
        // right away
        with_wallet_transaction(self.store.as_ref(), || {
            for item in items.iter().filter(|item| item.spend_txid.is_some()) {
                if let Some(output) = self
                    .store
                    .find_output(&txid, item.outpoint.vout)?
                    .filter(|output| output.spendable)
                {
                    self.store.update_output(
                        output.id,
                        OutputPatch {
                            spendable: Some(false),
                            spent_by: Some(None),
                        },
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Every item in the group records a spend of an output of `txid`; no
    /// ingest is needed, just spendability flips for outputs we hold.
    async fn process_spend_only_group(
        &self,
        txid: Txid,
        items: &[SyncQueueItem],
    ) -> Result<(), Error> {
        let mut to_flip = vec![];

        for item in items {
            let Some(output) = self
                .store
                .find_output(&txid, item.outpoint.vout)?
                .filter(|output| output.spendable)
            else {
                continue;
            };

            if self.config.verify_spends {
                let spend_txid = item.spend_txid.expect("spend-only group");
                self.verify_spend(&item.outpoint, &spend_txid).await?;
            }

            to_flip.push(output.id);
        }

        if to_flip.is_empty() {
            return Ok(());
        }

        with_wallet_transaction(self.store.as_ref(), || {
            for output_id in &to_flip {
                self.store.update_output(
                    *output_id,
                    OutputPatch {
                        spendable: Some(false),
                        spent_by: Some(None),
                    },
                )?;
            }
            Ok(())
        })
    }

    /// Confirm the claimed spending transaction actually consumes the
    /// outpoint before trusting the spend.
    async fn verify_spend(&self, outpoint: &Outpoint, spend_txid: &Txid) -> Result<(), Error> {
        let raw = self
            .api
            .fetch_raw_tx(spend_txid)
            .await
            .map_err(|err| Error::Verification(format!("{outpoint}: {err}")))?;

        let spend: Transaction = consensus::deserialize(&raw)?;

        let consumes = spend.input.iter().any(|input| {
            input.previous_output.txid == outpoint.txid
                && input.previous_output.vout == outpoint.vout
        });

        if !consumes {
            return Err(Error::Verification(format!(
                "{spend_txid} does not spend {outpoint}"
            )));
        }

        Ok(())
    }

    /// Storage first, then the beef service.
    async fn load_transaction(&self, txid: &Txid) -> Result<Transaction, Error> {
        if let Some(record) = self.store.find_transaction(txid)? {
            return Ok(consensus::deserialize(&record.raw_tx)?);
        }

        let raw = self.api.fetch_raw_tx(txid).await?;
        Ok(consensus::deserialize(&raw)?)
    }
}
