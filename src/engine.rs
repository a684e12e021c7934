use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use bitcoin::Transaction;
use tracing::info;

use crate::{
    client::{BroadcastCallback, BroadcastResponse, IndexerApi, TxStatus},
    error::Error,
    indexers::{ParseContext, Parser},
    queue::SyncQueue,
    sync::{EventBus, Orchestrator, SyncConfig, SyncEvent},
    types::Address,
    wallet::{IngestOutcome, WalletStorage, ingest_transaction},
};

/// Everything the engine needs to run; the queue is optional for hosts that
/// only parse and ingest.
pub struct EngineConfig {
    pub api: Arc<dyn IndexerApi>,
    pub store: Arc<dyn WalletStorage>,
    pub queue: Option<Arc<dyn SyncQueue>>,
    pub owners: Vec<Address>,
    pub sync: SyncConfig,
}

/// Wallet facade gluing the parser, writer, queue and orchestrator together.
pub struct Engine {
    api: Arc<dyn IndexerApi>,
    store: Arc<dyn WalletStorage>,
    queue: Option<Arc<dyn SyncQueue>>,
    parser: Arc<Parser>,
    owners: crate::indexers::Owners,
    events: Arc<EventBus>,
    orchestrator: Option<Orchestrator>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let owners: crate::indexers::Owners =
            Arc::new(RwLock::new(HashSet::from_iter(config.owners)));

        let parser = Arc::new(Parser::new(owners.clone()));
        let events = Arc::new(EventBus::new());

        let orchestrator = config.queue.clone().map(|queue| {
            Orchestrator::new(
                queue,
                config.api.clone(),
                config.store.clone(),
                parser.clone(),
                owners.clone(),
                events.clone(),
                config.sync,
            )
        });

        Self {
            api: config.api,
            store: config.store,
            queue: config.queue,
            parser,
            owners,
            events,
            orchestrator,
        }
    }

    /// Subscribe to sync lifecycle events.
    pub fn on_event(&self, subscriber: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.events.subscribe(subscriber);
    }

    /// Owners may be added while a sync is active; never removed.
    pub fn add_owner(&self, address: Address) {
        self.owners.write().expect("owners lock").insert(address);
    }

    pub fn owners(&self) -> Vec<Address> {
        let owners = self.owners.read().expect("owners lock");
        let mut list: Vec<_> = owners.iter().cloned().collect();
        list.sort();
        list
    }

    pub async fn parse_transaction(
        &self,
        tx: &Transaction,
        is_broadcast: bool,
    ) -> Result<ParseContext, Error> {
        self.parser
            .parse(tx, self.api.as_ref(), self.store.as_ref(), is_broadcast)
            .await
    }

    pub async fn ingest_transaction(
        &self,
        tx: &Transaction,
        is_broadcast: bool,
        labels: &[String],
    ) -> Result<IngestOutcome, Error> {
        ingest_transaction(
            &self.parser,
            self.api.as_ref(),
            self.store.as_ref(),
            tx,
            is_broadcast,
            labels,
        )
        .await
    }

    /// Submit a transaction to the network, then ingest it as our own.
    pub async fn broadcast(
        &self,
        tx: &Transaction,
        callback: Option<BroadcastCallback>,
    ) -> Result<BroadcastResponse, Error> {
        let raw = bitcoin::consensus::serialize(tx);
        let response = self.api.broadcast(raw, callback).await?;

        if matches!(
            response.tx_status,
            TxStatus::Rejected | TxStatus::DoubleSpendAttempted
        ) {
            return Err(Error::Broadcast(format!(
                "{}: {:?}",
                response.txid, response.tx_status
            )));
        }

        self.ingest_transaction(tx, true, &[]).await?;

        Ok(response)
    }

    fn orchestrator(&self) -> Result<&Orchestrator, Error> {
        self.orchestrator
            .as_ref()
            .ok_or_else(|| Error::config("no sync queue configured"))
    }

    /// Run a full sync epoch: stream until the server signals done and the
    /// queue drains.
    pub async fn sync(&self) -> Result<(), Error> {
        if self.owners.read().expect("owners lock").is_empty() {
            return Err(Error::config("no owner addresses configured"));
        }

        let orchestrator = self.orchestrator()?;

        orchestrator.start_stream().await?;
        orchestrator.start_processor()?;
        orchestrator.wait().await;

        Ok(())
    }

    pub async fn start_stream(&self) -> Result<(), Error> {
        self.orchestrator()?.start_stream().await
    }

    pub fn start_processor(&self) -> Result<(), Error> {
        self.orchestrator()?.start_processor()
    }

    pub fn stop_stream(&self) -> Result<(), Error> {
        self.orchestrator()?.stop_stream();
        Ok(())
    }

    pub fn stop_processor(&self) -> Result<(), Error> {
        self.orchestrator()?.stop_processor();
        Ok(())
    }

    pub async fn stop_sync(&self) -> Result<(), Error> {
        self.orchestrator()?.stop_sync().await;
        Ok(())
    }

    pub fn is_stream_active(&self) -> bool {
        self.orchestrator.as_ref().is_some_and(|o| o.is_stream_active())
    }

    pub fn is_stream_done(&self) -> bool {
        self.orchestrator.as_ref().is_some_and(|o| o.is_stream_done())
    }

    pub fn is_processor_active(&self) -> bool {
        self.orchestrator
            .as_ref()
            .is_some_and(|o| o.is_processor_active())
    }

    /// Stop any active sync and release the queue.
    pub async fn close(&self) -> Result<(), Error> {
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.stop_sync().await;
        }

        if let Some(queue) = &self.queue {
            queue.close()?;
        }

        info!("engine closed");
        Ok(())
    }
}
