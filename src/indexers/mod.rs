use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use bitcoin::Transaction;

use crate::{client::IndexerApi, error::Error, types::Address};

pub mod bsv21;
pub mod context;
pub mod cosign;
pub mod fund;
pub mod inscription;
pub mod lock;
pub mod map;
pub mod opns;
pub mod ordlock;
pub mod origin;
pub mod script;
pub mod sigma;
pub mod types;

pub use context::{ParseContext, Parser};
pub use types::{IndexData, IndexPayload, IndexSummary, ParseResult, Txo};

/// Shared append-only set of owner addresses.
pub type Owners = Arc<RwLock<HashSet<Address>>>;

pub(crate) fn is_owned(owners: &Owners, address: &str) -> bool {
    owners.read().expect("owners lock").contains(address)
}

/// One protocol decoder.
///
/// `parse` is pure per-output classification: it never errors and never
/// mutates its input; malformed scripts simply yield no match. `summarize`
/// runs once per transaction after every output has been parsed, may read
/// the whole context, mutate its own entries, and perform limited indexer
/// I/O. A `NotFound` from the indexer is domain data and must be handled
/// locally, never surfaced.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Stable identifier keying this decoder's entries in `Txo::data` and
    /// `ParseContext::summary`.
    fn tag(&self) -> &'static str;

    fn parse(&self, txo: &Txo, tx: &Transaction, vout: usize) -> Option<ParseResult>;

    async fn summarize(
        &self,
        _ctx: &mut ParseContext,
        _api: &dyn IndexerApi,
        _is_broadcast: bool,
    ) -> Result<Option<IndexSummary>, Error> {
        Ok(None)
    }
}

/// The fixed decoder set, in evaluation order.
pub fn default_indexers(owners: Owners) -> Vec<Box<dyn Indexer>> {
    vec![
        Box::new(fund::FundIndexer),
        Box::new(lock::LockIndexer::new(owners.clone())),
        Box::new(inscription::InscriptionIndexer),
        Box::new(sigma::SigmaIndexer),
        Box::new(map::MapIndexer),
        Box::new(origin::OriginIndexer::new(owners.clone())),
        Box::new(bsv21::Bsv21Indexer::new(owners.clone())),
        Box::new(ordlock::OrdLockIndexer),
        Box::new(opns::OpnsIndexer),
        Box::new(cosign::CosignIndexer),
    ]
}
