use async_trait::async_trait;
use bitcoin::Transaction;

use crate::{
    client::IndexerApi,
    error::Error,
    types::{Address, address_from_pkh},
};

use super::{
    Indexer, ParseContext, ParseResult, Txo, script,
    types::{IndexPayload, IndexSummary},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrdLockData {
    pub seller: Address,
    /// Raw payout output demanded by a purchase.
    pub payout: Vec<u8>,
}

/// Marketplace listing template. The summary amount distinguishes listing
/// creation (-1), seller cancel (0) and purchase (+1).
pub struct OrdLockIndexer;

#[async_trait]
impl Indexer for OrdLockIndexer {
    fn tag(&self) -> &'static str {
        "ordlock"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        let (pkh, payout) = script::ordlock_parts(&txo.script)?;
        let seller = address_from_pkh(&pkh);

        Some(
            ParseResult::new(IndexPayload::OrdLock(OrdLockData {
                seller: seller.clone(),
                payout,
            }))
            .with_owner(seller)
            .with_tag("ordlock".to_string()),
        )
    }

    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        _api: &dyn IndexerApi,
        _is_broadcast: bool,
    ) -> Result<Option<IndexSummary>, Error> {
        let creates = ctx
            .txos
            .iter()
            .any(|txo| txo.data.contains_key(self.tag()));

        let spent_listing = ctx
            .spends
            .iter()
            .position(|spend| spend.data.contains_key(self.tag()));

        let amount = match (creates, spent_listing) {
            // new listing enters the book
            (true, None) => Some(-1),
            (_, Some(vin)) => {
                let purchase = ctx
                    .tx
                    .input
                    .get(vin)
                    .is_some_and(|input| script::is_purchase_unlock(&input.script_sig));

                Some(if purchase { 1 } else { 0 })
            }
            (false, None) => None,
        };

        Ok(amount.map(|amount| IndexSummary {
            amount: Some(amount),
            ..IndexSummary::default()
        }))
    }
}
