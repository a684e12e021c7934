use bitcoin::Transaction;

use crate::types::{Address, address_from_pkh};

use super::{Indexer, ParseResult, Txo, script, types::IndexPayload};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CosignData {
    pub address: Address,
    /// Cosigner public key, hex.
    pub cosigner: String,
}

/// Cosigner template: a required second signature in front of a P2PKH tail.
/// The primary address is the spender identity.
pub struct CosignIndexer;

impl Indexer for CosignIndexer {
    fn tag(&self) -> &'static str {
        "cosign"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        let (pkh, cosigner) = script::cosign_parts(&txo.script)?;
        let address = address_from_pkh(&pkh);

        Some(
            ParseResult::new(IndexPayload::Cosign(CosignData {
                address: address.clone(),
                cosigner: hex::encode(cosigner),
            }))
            .with_owner(address),
        )
    }
}
