use bitcoin::Transaction;

use crate::types::address_from_pkh;

use super::{Indexer, ParseResult, Txo, script, types::IndexPayload};

/// Standard pay-to-pubkey-hash outputs carrying more than one satoshi.
pub struct FundIndexer;

impl Indexer for FundIndexer {
    fn tag(&self) -> &'static str {
        "fund"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        if txo.satoshis <= 1 {
            return None;
        }

        let pkh = script::p2pkh_hash(&txo.script)?;

        Some(
            ParseResult::new(IndexPayload::Fund)
                .with_owner(address_from_pkh(&pkh))
                .with_basket("fund"),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::{ScriptBuf, hashes::Hash};

    use crate::types::Outpoint;

    use super::*;

    fn p2pkh_script(pkh: [u8; 20]) -> ScriptBuf {
        ScriptBuf::new_p2pkh(&bitcoin::PubkeyHash::from_byte_array(pkh))
    }

    fn txo(satoshis: u64, script: ScriptBuf) -> Txo {
        let outpoint = Outpoint::from_str(&format!("{}_0", "11".repeat(32))).unwrap();
        Txo::new(outpoint, satoshis, script)
    }

    fn empty_tx() -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        }
    }

    #[test]
    fn matches_p2pkh_above_one_sat() {
        let result = FundIndexer
            .parse(&txo(900, p2pkh_script([9u8; 20])), &empty_tx(), 0)
            .unwrap();

        assert_eq!(result.basket.as_deref(), Some("fund"));
        assert_eq!(result.owner, Some(address_from_pkh(&[9u8; 20])));
    }

    #[test]
    fn skips_one_sat_outputs() {
        assert!(
            FundIndexer
                .parse(&txo(1, p2pkh_script([9u8; 20])), &empty_tx(), 0)
                .is_none()
        );
    }

    #[test]
    fn skips_non_p2pkh() {
        assert!(
            FundIndexer
                .parse(&txo(900, ScriptBuf::new()), &empty_tx(), 0)
                .is_none()
        );
    }
}
