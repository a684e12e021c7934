use bitcoin::Transaction;

use crate::types::{Address, address_from_pkh};

use super::{Indexer, Owners, ParseResult, Txo, is_owned, script, types::IndexPayload};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockData {
    pub address: Address,
    pub until: u32,
}

/// Timelock contract template.
pub struct LockIndexer {
    owners: Owners,
}

impl LockIndexer {
    pub fn new(owners: Owners) -> Self {
        Self { owners }
    }
}

impl Indexer for LockIndexer {
    fn tag(&self) -> &'static str {
        "lock"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        let (pkh, until) = script::lock_parts(&txo.script)?;
        let address = address_from_pkh(&pkh);

        let mut result = ParseResult::new(IndexPayload::Lock(LockData {
            address: address.clone(),
            until,
        }))
        .with_owner(address.clone())
        .with_basket("lock");

        if is_owned(&self.owners, &address) {
            result = result.with_tag(format!("lock:until:{until}"));
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        str::FromStr,
        sync::{Arc, RwLock},
    };

    use bitcoin::ScriptBuf;

    use crate::types::Outpoint;

    use super::*;

    fn lock_script(pkh: [u8; 20], until: u32) -> ScriptBuf {
        let mut bytes = hex::decode(
            script::LOCK_PREFIX_HEX.replace(char::is_whitespace, ""),
        )
        .unwrap();

        bytes.push(20);
        bytes.extend_from_slice(&pkh);

        let height = until.to_le_bytes();
        bytes.push(4);
        bytes.extend_from_slice(&height);

        bytes.extend(
            hex::decode(script::LOCK_SUFFIX_HEX.replace(char::is_whitespace, "")).unwrap(),
        );

        ScriptBuf::from_bytes(bytes)
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
    fn recognises_lock_and_tags_owned_outputs() {
        let pkh = [3u8; 20];
        let address = address_from_pkh(&pkh);

        let owners: Owners = Arc::new(RwLock::new(HashSet::from([address.clone()])));
        let indexer = LockIndexer::new(owners);

        let outpoint = Outpoint::from_str(&format!("{}_0", "22".repeat(32))).unwrap();
        let txo = Txo::new(outpoint, 1000, lock_script(pkh, 850_000));

        let result = indexer.parse(&txo, &empty_tx(), 0).unwrap();

        assert_eq!(result.owner, Some(address));
        assert_eq!(result.basket.as_deref(), Some("lock"));
        assert_eq!(result.tags, vec!["lock:until:850000".to_string()]);
    }

    #[test]
    fn skips_tag_for_foreign_owner() {
        let owners: Owners = Arc::new(RwLock::new(HashSet::new()));
        let indexer = LockIndexer::new(owners);

        let outpoint = Outpoint::from_str(&format!("{}_0", "22".repeat(32))).unwrap();
        let txo = Txo::new(outpoint, 1000, lock_script([3u8; 20], 850_000));

        let result = indexer.parse(&txo, &empty_tx(), 0).unwrap();
        assert!(result.tags.is_empty());
    }

    #[test]
    fn ignores_other_scripts() {
        let owners: Owners = Arc::new(RwLock::new(HashSet::new()));
        let indexer = LockIndexer::new(owners);

        let outpoint = Outpoint::from_str(&format!("{}_0", "22".repeat(32))).unwrap();
        let txo = Txo::new(outpoint, 1000, ScriptBuf::new());

        assert!(indexer.parse(&txo, &empty_tx(), 0).is_none());
    }
}
