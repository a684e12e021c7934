use std::collections::BTreeMap;

use bitcoin::Transaction;

use super::{Indexer, ParseResult, Txo, script, types::IndexPayload};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MapData {
    pub data: BTreeMap<String, String>,
}

/// Standalone MAP protocol key/value frames in an OP_RETURN script.
pub struct MapIndexer;

impl Indexer for MapIndexer {
    fn tag(&self) -> &'static str {
        "map"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        let frames = script::op_return_frames(&txo.script)?;

        let data = frames
            .iter()
            .find_map(|(_, frame)| script::map_from_frame(frame))?;

        Some(ParseResult::new(IndexPayload::Map(MapData { data })))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::{
        ScriptBuf,
        opcodes::all::OP_RETURN,
        script::{Builder, PushBytesBuf},
    };

    use crate::types::Outpoint;

    use super::*;

    fn map_script(pairs: &[(&str, &str)]) -> ScriptBuf {
        let mut builder = Builder::new()
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_RETURN)
            .push_slice(PushBytesBuf::try_from(script::MAP_PROTOCOL.to_vec()).unwrap())
            .push_slice(PushBytesBuf::try_from(b"SET".to_vec()).unwrap());

        for (key, value) in pairs {
            builder = builder
                .push_slice(PushBytesBuf::try_from(key.as_bytes().to_vec()).unwrap())
                .push_slice(PushBytesBuf::try_from(value.as_bytes().to_vec()).unwrap());
        }

        builder.into_script()
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
    fn parses_set_pairs() {
        let outpoint = Outpoint::from_str(&format!("{}_0", "33".repeat(32))).unwrap();
        let txo = Txo::new(outpoint, 0, map_script(&[("app", "demo"), ("name", "x")]));

        let result = MapIndexer.parse(&txo, &empty_tx(), 0).unwrap();

        let IndexPayload::Map(map) = result.payload else {
            panic!("expected map payload");
        };

        assert_eq!(map.data.get("app").map(String::as_str), Some("demo"));
        assert_eq!(map.data.len(), 2);
    }

    #[test]
    fn ignores_scripts_without_map_frame() {
        let outpoint = Outpoint::from_str(&format!("{}_0", "33".repeat(32))).unwrap();
        let txo = Txo::new(outpoint, 0, ScriptBuf::new());

        assert!(MapIndexer.parse(&txo, &empty_tx(), 0).is_none());
    }
}
