use bitcoin::Transaction;
use serde::Deserialize;

use super::{Indexer, ParseResult, Txo, script, types::IndexPayload};

pub const OPNS_CONTENT_TYPE: &str = "application/op-ns";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpnsData {
    pub name: Option<String>,
}

#[derive(Deserialize)]
struct OpnsPayload {
    #[serde(default)]
    name: Option<String>,
}

/// Name-system inscriptions.
pub struct OpnsIndexer;

impl Indexer for OpnsIndexer {
    fn tag(&self) -> &'static str {
        "opns"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        if txo.satoshis != 1 {
            return None;
        }

        let envelope = script::find_envelope(&txo.script)?;

        if envelope.content_type != OPNS_CONTENT_TYPE {
            return None;
        }

        // payload is JSON with a name claim, or the bare name itself
        let name = serde_json::from_slice::<OpnsPayload>(&envelope.content)
            .ok()
            .and_then(|p| p.name)
            .or_else(|| {
                let raw = String::from_utf8(envelope.content.clone()).ok()?;
                (!raw.is_empty() && !raw.trim_start().starts_with('{')).then_some(raw)
            });

        let mut result =
            ParseResult::new(IndexPayload::Opns(OpnsData { name: name.clone() }))
                .with_basket("opns");

        if let Some(name) = name {
            result = result.with_tag(format!("name:{name}"));
        }

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::{
        ScriptBuf,
        opcodes::all::{OP_ENDIF, OP_IF},
        script::{Builder, PushBytesBuf},
    };

    use crate::types::Outpoint;

    use super::*;

    fn opns_script(content: &[u8]) -> ScriptBuf {
        Builder::new()
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_IF)
            .push_slice(PushBytesBuf::try_from(b"ord".to_vec()).unwrap())
            .push_slice(PushBytesBuf::try_from(vec![1u8]).unwrap())
            .push_slice(PushBytesBuf::try_from(OPNS_CONTENT_TYPE.as_bytes().to_vec()).unwrap())
            .push_slice(PushBytesBuf::try_from(vec![]).unwrap())
            .push_slice(PushBytesBuf::try_from(content.to_vec()).unwrap())
            .push_opcode(OP_ENDIF)
            .into_script()
    }

    fn txo(script: ScriptBuf) -> Txo {
        let outpoint = Outpoint::from_str(&format!("{}_0", "55".repeat(32))).unwrap();
        Txo::new(outpoint, 1, script)
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
    fn tags_recognised_names() {
        let result = OpnsIndexer
            .parse(&txo(opns_script(br#"{"name":"satoshi"}"#)), &empty_tx(), 0)
            .unwrap();

        assert_eq!(result.basket.as_deref(), Some("opns"));
        assert_eq!(result.tags, vec!["name:satoshi".to_string()]);
    }

    #[test]
    fn accepts_bare_name_content() {
        let result = OpnsIndexer
            .parse(&txo(opns_script(b"satoshi")), &empty_tx(), 0)
            .unwrap();

        assert_eq!(result.tags, vec!["name:satoshi".to_string()]);
    }

    #[test]
    fn ignores_other_content_types() {
        let script = Builder::new()
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_IF)
            .push_slice(PushBytesBuf::try_from(b"ord".to_vec()).unwrap())
            .push_slice(PushBytesBuf::try_from(vec![1u8]).unwrap())
            .push_slice(PushBytesBuf::try_from(b"text/plain".to_vec()).unwrap())
            .push_slice(PushBytesBuf::try_from(vec![]).unwrap())
            .push_slice(PushBytesBuf::try_from(b"satoshi".to_vec()).unwrap())
            .push_opcode(OP_ENDIF)
            .into_script();

        assert!(OpnsIndexer.parse(&txo(script), &empty_tx(), 0).is_none());
    }
}
