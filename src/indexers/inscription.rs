use std::collections::BTreeMap;

use bitcoin::Transaction;

use crate::types::{Address, Outpoint, address_from_pkh};

use super::{
    Indexer, ParseResult, Txo,
    map::MapData,
    script::{self, ScriptToken},
    types::{IndexData, IndexPayload},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct File {
    /// sha256 of the content, hex.
    pub hash: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InscriptionData {
    pub file: File,
    pub content: Vec<u8>,
    pub fields: BTreeMap<u8, Vec<u8>>,
    pub parent: Option<Outpoint>,
}

/// Ordinal inscription envelope inside a 1-satoshi output.
///
/// Also eagerly parses MAP data trailing the envelope and writes it under
/// the `map` tag on the same output; that side write is part of this
/// decoder's contract.
pub struct InscriptionIndexer;

impl Indexer for InscriptionIndexer {
    fn tag(&self) -> &'static str {
        "insc"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        if txo.satoshis != 1 {
            return None;
        }

        let tokens = script::tokenize(txo.script.as_bytes());
        let envelope = script::find_envelope_in_tokens(&tokens)?;

        let data = InscriptionData {
            file: File {
                hash: envelope.content_hash(),
                size: envelope.content.len() as u64,
                content_type: envelope.content_type.clone(),
            },
            content: envelope.content.clone(),
            fields: envelope.fields.clone(),
            parent: envelope.parent,
        };

        let mut result = ParseResult::new(IndexPayload::Inscription(Box::new(data)));

        if let Some(owner) = owner_from_affixes(&tokens, envelope.start, envelope.end) {
            result.owner = Some(owner);
        }

        // MAP data in the same script is stored under the map decoder's slot
        if let Some(map) = trailing_map(&tokens[envelope.end..]) {
            result
                .sidecar
                .push(("map", IndexData::new(IndexPayload::Map(MapData { data: map }))));
        }

        Some(result)
    }
}

/// A recognisable P2PKH template directly before or after the envelope names
/// the spender.
fn owner_from_affixes(tokens: &[ScriptToken], start: usize, end: usize) -> Option<Address> {
    p2pkh_in_tokens(&tokens[..start]).or_else(|| p2pkh_in_tokens(&tokens[end..]))
}

fn p2pkh_in_tokens(tokens: &[ScriptToken]) -> Option<Address> {
    use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DUP, OP_EQUALVERIFY, OP_HASH160};

    tokens.windows(5).find_map(|window| match window {
        [
            ScriptToken::Op { opcode: a, .. },
            ScriptToken::Op { opcode: b, .. },
            ScriptToken::Push { data: pkh, .. },
            ScriptToken::Op { opcode: c, .. },
            ScriptToken::Op { opcode: d, .. },
        ] if *a == OP_DUP.to_u8()
            && *b == OP_HASH160.to_u8()
            && pkh.len() == 20
            && *c == OP_EQUALVERIFY.to_u8()
            && *d == OP_CHECKSIG.to_u8() =>
        {
            let pkh: [u8; 20] = pkh.as_slice().try_into().ok()?;
            Some(address_from_pkh(&pkh))
        }
        _ => None,
    })
}

fn trailing_map(tokens: &[ScriptToken]) -> Option<BTreeMap<String, String>> {
    use bitcoin::opcodes::all::OP_RETURN;

    // MAP data typically sits in an OP_RETURN section after the envelope
    let start = tokens
        .iter()
        .position(|t| matches!(t, ScriptToken::Op { opcode, .. } if *opcode == OP_RETURN.to_u8()))
        .map(|i| i + 1)
        .unwrap_or(0);

    script::frames_from_tokens(&tokens[start..])
        .iter()
        .find_map(|(_, frame)| script::map_from_frame(frame))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::{
        ScriptBuf,
        hashes::{Hash, sha256},
        opcodes::all::{OP_ENDIF, OP_IF, OP_RETURN},
        script::{Builder, PushBytesBuf},
    };

    use super::*;

    fn push(builder: Builder, data: &[u8]) -> Builder {
        builder.push_slice(PushBytesBuf::try_from(data.to_vec()).unwrap())
    }

    fn inscription_script(pkh: [u8; 20], content_type: &str, content: &[u8]) -> Builder {
        let builder = Builder::new()
            .push_opcode(bitcoin::opcodes::all::OP_DUP)
            .push_opcode(bitcoin::opcodes::all::OP_HASH160);
        let builder = push(builder, &pkh)
            .push_opcode(bitcoin::opcodes::all::OP_EQUALVERIFY)
            .push_opcode(bitcoin::opcodes::all::OP_CHECKSIG)
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_IF);
        let builder = push(builder, b"ord");
        let builder = push(builder, &[1u8]);
        let builder = push(builder, content_type.as_bytes());
        let builder = push(builder, &[]);
        push(builder, content).push_opcode(OP_ENDIF)
    }

    fn txo(script: ScriptBuf) -> Txo {
        let outpoint = Outpoint::from_str(&format!("{}_0", "66".repeat(32))).unwrap();
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
    fn extracts_file_and_owner() {
        let pkh = [8u8; 20];
        let script = inscription_script(pkh, "text/plain", b"hello").into_script();

        let result = InscriptionIndexer.parse(&txo(script), &empty_tx(), 0).unwrap();

        assert_eq!(result.owner, Some(address_from_pkh(&pkh)));
        assert!(result.basket.is_none());

        let IndexPayload::Inscription(data) = result.payload else {
            panic!("expected inscription payload");
        };

        assert_eq!(data.file.content_type, "text/plain");
        assert_eq!(data.file.size, 5);
        assert_eq!(
            data.file.hash,
            hex::encode(sha256::Hash::hash(b"hello").to_byte_array())
        );
    }

    #[test]
    fn writes_trailing_map_into_sidecar() {
        let mut builder = inscription_script([8u8; 20], "text/plain", b"hi")
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_RETURN);
        builder = push(builder, script::MAP_PROTOCOL);
        builder = push(builder, b"SET");
        builder = push(builder, b"name");
        builder = push(builder, b"foo");

        let result = InscriptionIndexer
            .parse(&txo(builder.into_script()), &empty_tx(), 0)
            .unwrap();

        assert_eq!(result.sidecar.len(), 1);
        assert_eq!(result.sidecar[0].0, "map");

        let IndexPayload::Map(map) = &result.sidecar[0].1.data else {
            panic!("expected map sidecar");
        };
        assert_eq!(map.data.get("name").map(String::as_str), Some("foo"));
    }

    #[test]
    fn requires_one_satoshi() {
        let script = inscription_script([8u8; 20], "text/plain", b"x").into_script();
        let mut txo = txo(script);
        txo.satoshis = 2;

        assert!(InscriptionIndexer.parse(&txo, &empty_tx(), 0).is_none());
    }
}
