use async_trait::async_trait;
use base64::Engine;
use bitcoin::{
    Transaction,
    hashes::{Hash, HashEngine, sha256, sha256d},
    secp256k1::{
        Message, Secp256k1,
        ecdsa::{RecoverableSignature, RecoveryId},
    },
};
use tracing::debug;

use crate::{
    client::IndexerApi,
    error::Error,
    types::{Address, address_from_pubkey},
};

use super::{Indexer, ParseContext, ParseResult, Txo, script, types::IndexPayload};

/// One signature record extracted from a sigma protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigmaRecord {
    pub algorithm: String,
    pub address: Address,
    pub signature: Vec<u8>,
    /// Input whose outpoint is covered by the signature.
    pub vin: u32,
    /// Established during summarize; `parse` always records `false`.
    pub valid: bool,
    /// Byte offset of the frame within the locking script; the signed
    /// message covers the script up to here.
    pub script_offset: usize,
}

/// Signature frames in OP_RETURN data: `SIGMA <algorithm> <address>
/// <signature> <vin>`.
pub struct SigmaIndexer;

#[async_trait]
impl Indexer for SigmaIndexer {
    fn tag(&self) -> &'static str {
        "sigma"
    }

    fn parse(&self, txo: &Txo, _tx: &Transaction, _vout: usize) -> Option<ParseResult> {
        let frames = script::op_return_frames(&txo.script)?;

        let records: Vec<SigmaRecord> = frames
            .iter()
            .filter_map(|(offset, frame)| parse_frame(*offset, frame))
            .collect();

        if records.is_empty() {
            return None;
        }

        Some(ParseResult::new(IndexPayload::Sigma(records)))
    }

    /// Validity is established here: the signed message is reconstructed from
    /// the indicated input's outpoint plus the output script prefix up to the
    /// sigma frame, and the compact signature is recovered over all four
    /// recovery ids.
    async fn summarize(
        &self,
        ctx: &mut ParseContext,
        _api: &dyn IndexerApi,
        _is_broadcast: bool,
    ) -> Result<Option<crate::indexers::IndexSummary>, Error> {
        let spends: Vec<_> = ctx.spends.iter().map(|s| s.outpoint).collect();

        for txo in &mut ctx.txos {
            let script = txo.script.clone();

            let Some(entry) = txo.data.get_mut(self.tag()) else {
                continue;
            };
            let IndexPayload::Sigma(records) = &mut entry.data else {
                continue;
            };

            for record in records {
                let Some(outpoint) = spends.get(record.vin as usize) else {
                    continue;
                };

                let digest = signed_digest(&outpoint.to_bytes(), &script.as_bytes()[..record.script_offset]);

                record.valid = recovers_to_address(&digest, &record.signature, &record.address);

                if !record.valid {
                    debug!(address = %record.address, "sigma signature did not verify");
                }
            }
        }

        Ok(None)
    }
}

fn parse_frame(offset: usize, frame: &[Vec<u8>]) -> Option<SigmaRecord> {
    if frame.first().map(Vec::as_slice) != Some(script::SIGMA_PROTOCOL) || frame.len() < 5 {
        return None;
    }

    let algorithm = String::from_utf8(frame[1].clone()).ok()?;
    let address = String::from_utf8(frame[2].clone()).ok()?;

    // signatures travel base64-encoded; accept raw compact bytes too
    let signature = match base64::engine::general_purpose::STANDARD.decode(&frame[3]) {
        Ok(decoded) => decoded,
        Err(_) => frame[3].clone(),
    };

    let vin: u32 = String::from_utf8(frame[4].clone()).ok()?.parse().ok()?;

    Some(SigmaRecord {
        algorithm,
        address,
        signature,
        vin,
        valid: false,
        script_offset: offset,
    })
}

/// Signed-message digest over sha256(outpoint) + sha256(script prefix).
fn signed_digest(outpoint: &[u8], script_prefix: &[u8]) -> [u8; 32] {
    let input_hash = sha256::Hash::hash(outpoint);
    let data_hash = sha256::Hash::hash(script_prefix);

    let mut message = Vec::with_capacity(64);
    message.extend_from_slice(input_hash.as_byte_array());
    message.extend_from_slice(data_hash.as_byte_array());

    bsm_hash(&message)
}

// Bitcoin Signed Message magic hash over raw bytes
fn bsm_hash(message: &[u8]) -> [u8; 32] {
    const MAGIC: &[u8] = b"\x18Bitcoin Signed Message:\n";

    let mut engine = sha256d::Hash::engine();
    engine.input(MAGIC);
    engine.input(&compact_size(message.len() as u64));
    engine.input(message);

    sha256d::Hash::from_engine(engine).to_byte_array()
}

fn compact_size(value: u64) -> Vec<u8> {
    match value {
        0..=0xfc => vec![value as u8],
        0xfd..=0xffff => [vec![0xfd], (value as u16).to_le_bytes().to_vec()].concat(),
        0x10000..=0xffff_ffff => [vec![0xfe], (value as u32).to_le_bytes().to_vec()].concat(),
        _ => [vec![0xff], value.to_le_bytes().to_vec()].concat(),
    }
}

/// Try every recovery id over the compact signature; valid when any recovered
/// key hashes to the claimed address.
fn recovers_to_address(digest: &[u8; 32], signature: &[u8], address: &str) -> bool {
    // 65-byte signatures carry a header byte; the recovery id inside is
    // untrusted, so all four are tried either way
    let compact: &[u8] = match signature.len() {
        65 => &signature[1..],
        64 => signature,
        _ => return false,
    };

    let secp = Secp256k1::verification_only();
    let Ok(message) = Message::from_digest_slice(digest) else {
        return false;
    };

    for rec_id in 0..4 {
        let Ok(rec_id) = RecoveryId::from_i32(rec_id) else {
            continue;
        };

        let Ok(signature) = RecoverableSignature::from_compact(compact, rec_id) else {
            continue;
        };

        if let Ok(pubkey) = secp.recover_ecdsa(&message, &signature) {
            if address_from_pubkey(&pubkey.serialize()) == address {
                return true;
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bitcoin::{
        ScriptBuf,
        opcodes::all::OP_RETURN,
        script::{Builder, PushBytesBuf},
        secp256k1::SecretKey,
    };

    use crate::types::Outpoint;

    use super::*;

    fn push(builder: Builder, data: &[u8]) -> Builder {
        builder.push_slice(PushBytesBuf::try_from(data.to_vec()).unwrap())
    }

    fn sigma_script(address: &str, signature: &[u8], vin: u32) -> ScriptBuf {
        let mut builder = Builder::new()
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_RETURN);
        builder = push(builder, script::SIGMA_PROTOCOL);
        builder = push(builder, b"BSM");
        builder = push(builder, address.as_bytes());
        builder = push(
            builder,
            base64::engine::general_purpose::STANDARD
                .encode(signature)
                .as_bytes(),
        );
        builder = push(builder, vin.to_string().as_bytes());
        builder.into_script()
    }

    #[test]
    fn parses_sigma_frame() {
        let script = sigma_script("1BitcoinEaterAddressDontSendf59kuE", &[1u8; 65], 0);

        let outpoint = Outpoint::from_str(&format!("{}_0", "77".repeat(32))).unwrap();
        let txo = Txo::new(outpoint, 0, script);

        let tx = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![],
        };

        let result = SigmaIndexer.parse(&txo, &tx, 0).unwrap();

        let IndexPayload::Sigma(records) = result.payload else {
            panic!("expected sigma payload");
        };

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vin, 0);
        assert!(!records[0].valid);
        assert_eq!(records[0].signature.len(), 65);
    }

    #[test]
    fn signature_recovery_round_trip() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[0x42; 32]).unwrap();
        let pubkey = secret.public_key(&secp);
        let address = address_from_pubkey(&pubkey.serialize());

        let digest = signed_digest(&[0xaa; 36], b"prefix");
        let message = Message::from_digest_slice(&digest).unwrap();

        let signature = secp.sign_ecdsa_recoverable(&message, &secret);
        let (rec_id, compact) = signature.serialize_compact();

        // header byte as emitted by BSM signers
        let mut wire = vec![27 + rec_id.to_i32() as u8];
        wire.extend_from_slice(&compact);

        assert!(recovers_to_address(&digest, &wire, &address));
        assert!(!recovers_to_address(&digest, &wire, "1BitcoinEaterAddressDontSendf59kuE"));
    }
}
