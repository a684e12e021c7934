use std::collections::BTreeMap;
use std::str::FromStr;

use bitcoin::{
    Script,
    hashes::{Hash, sha256},
    opcodes::all::{
        OP_CHECKSIG, OP_CHECKSIGVERIFY, OP_DUP, OP_ENDIF, OP_EQUALVERIFY, OP_HASH160, OP_IF,
        OP_RETURN,
    },
    script::Instruction,
};

use crate::types::Outpoint;

/*
    Script recognition helpers shared by the protocol decoders.

    Each helper is total over arbitrary bytes: malformed scripts yield None
    rather than errors, matching the decoders' never-throw parse contract.
*/

/// MAP protocol OP_RETURN namespace address.
pub const MAP_PROTOCOL: &[u8] = b"1PuQa7K62MiKCtssSLKy1kh56WWU7MtUR5";
/// Sigma signature protocol marker.
pub const SIGMA_PROTOCOL: &[u8] = b"SIGMA";
/// OP_RETURN protocol frame separator.
pub const PROTOCOL_SEPARATOR: &[u8] = b"|";

/// Compiled prefix of the timelock contract, up to the pkh and height pushes.
pub const LOCK_PREFIX_HEX: &str =
    "2097dfd76851bf465e8f715593b217714858bbe9570ff3bd5e33840a34e20ff0262102ba79df5f8ae7604a98\
     30f03c7933028186aede0675a16f025dc4f8be8eec0382201008ce7480da41702918d1ec8e6849ba32b4d65b\
     1e40dc669c31a1e6306b266c";
/// Compiled suffix of the timelock contract, after the data pushes.
pub const LOCK_SUFFIX_HEX: &str =
    "610079040065cd1d9f690079547a75537a537a537a0079537a75527a527a7575615579014161517957795779\
     21414136d08c5ed2bf3ba048afe6dcaebafeffffffffffffffffffffffffffffff00517951796151795179970\
     79181517a75517a75618777777777777777777777ac";

/// Compiled prefix of the marketplace listing contract.
pub const ORDLOCK_PREFIX_HEX: &str =
    "2097dfd76851bf465e8f715593b217714858bbe9570ff3bd5e33840a34e20ff026210255044d4258d1b1e1ec\
     716e3f16870a1b789f607f3a83f0324253632b6271d9a55279009f69";
/// Compiled suffix of the marketplace listing contract.
pub const ORDLOCK_SUFFIX_HEX: &str =
    "615179547a75537a537a537a0079537a75527a527a7575615579008763567901c161517957795779210ac407\
     f0e4bd44bfc207355a778b046225a7068fc59ee7eda43ad905aadbffc800206c266b30e6a1319c66dc401e5b\
     d6b432ba49688eecd118297041da8074ce08105e795679615679aa0079610079517f517f517f517f517f517f\
     517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f517f\
     517f517f517f0079aa007961007982775179517958947f7551790128947f77517a75517a75618777777777777777";

/// One parsed push-or-opcode with its byte offset in the script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptToken {
    Push { offset: usize, data: Vec<u8> },
    Op { offset: usize, opcode: u8 },
}

impl ScriptToken {
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            ScriptToken::Push { data, .. } => Some(data),
            ScriptToken::Op { .. } => None,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            ScriptToken::Push { offset, .. } | ScriptToken::Op { offset, .. } => *offset,
        }
    }
}

/// Tokenize raw script bytes, tracking byte offsets. Returns what was parsed
/// up to the first malformed push.
pub fn tokenize(script: &[u8]) -> Vec<ScriptToken> {
    let mut tokens = vec![];
    let mut i = 0;

    while i < script.len() {
        let offset = i;
        let opcode = script[i];
        i += 1;

        let push_len = match opcode {
            // OP_0 pushes the empty array
            0x00 => Some(0),
            0x01..=0x4b => Some(opcode as usize),
            0x4c => {
                let Some(&len) = script.get(i) else { break };
                i += 1;
                Some(len as usize)
            }
            0x4d => {
                let Some(raw) = script.get(i..i + 2) else { break };
                i += 2;
                Some(u16::from_le_bytes([raw[0], raw[1]]) as usize)
            }
            0x4e => {
                let Some(raw) = script.get(i..i + 4) else { break };
                i += 4;
                Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
            }
            _ => None,
        };

        match push_len {
            Some(len) => {
                let Some(data) = script.get(i..i + len) else {
                    break;
                };
                i += len;

                tokens.push(ScriptToken::Push {
                    offset,
                    data: data.to_vec(),
                });
            }
            None => tokens.push(ScriptToken::Op { offset, opcode }),
        }
    }

    tokens
}

/// Pubkey hash of a standard P2PKH locking script.
pub fn p2pkh_hash(script: &Script) -> Option<[u8; 20]> {
    let mut instructions = script.instructions();

    let expect_op = |ins: Option<_>, op| match ins {
        Some(Ok(Instruction::Op(found))) if found == op => Some(()),
        _ => None,
    };

    expect_op(instructions.next(), OP_DUP)?;
    expect_op(instructions.next(), OP_HASH160)?;

    let hash = match instructions.next() {
        Some(Ok(Instruction::PushBytes(push))) if push.len() == 20 => {
            push.as_bytes().try_into().ok()?
        }
        _ => return None,
    };

    expect_op(instructions.next(), OP_EQUALVERIFY)?;
    expect_op(instructions.next(), OP_CHECKSIG)?;

    instructions.next().is_none().then_some(hash)
}

/// Cosigner template: `<pubkey> OP_CHECKSIGVERIFY` followed by a P2PKH tail.
/// Returns (pubkey hash of the primary owner, cosigner pubkey).
pub fn cosign_parts(script: &Script) -> Option<([u8; 20], Vec<u8>)> {
    let tokens = tokenize(script.as_bytes());

    match tokens.as_slice() {
        [
            ScriptToken::Push { data: pubkey, .. },
            ScriptToken::Op { opcode: a, .. },
            ScriptToken::Op { opcode: b, .. },
            ScriptToken::Op { opcode: c, .. },
            ScriptToken::Push { data: pkh, .. },
            ScriptToken::Op { opcode: d, .. },
            ScriptToken::Op { opcode: e, .. },
        ] if pubkey.len() == 33
            && pkh.len() == 20
            && *a == OP_CHECKSIGVERIFY.to_u8()
            && *b == OP_DUP.to_u8()
            && *c == OP_HASH160.to_u8()
            && *d == OP_EQUALVERIFY.to_u8()
            && *e == OP_CHECKSIG.to_u8() =>
        {
            Some((pkh.as_slice().try_into().ok()?, pubkey.clone()))
        }
        _ => None,
    }
}

/// Inscription envelope extracted from a locking script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Envelope {
    pub content_type: String,
    pub content: Vec<u8>,
    pub fields: BTreeMap<u8, Vec<u8>>,
    pub parent: Option<Outpoint>,
    /// Token index of the leading OP_FALSE.
    pub start: usize,
    /// Token index just past OP_ENDIF, for scanning trailing protocol data.
    pub end: usize,
}

impl Envelope {
    pub fn content_hash(&self) -> String {
        hex::encode(sha256::Hash::hash(&self.content).to_byte_array())
    }
}

const FIELD_CONTENT_TYPE: u8 = 1;
const FIELD_PARENT: u8 = 3;

/// Locate and decode an `OP_FALSE OP_IF "ord" ...` envelope anywhere in the
/// script.
pub fn find_envelope(script: &Script) -> Option<Envelope> {
    let tokens = tokenize(script.as_bytes());
    find_envelope_in_tokens(&tokens)
}

pub fn find_envelope_in_tokens(tokens: &[ScriptToken]) -> Option<Envelope> {
    let start = tokens.windows(3).position(|window| {
        matches!(&window[0], ScriptToken::Push { data, .. } if data.is_empty())
            && matches!(&window[1], ScriptToken::Op { opcode, .. } if *opcode == OP_IF.to_u8())
            && matches!(&window[2], ScriptToken::Push { data, .. } if data == b"ord")
    })?;

    let mut envelope = Envelope {
        start,
        ..Envelope::default()
    };
    let mut i = start + 3;
    let mut in_body = false;

    while i < tokens.len() {
        match &tokens[i] {
            ScriptToken::Op { opcode, .. } if *opcode == OP_ENDIF.to_u8() => {
                envelope.end = i + 1;
                return Some(envelope);
            }
            ScriptToken::Push { data, .. } if in_body => {
                envelope.content.extend_from_slice(data);
                i += 1;
            }
            ScriptToken::Push { data, .. } => {
                if data.is_empty() {
                    in_body = true;
                    i += 1;
                    continue;
                }

                // field tag push followed by its value push
                let tag = data[0];
                let value = tokens.get(i + 1)?.data()?.to_vec();

                match tag {
                    FIELD_CONTENT_TYPE => {
                        envelope.content_type = String::from_utf8_lossy(&value).into_owned();
                    }
                    FIELD_PARENT => {
                        envelope.parent = parse_parent_field(&value);
                    }
                    _ => {}
                }

                envelope.fields.insert(tag, value);
                i += 2;
            }
            ScriptToken::Op { .. } => return None,
        }
    }

    None
}

// serialized parent pointer: 32-byte txid (little-endian) + LE vout with
// trailing zero bytes trimmed
fn parse_parent_field(value: &[u8]) -> Option<Outpoint> {
    if value.len() < 32 || value.len() > 36 {
        return None;
    }

    let mut txid: [u8; 32] = value[..32].try_into().ok()?;
    txid.reverse();

    let mut vout_bytes = [0u8; 4];
    vout_bytes[..value.len() - 32].copy_from_slice(&value[32..]);

    Some(Outpoint {
        txid: bitcoin::Txid::from_str(&hex::encode(txid)).ok()?,
        vout: u32::from_le_bytes(vout_bytes),
    })
}

/// Split the data pushes of an OP_RETURN (or OP_FALSE OP_RETURN) script into
/// protocol frames separated by `|`. Each frame keeps its byte offset.
pub fn op_return_frames(script: &Script) -> Option<Vec<(usize, Vec<Vec<u8>>)>> {
    let tokens = tokenize(script.as_bytes());

    let ret = tokens.iter().position(
        |t| matches!(t, ScriptToken::Op { opcode, .. } if *opcode == OP_RETURN.to_u8()),
    )?;

    Some(frames_from_tokens(&tokens[ret + 1..]))
}

/// Group consecutive pushes into `|`-separated frames.
pub fn frames_from_tokens(tokens: &[ScriptToken]) -> Vec<(usize, Vec<Vec<u8>>)> {
    let mut frames = vec![];
    let mut current: Option<(usize, Vec<Vec<u8>>)> = None;

    for token in tokens {
        let Some(data) = token.data() else {
            continue;
        };

        if data == PROTOCOL_SEPARATOR {
            if let Some(frame) = current.take() {
                frames.push(frame);
            }
            continue;
        }

        match &mut current {
            Some((_, pushes)) => pushes.push(data.to_vec()),
            None => current = Some((token.offset(), vec![data.to_vec()])),
        }
    }

    if let Some(frame) = current {
        frames.push(frame);
    }

    frames
}

/// MAP protocol `SET` key/value pairs from one frame.
pub fn map_from_frame(frame: &[Vec<u8>]) -> Option<BTreeMap<String, String>> {
    if frame.first().map(Vec::as_slice) != Some(MAP_PROTOCOL)
        || frame.get(1).map(Vec::as_slice) != Some(b"SET".as_slice())
    {
        return None;
    }

    let mut map = BTreeMap::new();

    for pair in frame[2..].chunks_exact(2) {
        let key = String::from_utf8_lossy(&pair[0]).into_owned();
        let value = String::from_utf8_lossy(&pair[1]).into_owned();
        map.insert(key, value);
    }

    (!map.is_empty()).then_some(map)
}

fn strip_hex_affixes(script: &[u8], prefix_hex: &str, suffix_hex: &str) -> Option<Vec<u8>> {
    let prefix = hex::decode(prefix_hex.replace(char::is_whitespace, "")).expect("prefix hex");
    let suffix = hex::decode(suffix_hex.replace(char::is_whitespace, "")).expect("suffix hex");

    let body = script.strip_prefix(prefix.as_slice())?;
    let body = body.strip_suffix(suffix.as_slice())?;

    Some(body.to_vec())
}

/// Timelock contract data pushes: (owner pkh, until block height).
pub fn lock_parts(script: &Script) -> Option<([u8; 20], u32)> {
    let body = strip_hex_affixes(script.as_bytes(), LOCK_PREFIX_HEX, LOCK_SUFFIX_HEX)?;
    let tokens = tokenize(&body);

    match tokens.as_slice() {
        [
            ScriptToken::Push { data: pkh, .. },
            ScriptToken::Push { data: height, .. },
        ] if pkh.len() == 20 && height.len() <= 4 => {
            let mut raw = [0u8; 4];
            raw[..height.len()].copy_from_slice(height);

            Some((pkh.as_slice().try_into().ok()?, u32::from_le_bytes(raw)))
        }
        _ => None,
    }
}

/// Marketplace listing contract data pushes: (seller pkh, raw payout output).
pub fn ordlock_parts(script: &Script) -> Option<([u8; 20], Vec<u8>)> {
    let body = strip_hex_affixes(script.as_bytes(), ORDLOCK_PREFIX_HEX, ORDLOCK_SUFFIX_HEX)?;
    let tokens = tokenize(&body);

    match tokens.as_slice() {
        [
            ScriptToken::Push { data: pkh, .. },
            ScriptToken::Push { data: payout, .. },
        ] if pkh.len() == 20 => Some((pkh.as_slice().try_into().ok()?, payout.clone())),
        _ => None,
    }
}

/// Whether a listing unlock selects the purchase branch (trailing OP_1) as
/// opposed to a seller cancel (trailing OP_0).
pub fn is_purchase_unlock(script_sig: &Script) -> bool {
    let tokens = tokenize(script_sig.as_bytes());

    matches!(
        tokens.last(),
        Some(ScriptToken::Op { opcode, .. }) if *opcode == bitcoin::opcodes::OP_TRUE.to_u8()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::script::{Builder, PushBytesBuf};

    fn push(builder: Builder, data: &[u8]) -> Builder {
        builder.push_slice(PushBytesBuf::try_from(data.to_vec()).unwrap())
    }

    fn p2pkh(pkh: [u8; 20]) -> Builder {
        push(
            Builder::new().push_opcode(OP_DUP).push_opcode(OP_HASH160),
            &pkh,
        )
        .push_opcode(OP_EQUALVERIFY)
        .push_opcode(OP_CHECKSIG)
    }

    #[test]
    fn recognises_p2pkh() {
        let script = p2pkh([7u8; 20]).into_script();
        assert_eq!(p2pkh_hash(&script), Some([7u8; 20]));

        let not_p2pkh = Builder::new().push_opcode(OP_DUP).into_script();
        assert_eq!(p2pkh_hash(&not_p2pkh), None);
    }

    #[test]
    fn tokenizer_reports_offsets() {
        let script = p2pkh([1u8; 20]).into_script();
        let tokens = tokenize(script.as_bytes());

        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0].offset(), 0);
        assert_eq!(tokens[2].data().map(<[u8]>::len), Some(20));
    }

    #[test]
    fn extracts_inscription_envelope() {
        let mut builder = p2pkh([2u8; 20])
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_IF);
        builder = push(builder, b"ord");
        builder = push(builder, &[FIELD_CONTENT_TYPE]);
        builder = push(builder, b"text/plain");
        builder = push(builder, &[]);
        builder = push(builder, b"hello world");
        let script = builder.push_opcode(OP_ENDIF).into_script();

        let envelope = find_envelope(&script).unwrap();
        assert_eq!(envelope.content_type, "text/plain");
        assert_eq!(envelope.content, b"hello world");
    }

    #[test]
    fn splits_op_return_frames() {
        let mut builder = Builder::new()
            .push_opcode(bitcoin::opcodes::OP_FALSE)
            .push_opcode(OP_RETURN);
        builder = push(builder, MAP_PROTOCOL);
        builder = push(builder, b"SET");
        builder = push(builder, b"name");
        builder = push(builder, b"foo");
        builder = push(builder, PROTOCOL_SEPARATOR);
        builder = push(builder, SIGMA_PROTOCOL);
        builder = push(builder, b"BSM");
        let script = builder.into_script();

        let frames = op_return_frames(&script).unwrap();
        assert_eq!(frames.len(), 2);

        let map = map_from_frame(&frames[0].1).unwrap();
        assert_eq!(map.get("name").map(String::as_str), Some("foo"));

        assert_eq!(frames[1].1[0], SIGMA_PROTOCOL);
    }

    #[test]
    fn parent_field_round_trip() {
        let mut value = vec![0xab; 32];
        value.push(0x01);

        let parent = parse_parent_field(&value).unwrap();
        assert_eq!(parent.vout, 1);
    }
}
