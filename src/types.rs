use std::{fmt, str::FromStr};

use bitcoin::{
    Txid,
    hashes::{Hash, hash160},
};

use crate::error::Error;

/// Base58check P2PKH address string, the spender identity decoders recognise.
pub type Address = String;

/// One output of one transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Outpoint {
    pub txid: Txid,
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Big-endian txid bytes (display order) followed by a big-endian vout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut txid = self.txid.to_byte_array();
        txid.reverse();

        let mut out = Vec::with_capacity(36);
        out.extend_from_slice(&txid);
        out.extend_from_slice(&self.vout.to_be_bytes());
        out
    }

    pub fn txid_hex(&self) -> String {
        self.txid.to_string()
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.txid, self.vout)
    }
}

impl FromStr for Outpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let malformed = || Error::MalformedOutpoint(s.to_string());

        let (txid_part, vout_part) = s.split_once('_').ok_or_else(malformed)?;

        if txid_part.len() != 64
            || !txid_part
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(malformed());
        }

        if vout_part.is_empty() || !vout_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        let txid = Txid::from_str(txid_part).map_err(|_| malformed())?;
        let vout: u32 = vout_part.parse().map_err(|_| malformed())?;

        Ok(Self { txid, vout })
    }
}

impl From<bitcoin::OutPoint> for Outpoint {
    fn from(outpoint: bitcoin::OutPoint) -> Self {
        Self {
            txid: outpoint.txid,
            vout: outpoint.vout,
        }
    }
}

const P2PKH_VERSION: u8 = 0x00;

/// Base58check address for a 20-byte pubkey hash.
pub fn address_from_pkh(pkh: &[u8; 20]) -> Address {
    let payload = [&[P2PKH_VERSION][..], pkh.as_slice()].concat();
    bitcoin::base58::encode_check(&payload)
}

/// Base58check address for a serialized public key.
pub fn address_from_pubkey(pubkey: &[u8]) -> Address {
    let pkh = hash160::Hash::hash(pubkey);
    address_from_pkh(&pkh.to_byte_array())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TXID: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn outpoint_round_trips_through_string_form() {
        let parsed: Outpoint = format!("{TXID}_5").parse().unwrap();
        assert_eq!(parsed.vout, 5);
        assert_eq!(parsed.to_string(), format!("{TXID}_5"));
    }

    #[test]
    fn outpoint_rejects_malformed_input() {
        let cases = [
            String::new(),
            "abc".to_string(),
            TXID[..63].to_string(),
            format!("{}_0", &TXID[..63]),
            format!("{TXID}-0"),
            format!("{TXID}_"),
            format!("{TXID}_x"),
            format!("{}_0", TXID.to_uppercase()),
        ];

        for bad in cases {
            assert!(
                bad.parse::<Outpoint>().is_err(),
                "expected rejection: {bad:?}"
            );
        }
    }

    #[test]
    fn outpoint_bytes_are_display_order() {
        let outpoint: Outpoint = format!("{TXID}_1").parse().unwrap();
        let bytes = outpoint.to_bytes();

        assert_eq!(bytes.len(), 36);
        assert_eq!(hex::encode(&bytes[..32]), TXID);
        assert_eq!(&bytes[32..], &[0, 0, 0, 1]);
    }
}
