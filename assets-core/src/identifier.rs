//! Canonical identifiers and composite storage keys
//!
//! Stakers and assets are scoped to the chain they originate from:
//!
//! ```text
//! 0x<lowercase hex address>_0x<lowercase hex chain id>
//! ```
//!
//! The same raw address on two chains yields two distinct ids. Ids are hex-only,
//! so neither `_` nor the key separator `/` can appear inside an encoded part.

use crate::error::{Error, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between the parts of a composite storage key
pub const KEY_SEPARATOR: char = '/';

/// Separator between address and chain id inside a chain-scoped id
pub const ID_SEPARATOR: char = '_';

/// Byte length of an operator address on the ledger chain
pub const OPERATOR_ADDRESS_LENGTH: usize = 20;

/// Chain-native address bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(Vec<u8>);

impl Address {
    /// Wrap raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse hex, with or without `0x`, any case
    pub fn from_hex(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        hex::decode(digits)
            .map(Self)
            .map_err(|e| Error::InvalidInput(format!("invalid hex address {}: {}", s, e)))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty address
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keep the first `len` bytes of a padded payload
    pub fn truncated(&self, len: usize) -> Result<Self> {
        if self.0.len() < len {
            return Err(Error::InvalidInput(format!(
                "address {} shorter than {} bytes",
                self, len
            )));
        }
        Ok(Self(self.0[..len].to_vec()))
    }

    /// Lowercase `0x`-prefixed hex
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Address scoped to its originating client chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainScopedId {
    address: Address,
    chain_id: u64,
}

/// Depositor identity
pub type StakerId = ChainScopedId;

/// Bridged asset identity
pub type AssetId = ChainScopedId;

/// Derive the canonical id for an address on a chain
pub fn derive_id(chain_id: u64, address: &[u8]) -> ChainScopedId {
    ChainScopedId {
        address: Address::new(address),
        chain_id,
    }
}

impl ChainScopedId {
    /// Address part
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Chain id part
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

impl fmt::Display for ChainScopedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}0x{:x}", self.address, ID_SEPARATOR, self.chain_id)
    }
}

impl FromStr for ChainScopedId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (address, chain) = s
            .rsplit_once(ID_SEPARATOR)
            .ok_or_else(|| Error::MalformedKey(format!("missing chain id in {}", s)))?;

        let address = decode_canonical_hex(address)?;

        let digits = chain
            .strip_prefix("0x")
            .ok_or_else(|| Error::MalformedKey(format!("chain id {} lacks 0x prefix", chain)))?;
        let chain_id = u64::from_str_radix(digits, 16)
            .map_err(|e| Error::MalformedKey(format!("chain id {}: {}", chain, e)))?;
        if format!("{:x}", chain_id) != digits {
            return Err(Error::MalformedKey(format!("non-canonical chain id {}", chain)));
        }

        Ok(Self {
            address: Address(address),
            chain_id,
        })
    }
}

/// Operator account on the ledger chain
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(Address);

impl OperatorId {
    /// Validate a 20-byte operator address
    pub fn new(address: Address) -> Result<Self> {
        if address.len() != OPERATOR_ADDRESS_LENGTH {
            return Err(Error::InvalidInput(format!(
                "operator address {} must be {} bytes",
                address, OPERATOR_ADDRESS_LENGTH
            )));
        }
        Ok(Self(address))
    }

    /// Underlying address
    pub fn address(&self) -> &Address {
        &self.0
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for OperatorId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_canonical_hex(s)?;
        if bytes.len() != OPERATOR_ADDRESS_LENGTH {
            return Err(Error::MalformedKey(format!(
                "operator {} must be {} bytes",
                s, OPERATOR_ADDRESS_LENGTH
            )));
        }
        Ok(Self(Address(bytes)))
    }
}

macro_rules! serde_via_str {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

serde_via_str!(ChainScopedId);
serde_via_str!(OperatorId);

/// Lowercase, `0x`-prefixed, non-empty, even-length hex
fn decode_canonical_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| Error::MalformedKey(format!("{} lacks 0x prefix", s)))?;
    if digits.is_empty() || digits.bytes().any(|b| b.is_ascii_uppercase()) {
        return Err(Error::MalformedKey(format!("non-canonical hex {}", s)));
    }
    hex::decode(digits).map_err(|e| Error::MalformedKey(format!("{}: {}", s, e)))
}

/// Join key parts with [`KEY_SEPARATOR`]
pub fn join_key(parts: &[&str]) -> Result<Vec<u8>> {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || part.contains(KEY_SEPARATOR) {
            return Err(Error::MalformedKey(format!("invalid key part {:?}", part)));
        }
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(part);
    }
    Ok(key.into_bytes())
}

/// Split a joined key, requiring exactly `expected` parts
pub fn parse_join_key(key: &[u8], expected: usize) -> Result<Vec<String>> {
    let key = std::str::from_utf8(key)
        .map_err(|e| Error::MalformedKey(format!("key is not utf-8: {}", e)))?;
    let parts: Vec<String> = key.split(KEY_SEPARATOR).map(str::to_owned).collect();
    if parts.len() != expected {
        return Err(Error::MalformedKey(format!(
            "expected {} parts, got {} in {}",
            expected,
            parts.len(),
            key
        )));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_format() {
        let id = derive_id(101, &[0xAB, 0xCD]);
        assert_eq!(id.to_string(), "0xabcd_0x65");
        assert_eq!(id.chain_id(), 101);
    }

    #[test]
    fn test_same_address_distinct_chains() {
        let a = derive_id(1, &[0x11; 20]);
        let b = derive_id(2, &[0x11; 20]);
        assert_ne!(a, b);
        assert_ne!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_parse_canonical_id() {
        let id: ChainScopedId = "0xabcd_0x65".parse().unwrap();
        assert_eq!(id, derive_id(101, &[0xab, 0xcd]));
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        assert!(matches!("0xABCD_0x65".parse::<ChainScopedId>(), Err(Error::MalformedKey(_))));
        assert!(matches!("0xabcd_0x065".parse::<ChainScopedId>(), Err(Error::MalformedKey(_))));
        assert!(matches!("abcd_0x65".parse::<ChainScopedId>(), Err(Error::MalformedKey(_))));
        assert!(matches!("0xabcd".parse::<ChainScopedId>(), Err(Error::MalformedKey(_))));
        assert!(matches!("0x_0x65".parse::<ChainScopedId>(), Err(Error::MalformedKey(_))));
    }

    #[test]
    fn test_operator_id_length() {
        let ok = format!("0x{}", "aa".repeat(20));
        assert!(ok.parse::<OperatorId>().is_ok());
        let short = format!("0x{}", "aa".repeat(19));
        assert!(short.parse::<OperatorId>().is_err());
    }

    #[test]
    fn test_join_and_parse_key() {
        let key = join_key(&["0xaa_0x1", "0xbb_0x1"]).unwrap();
        assert_eq!(key, b"0xaa_0x1/0xbb_0x1".to_vec());

        let parts = parse_join_key(&key, 2).unwrap();
        assert_eq!(parts, vec!["0xaa_0x1", "0xbb_0x1"]);

        assert!(matches!(parse_join_key(&key, 3), Err(Error::MalformedKey(_))));
    }

    #[test]
    fn test_join_key_rejects_separator() {
        assert!(matches!(join_key(&["a/b", "c"]), Err(Error::MalformedKey(_))));
        assert!(matches!(join_key(&["", "c"]), Err(Error::MalformedKey(_))));
    }

    #[test]
    fn test_address_truncation() {
        let padded = Address::new(vec![0x22; 32]);
        assert_eq!(padded.truncated(20).unwrap().len(), 20);
        assert!(padded.truncated(33).is_err());
    }

    #[test]
    fn test_address_serde_hex() {
        let addr = Address::new(vec![0xde, 0xad]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0xdead\"");
        let back: Address = serde_json::from_str("\"0xDEAD\"").unwrap();
        assert_eq!(back, addr);
    }
}
