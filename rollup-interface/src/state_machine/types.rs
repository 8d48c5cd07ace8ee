//! Primitive identifiers shared by every rollup component.
use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A 32-byte digest. Used for state roots, Merkle nodes and content hashes.
pub type Hash = [u8; 32];

/// The all-zero digest. Denotes an empty Merkle leaf, and "unchanged" in evaluator outputs.
pub const ZERO_HASH: Hash = [0; 32];

/// Identifier of an account leaf in the account tree. Ids start at 1.
pub type AccountId = u32;
/// Identifier of a registered asset. `0` means unregistered.
pub type AssetId = u32;
/// Identifier of a strategy leaf in the strategy tree. Ids start at 1.
pub type StrategyId = u32;
/// Identifier of a staking pool leaf in the staking-pool tree. Ids start at 1.
pub type PoolId = u32;
/// Identifier of one aggregate-order batch of a strategy. Ids start at 1.
pub type AggregateId = u64;

/// A 20-byte base-ledger address, rendered as `0x`-prefixed hex.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address. Used as the depositor of reward deposits.
    pub const ZERO: Address = Address([0; 20]);

    /// Returns true for the zero address.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Error returned when parsing an [`Address`] from a string fails.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AddressParseError {
    /// The input is not valid hex.
    #[error("invalid hex in address: {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// The input does not decode to exactly 20 bytes.
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s))?;
        let bytes: [u8; 20] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressParseError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_round_trip() {
        let address = Address([0xab; 20]);
        let rendered = address.to_string();
        assert_eq!(rendered, format!("0x{}", "ab".repeat(20)));
        assert_eq!(rendered.parse::<Address>().unwrap(), address);

        let json = serde_json::to_string(&address).unwrap();
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), address);
    }

    #[test]
    fn address_rejects_wrong_length() {
        assert_eq!(
            "0x0102".parse::<Address>(),
            Err(AddressParseError::InvalidLength(2))
        );
    }

    #[test]
    fn address_rejects_bad_hex() {
        assert!(matches!(
            "0xzz".parse::<Address>(),
            Err(AddressParseError::InvalidHex(_))
        ));
        let err = serde_json::from_str::<Address>("\"0x0102\"").unwrap_err();
        assert!(err.to_string().contains("address must be 20 bytes, got 2"));
    }
}
