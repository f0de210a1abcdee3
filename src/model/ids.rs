// Identifiers - Ledger-assigned ids, addresses, transaction hashes and stamps

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Block height on the ledger
pub type BlockNumber = u64;

/// Errors from parsing identifiers
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdError {
    #[error("Address must start with 0x: {0}")]
    MissingPrefix(String),

    #[error("Address contains non-hex characters: {0}")]
    InvalidHex(String),

    #[error("Transaction hash must be 32 bytes of hex")]
    InvalidTxHash,
}

// ============================================================================
// ENTITY IDS
// ============================================================================

macro_rules! ledger_id {
    ($name:ident, $label:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

ledger_id!(TaskId, "task");
ledger_id!(RewardId, "reward");
ledger_id!(AppealId, "appeal");

/// The kinds of record kept in the mirror
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Task,
    Reward,
    Exchange,
    Appeal,
    PointsHistory,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Reward => "reward",
            Self::Exchange => "exchange",
            Self::Appeal => "appeal",
            Self::PointsHistory => "points",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================================================
// ADDRESS
// ============================================================================

/// A ledger account address, normalized to lowercase `0x` hex
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Parse and normalize an address
    pub fn parse(s: &str) -> Result<Self, IdError> {
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| IdError::MissingPrefix(s.to_string()))?;

        if body.is_empty() || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdError::InvalidHex(s.to_string()));
        }

        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    /// Generate a random 20-byte address
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// TRANSACTION HASH
// ============================================================================

/// Hash of a ledger transaction
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a `0x`-prefixed (or bare) 64 character hex string
    pub fn from_hex(s: &str) -> Result<Self, IdError> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(body).map_err(|_| IdError::InvalidTxHash)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| IdError::InvalidTxHash)?;
        Ok(Self(arr))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash(0x{}..)", hex::encode(&self.0[..6]))
    }
}

// ============================================================================
// LEDGER STAMP
// ============================================================================

/// Where on the ledger a piece of state came from.
///
/// Every mirror record carries the stamp of the event that last changed it.
/// Stamps compare by `(block_number, log_index)`, which is receipt order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerStamp {
    pub tx_hash: TxHash,
    pub block_number: BlockNumber,
    pub log_index: u32,
    /// Block timestamp in seconds
    pub timestamp: u64,
}

impl LedgerStamp {
    pub fn position(&self) -> (BlockNumber, u32) {
        (self.block_number, self.log_index)
    }

    /// True if this stamp is strictly later on the ledger than `other`
    pub fn is_after(&self, other: &LedgerStamp) -> bool {
        self.position() > other.position()
    }
}

// ============================================================================
// RECORD ID
// ============================================================================

/// Collision-free id for append-only mirror rows.
///
/// Derived from the kind, transaction hash and log index of the event that
/// produced the row, so concurrent writers can never pick the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId([u8; 32]);

impl RecordId {
    pub fn derive(kind: EntityKind, stamp: &LedgerStamp) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"mirror-record:");
        hasher.update(kind.as_str().as_bytes());
        hasher.update(stamp.tx_hash.as_bytes());
        hasher.update(stamp.log_index.to_be_bytes());
        let result = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&result);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self)
    }
}

/// An append-only row paired with its display sequence number.
///
/// The sequence is the row's zero-based position among rows sharing the same
/// key (reward or user), recomputed on every read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequenced<T> {
    pub sequence: u64,
    pub record: T,
}
