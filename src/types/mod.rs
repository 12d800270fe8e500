#![forbid(unsafe_code)]
//! Identifiers, constants and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Length in bytes of a device identifier.
pub const DEVICE_ID_LEN: usize = 32;

/// A 32-byte replica identifier.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Serialize, Deserialize)]
pub struct DeviceId(pub [u8; DEVICE_ID_LEN]);

/// The reserved identifier of the replica this database belongs to.
pub const LOCAL_DEVICE_ID: DeviceId = DeviceId([0xff; DEVICE_ID_LEN]);

/// Pseudo-device used by the metadata tracker to account the global state.
pub const GLOBAL_DEVICE_ID: DeviceId = DeviceId([0xf8; DEVICE_ID_LEN]);

/// Abbreviated device identifier used inside version vectors.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct ShortId(pub u64);

impl DeviceId {
    /// Builds an identifier from a byte slice, rejecting slices of the wrong length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; DEVICE_ID_LEN] = bytes
            .try_into()
            .map_err(|_| DbError::Invalid("device id must be 32 bytes"))?;
        Ok(DeviceId(arr))
    }

    /// Test and fixture helper: an identifier whose first byte is `b`.
    pub const fn with_first_byte(b: u8) -> Self {
        let mut id = [0u8; DEVICE_ID_LEN];
        id[0] = b;
        DeviceId(id)
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_ID_LEN] {
        &self.0
    }

    /// The first eight bytes interpreted as a big-endian integer.
    pub fn short(&self) -> ShortId {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        ShortId(u64::from_be_bytes(head))
    }

    /// Whether this is [`LOCAL_DEVICE_ID`].
    pub fn is_local(&self) -> bool {
        *self == LOCAL_DEVICE_ID
    }

    /// Parses the form produced by `Display` (`local` or 64 hex digits).
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "local" {
            return Ok(LOCAL_DEVICE_ID);
        }
        let raw = hex::decode(s).map_err(|_| DbError::Invalid("device id is not hex"))?;
        Self::from_bytes(&raw)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            return f.write_str("local");
        }
        if *self == GLOBAL_DEVICE_ID {
            return f.write_str("global");
        }
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() || *self == GLOBAL_DEVICE_ID {
            return write!(f, "DeviceId({self})");
        }
        write!(f, "DeviceId({}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for ShortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Errors surfaced by the database.
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    /// A key the caller required was absent.
    #[error("{0} not found")]
    NotFound(&'static str),
    /// The storage backend failed; the surrounding transaction is discarded.
    #[error("backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Filesystem failure outside the backend.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// The database was written by a newer, incompatible schema.
    #[error(
        "database schema version {stored} is newer than the supported version {supported}; \
         software version {min_version} or later is required"
    )]
    Downgrade {
        /// Schema version found in the database.
        stored: i64,
        /// Highest schema version this build understands.
        supported: i64,
        /// Minimum compatible software version recorded with the stored schema.
        min_version: String,
    },
    /// A stored value could not be decoded.
    #[error("corruption: {0}")]
    Corruption(String),
    /// The caller passed an argument the database cannot accept.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Configuration could not be parsed.
    #[error("config: {0}")]
    Config(String),
    /// JSON encoding or decoding failed.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Wraps any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DbError::Backend(Box::new(err))
    }

    /// Whether the error is a [`DbError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DbError>;
