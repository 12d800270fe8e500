#![forbid(unsafe_code)]
//! Ordered key-value backend seam.
//!
//! Everything above this module talks to storage through these three traits,
//! so the concrete engine is replaceable. The backend must provide snapshot
//! isolation for readers and serialize writers: a second
//! [`Backend::begin_write`] blocks until the first transaction finishes.

mod redb_backend;

pub use redb_backend::RedbBackend;

use crate::types::Result;

/// Callback handed every key/value pair of a scan; returning `false` stops it.
pub type Visitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<bool> + 'a;

/// A point-in-time view of the keyspace.
pub trait ReadTransaction {
    /// Value stored under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Visits every key starting with `prefix` that is `>= start`, in byte order.
    ///
    /// `start` may be shorter than `prefix`, in which case the scan starts at
    /// the prefix itself.
    fn scan(&self, prefix: &[u8], start: &[u8], visit: &mut Visitor<'_>) -> Result<()>;
}

/// The single in-flight read-write transaction.
///
/// Reads observe the transaction's own uncommitted writes. Nothing becomes
/// visible to other transactions before [`WriteTransaction::commit`].
pub trait WriteTransaction: ReadTransaction {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    /// Removes `key`; absent keys are not an error.
    fn delete(&mut self, key: &[u8]) -> Result<()>;
    /// Makes every write visible atomically.
    fn commit(self: Box<Self>) -> Result<()>;
    /// Discards every write.
    fn abort(self: Box<Self>) -> Result<()>;
    /// Upcast for code that only reads.
    fn as_read(&self) -> &dyn ReadTransaction;
}

/// An ordered key-value store.
pub trait Backend: Send + Sync + 'static {
    /// Opens a snapshot; never blocks on writers.
    fn begin_read(&self) -> Result<Box<dyn ReadTransaction>>;
    /// Opens the read-write transaction, waiting for any current writer.
    fn begin_write(&self) -> Result<Box<dyn WriteTransaction>>;
}

/// Where the scan of `prefix` should begin for a requested `start`.
pub(crate) fn scan_origin<'a>(prefix: &'a [u8], start: &'a [u8]) -> &'a [u8] {
    if start > prefix {
        start
    } else {
        prefix
    }
}
