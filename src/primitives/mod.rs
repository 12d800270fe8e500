//! Low-level primitives for building the storage engine.

/// Byte-level encodings shared by the key and value codecs.
pub mod bytes;

/// Coordination between metadata recomputation and maintenance passes.
pub mod concurrency;
