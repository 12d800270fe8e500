#![forbid(unsafe_code)]
//! The file-metadata model shared with the index-exchange layer.

mod file;
mod vector;

pub use file::{
    is_canonical_name, BlockInfo, FileInfo, FileType, FLAG_LOCAL_IGNORED, FLAG_LOCAL_MUST_RESCAN,
    FLAG_LOCAL_RECEIVE_ONLY, FLAG_LOCAL_UNSUPPORTED, LOCAL_FLAG_BITS, LOCAL_INVALID_FLAGS,
    SYNTHETIC_DIRECTORY_SIZE,
};
pub use vector::{Counter, Vector, VectorOrdering};
