//! Storage engine: the key codec, typed transactions, schema migrations and
//! the indexes kept alongside device records.
//!
//! Everything lives in one ordered keyspace; see [`keys`] for the layout.

/// Transactional ordered key-value backend.
pub mod backend;

/// Key encoding for every record kind.
pub mod keys;

/// Value encodings.
pub mod record;

mod globals;
mod lowlevel;
mod meta;
mod misc;
mod options;
mod schema;
mod sequence;
mod transactions;

pub use globals::{need, FileVersion, GlobalChange, GlobalsCheck, VersionList};
pub use lowlevel::{GcReport, Lowlevel};
pub use meta::{load_metadata_tracker, Counts, CountsSet, MetadataTracker, Recalc, RecalcReason};
pub use misc::{
    drop_index_ids, drop_local_sequence_floor, get_index_id, get_local_sequence_floor,
    raise_local_sequence_floor, set_index_id, IndexId, MiscNamespace,
};
pub use options::{DbOptions, DEFAULT_RECHECK_INTERVAL_SECS};
pub use schema::{
    schema_info, set_stored_version, update_schema, update_schema_to, SchemaInfo,
    DB_MIN_COMPATIBLE_VERSION, DB_VERSION,
};
pub use sequence::SequenceRepair;
pub use transactions::{FileReader, ReadOnlyTransaction, ReadWriteTransaction};
