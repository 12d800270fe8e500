//! Local metadata database of a peer-to-peer folder synchronization engine.
//!
//! For every shared folder the database keeps each device's view of each
//! file, the winning (global) version of every file, what each device still
//! needs, and per-folder counters. [`db::FileSet`] is the entry point;
//! [`storage::Lowlevel`] is the shared handle underneath it.

#![warn(missing_docs)]

pub mod admin;
pub mod cli;
pub mod db;
pub mod primitives;
pub mod protocol;
pub mod storage;
pub mod types;

pub use db::{FileSet, Snapshot};
pub use storage::{DbOptions, Lowlevel};
pub use types::{DbError, DeviceId, Result, GLOBAL_DEVICE_ID, LOCAL_DEVICE_ID};
