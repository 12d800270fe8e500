//! Namespaced scalar settings stored under Misc keys.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::keys;
use super::transactions::{FileReader, ReadWriteTransaction};
use crate::types::{DbError, DeviceId, Result};

/// A namespace of Misc keys; the root namespace has an empty prefix.
#[derive(Clone, Debug, Default)]
pub struct MiscNamespace {
    prefix: String,
}

impl MiscNamespace {
    /// The root namespace, home of the schema version.
    pub fn root() -> Self {
        Self::default()
    }

    /// Keys of this namespace are `"{name}/{key}"`.
    pub fn new(name: &str) -> Self {
        Self {
            prefix: format!("{name}/"),
        }
    }

    fn key(&self, name: &str) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + name.len());
        full.extend_from_slice(self.prefix.as_bytes());
        full.extend_from_slice(name.as_bytes());
        keys::misc_key(&full)
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&self, txn: &impl FileReader, name: &str) -> Result<Option<i64>> {
        let Some(bytes) = txn.get(&self.key(name))? else {
            return Ok(None);
        };
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DbError::Corruption(format!("misc {name}: expected 8 bytes, got {}", bytes.len())))?;
        Ok(Some(i64::from_be_bytes(raw)))
    }

    /// Writes a big-endian `i64`.
    pub fn put_i64(&self, txn: &mut ReadWriteTransaction, name: &str, value: i64) -> Result<()> {
        txn.put(&self.key(name), &value.to_be_bytes())
    }

    /// Reads a UTF-8 string.
    pub fn get_string(&self, txn: &impl FileReader, name: &str) -> Result<Option<String>> {
        match txn.get(&self.key(name))? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| DbError::Corruption(format!("misc {name}: not UTF-8"))),
            None => Ok(None),
        }
    }

    /// Writes a UTF-8 string.
    pub fn put_string(&self, txn: &mut ReadWriteTransaction, name: &str, value: &str) -> Result<()> {
        txn.put(&self.key(name), value.as_bytes())
    }

    /// Reads a boolean stored as one byte.
    pub fn get_bool(&self, txn: &impl FileReader, name: &str) -> Result<Option<bool>> {
        match txn.get(&self.key(name))?.as_deref() {
            Some([0]) => Ok(Some(false)),
            Some([1]) => Ok(Some(true)),
            Some(_) => Err(DbError::Corruption(format!("misc {name}: not a boolean"))),
            None => Ok(None),
        }
    }

    /// Writes a boolean.
    pub fn put_bool(&self, txn: &mut ReadWriteTransaction, name: &str, value: bool) -> Result<()> {
        txn.put(&self.key(name), &[u8::from(value)])
    }

    /// Removes `name`.
    pub fn delete(&self, txn: &mut ReadWriteTransaction, name: &str) -> Result<()> {
        txn.delete(&self.key(name))
    }
}

/// Identifies one incarnation of a device's index of a folder.
///
/// A device that loses its database starts over with a new index id, telling
/// peers to discard what they know of the old one.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub struct IndexId(pub u64);

impl IndexId {
    /// A random, non-zero id.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen::<u64>();
            if id != 0 {
                return IndexId(id);
            }
        }
    }

    /// Whether no id has been assigned.
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::Debug for IndexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// Length-prefixed so that no folder's namespace is a prefix of another's.
fn index_id_namespace(folder: &str) -> MiscNamespace {
    MiscNamespace::new(&format!("index-id/{}:{folder}", folder.len()))
}

/// The index id stored for `device` in `folder`, zero when unset.
pub fn get_index_id(txn: &impl FileReader, folder: &str, device: &DeviceId) -> Result<IndexId> {
    let value = index_id_namespace(folder).get_i64(txn, &device.to_string())?;
    Ok(IndexId(value.map_or(0, |v| v as u64)))
}

/// Stores the index id of `device` in `folder`.
pub fn set_index_id(
    txn: &mut ReadWriteTransaction,
    folder: &str,
    device: &DeviceId,
    id: IndexId,
) -> Result<()> {
    index_id_namespace(folder).put_i64(txn, &device.to_string(), id.0 as i64)
}

/// Removes every index id of `folder`.
pub fn drop_index_ids(txn: &mut ReadWriteTransaction, folder: &str) -> Result<u64> {
    let ns = index_id_namespace(folder);
    txn.delete_prefix(&ns.key(""))
}

fn local_sequence_namespace() -> MiscNamespace {
    MiscNamespace::new("local-sequence")
}

/// Lowest value the next recount may give the local sequence of `folder`.
///
/// Set when garbage collection removes the counters of a folder whose local
/// records are all gone; zero when unset.
pub fn get_local_sequence_floor(txn: &impl FileReader, folder: &str) -> Result<i64> {
    Ok(local_sequence_namespace().get_i64(txn, folder)?.unwrap_or(0))
}

/// Raises the local sequence floor of `folder` to `sequence`; never lowers it.
pub fn raise_local_sequence_floor(txn: &mut ReadWriteTransaction, folder: &str, sequence: i64) -> Result<()> {
    if sequence > get_local_sequence_floor(&*txn, folder)? {
        local_sequence_namespace().put_i64(txn, folder, sequence)?;
    }
    Ok(())
}

/// Forgets the local sequence floor of `folder`.
pub fn drop_local_sequence_floor(txn: &mut ReadWriteTransaction, folder: &str) -> Result<()> {
    local_sequence_namespace().delete(txn, folder)
}
