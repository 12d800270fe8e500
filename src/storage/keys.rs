//! Key codec: every record kind packed into one ordered byte keyspace.
//!
//! ```text
//! DeviceFile    [0][u32 len][folder][32-byte device][name]
//! GlobalVersion [1][u32 len][folder][name]
//! Sequence      [2][u32 len][folder][u64 BE]                 -> DeviceFile key bytes
//! FolderMeta    [3][u32 len][folder]                         -> counters
//! Misc          [4][name]                                    -> scalar
//! ```
//!
//! The field extractors assume keys built by this module and panic on
//! anything else. [`Key::decode`] validates untrusted bytes.

use crate::primitives::bytes::ord;
use crate::types::{DbError, DeviceId, Result, DEVICE_ID_LEN};

/// First byte of every key.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum KeyType {
    /// Per-device file record.
    DeviceFile = 0,
    /// Ranked version list of one file.
    GlobalVersion = 1,
    /// Local sequence index entry.
    Sequence = 2,
    /// Folder metadata counters.
    FolderMeta = 3,
    /// Miscellaneous settings.
    Misc = 4,
}

impl KeyType {
    /// Tag byte.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Every key type, in tag order.
    pub const ALL: [KeyType; 5] = [
        KeyType::DeviceFile,
        KeyType::GlobalVersion,
        KeyType::Sequence,
        KeyType::FolderMeta,
        KeyType::Misc,
    ];

    /// The key type with tag byte `tag`.
    pub fn from_tag(tag: u8) -> Option<Self> {
        KeyType::ALL.into_iter().find(|k| k.as_u8() == tag)
    }

    /// Whether keys of this type start with a folder component.
    pub fn is_folder_scoped(self) -> bool {
        !matches!(self, KeyType::Misc)
    }
}

/// A decoded key.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum Key {
    /// See [`device_file_key`].
    DeviceFile {
        /// Folder id.
        folder: String,
        /// Owning device.
        device: DeviceId,
        /// File name bytes.
        name: Vec<u8>,
    },
    /// See [`global_version_key`].
    GlobalVersion {
        /// Folder id.
        folder: String,
        /// File name bytes.
        name: Vec<u8>,
    },
    /// See [`sequence_key`].
    Sequence {
        /// Folder id.
        folder: String,
        /// Sequence number.
        sequence: i64,
    },
    /// See [`folder_meta_key`].
    FolderMeta {
        /// Folder id.
        folder: String,
    },
    /// See [`misc_key`].
    Misc {
        /// Setting name.
        name: Vec<u8>,
    },
}

impl Key {
    /// Decodes `key`, rejecting anything this module would not produce.
    pub fn decode(key: &[u8]) -> Result<Key> {
        let (&tag, body) = key.split_first().ok_or_else(|| malformed("empty key"))?;
        let kind = KeyType::from_tag(tag)
            .ok_or_else(|| malformed(format!("unknown key type tag {tag}")))?;
        if kind == KeyType::Misc {
            return Ok(Key::Misc {
                name: body.to_vec(),
            });
        }
        let (folder, used) =
            ord::try_split_len_prefixed(body).ok_or_else(|| malformed("truncated folder"))?;
        let folder = std::str::from_utf8(folder)
            .map_err(|_| malformed("folder is not UTF-8"))?
            .to_owned();
        let rest = &body[used..];
        match kind {
            KeyType::DeviceFile => {
                if rest.len() < DEVICE_ID_LEN {
                    return Err(malformed("truncated device id"));
                }
                let (device, name) = rest.split_at(DEVICE_ID_LEN);
                Ok(Key::DeviceFile {
                    folder,
                    device: DeviceId::from_bytes(device)?,
                    name: name.to_vec(),
                })
            }
            KeyType::GlobalVersion => Ok(Key::GlobalVersion {
                folder,
                name: rest.to_vec(),
            }),
            KeyType::Sequence if rest.len() == ord::U64_LEN => Ok(Key::Sequence {
                folder,
                sequence: i64::try_from(ord::get_u64_be(rest))
                    .map_err(|_| malformed("sequence out of range"))?,
            }),
            KeyType::Sequence => Err(malformed("sequence must be 8 bytes")),
            KeyType::FolderMeta if rest.is_empty() => Ok(Key::FolderMeta { folder }),
            KeyType::FolderMeta => Err(malformed("trailing bytes after folder")),
            KeyType::Misc => Ok(Key::Misc {
                name: body.to_vec(),
            }),
        }
    }

    /// Re-encodes the key.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Key::DeviceFile {
                folder,
                device,
                name,
            } => device_file_key(folder, device, name),
            Key::GlobalVersion { folder, name } => global_version_key(folder, name),
            Key::Sequence { folder, sequence } => sequence_key(folder, *sequence),
            Key::FolderMeta { folder } => folder_meta_key(folder),
            Key::Misc { name } => misc_key(name),
        }
    }

    /// Tag of this key.
    pub fn key_type(&self) -> KeyType {
        match self {
            Key::DeviceFile { .. } => KeyType::DeviceFile,
            Key::GlobalVersion { .. } => KeyType::GlobalVersion,
            Key::Sequence { .. } => KeyType::Sequence,
            Key::FolderMeta { .. } => KeyType::FolderMeta,
            Key::Misc { .. } => KeyType::Misc,
        }
    }

    /// Folder the key belongs to, if any.
    pub fn folder(&self) -> Option<&str> {
        match self {
            Key::DeviceFile { folder, .. }
            | Key::GlobalVersion { folder, .. }
            | Key::Sequence { folder, .. }
            | Key::FolderMeta { folder } => Some(folder),
            Key::Misc { .. } => None,
        }
    }
}

/// Prefix shared by every key of `kind`.
pub fn tag_prefix(kind: KeyType) -> Vec<u8> {
    vec![kind.as_u8()]
}

/// Prefix shared by every key of `kind` in `folder`.
pub fn folder_prefix(kind: KeyType, folder: &str) -> Vec<u8> {
    assert!(kind.is_folder_scoped(), "{kind:?} keys are not folder scoped");
    let mut out = Vec::with_capacity(1 + ord::LEN_PREFIX + folder.len());
    out.push(kind.as_u8());
    ord::push_len_prefixed(&mut out, folder.as_bytes());
    out
}

/// Prefix of one device's file records in `folder`.
pub fn device_file_prefix(folder: &str, device: &DeviceId) -> Vec<u8> {
    let mut out = folder_prefix(KeyType::DeviceFile, folder);
    out.extend_from_slice(device.as_bytes());
    out
}

/// Key of `device`'s record for `name` in `folder`.
pub fn device_file_key(folder: &str, device: &DeviceId, name: &[u8]) -> Vec<u8> {
    let mut out = device_file_prefix(folder, device);
    out.extend_from_slice(name);
    out
}

/// Key of the version list for `name` in `folder`.
pub fn global_version_key(folder: &str, name: &[u8]) -> Vec<u8> {
    let mut out = folder_prefix(KeyType::GlobalVersion, folder);
    out.extend_from_slice(name);
    out
}

/// Key of local sequence `sequence` in `folder`. Sequences are never negative.
pub fn sequence_key(folder: &str, sequence: i64) -> Vec<u8> {
    let sequence = u64::try_from(sequence).unwrap_or_else(|_| panic!("negative sequence {sequence}"));
    let mut out = folder_prefix(KeyType::Sequence, folder);
    ord::push_u64_be(&mut out, sequence);
    out
}

/// Key of the metadata counters of `folder`.
pub fn folder_meta_key(folder: &str) -> Vec<u8> {
    folder_prefix(KeyType::FolderMeta, folder)
}

/// Key of the miscellaneous setting `name`.
pub fn misc_key(name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + name.len());
    out.push(KeyType::Misc.as_u8());
    out.extend_from_slice(name);
    out
}

fn malformed(what: impl Into<String>) -> DbError {
    DbError::Corruption(format!("malformed key: {}", what.into()))
}

/// Byte offset where the variable part starts for folder-scoped keys.
fn folder_body_offset(key: &[u8]) -> usize {
    let (_, used) = ord::split_len_prefixed(&key[1..]);
    1 + used
}

/// Name component of a DeviceFile key.
pub fn name_from_device_file_key(key: &[u8]) -> &[u8] {
    assert_eq!(key[0], KeyType::DeviceFile.as_u8(), "not a device file key");
    &key[folder_body_offset(key) + DEVICE_ID_LEN..]
}

/// Device component of a DeviceFile key.
pub fn device_from_device_file_key(key: &[u8]) -> DeviceId {
    assert_eq!(key[0], KeyType::DeviceFile.as_u8(), "not a device file key");
    let start = folder_body_offset(key);
    DeviceId::from_bytes(&key[start..start + DEVICE_ID_LEN]).expect("fixed width device id")
}

/// Name component of a GlobalVersion key.
pub fn name_from_global_version_key(key: &[u8]) -> &[u8] {
    assert_eq!(
        key[0],
        KeyType::GlobalVersion.as_u8(),
        "not a global version key"
    );
    &key[folder_body_offset(key)..]
}

/// Sequence component of a Sequence key.
pub fn sequence_from_sequence_key(key: &[u8]) -> i64 {
    assert_eq!(key[0], KeyType::Sequence.as_u8(), "not a sequence key");
    let start = folder_body_offset(key);
    assert_eq!(key.len(), start + ord::U64_LEN, "sequence key length");
    let seq = ord::get_u64_be(&key[start..]);
    i64::try_from(seq).unwrap_or_else(|_| panic!("sequence {seq} out of range"))
}

/// Folder component of any folder-scoped key.
pub fn folder_from_key(key: &[u8]) -> &str {
    assert!(
        KeyType::from_tag(key[0]).is_some_and(KeyType::is_folder_scoped),
        "key is not folder scoped"
    );
    ord::split_str_key(&key[1..]).0
}

/// Smallest key strictly greater than every key starting with `prefix`, if any.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
