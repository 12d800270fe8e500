//! File metadata records as exchanged between replicas.

use std::fmt;

use super::vector::Vector;
use crate::types::ShortId;

/// Locally ignored by the user's ignore patterns.
pub const FLAG_LOCAL_IGNORED: u32 = 1 << 1;
/// The local filesystem cannot represent this entry.
pub const FLAG_LOCAL_UNSUPPORTED: u32 = 1 << 0;
/// The entry must be rescanned before it can be trusted.
pub const FLAG_LOCAL_MUST_RESCAN: u32 = 1 << 2;
/// Changed locally in a receive-only folder.
pub const FLAG_LOCAL_RECEIVE_ONLY: u32 = 1 << 3;

/// Local flags that make a record invalid for synchronization.
pub const LOCAL_INVALID_FLAGS: u32 =
    FLAG_LOCAL_UNSUPPORTED | FLAG_LOCAL_IGNORED | FLAG_LOCAL_MUST_RESCAN | FLAG_LOCAL_RECEIVE_ONLY;

/// Size accounted for directories and symlinks.
pub const SYNTHETIC_DIRECTORY_SIZE: i64 = 128;

/// Every local flag bit, lowest first.
pub const LOCAL_FLAG_BITS: [u32; 4] = [
    FLAG_LOCAL_UNSUPPORTED,
    FLAG_LOCAL_IGNORED,
    FLAG_LOCAL_MUST_RESCAN,
    FLAG_LOCAL_RECEIVE_ONLY,
];

/// What kind of filesystem entry a record describes.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum FileType {
    /// Regular file.
    #[default]
    File = 0,
    /// Directory.
    Directory = 1,
    /// Pre-schema-1 symlink pointing at a file.
    SymlinkFile = 2,
    /// Pre-schema-1 symlink pointing at a directory.
    SymlinkDirectory = 3,
    /// Symbolic link.
    Symlink = 4,
}

impl FileType {
    /// Tag byte used by the value codec.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`FileType::as_u8`].
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(FileType::File),
            1 => Some(FileType::Directory),
            2 => Some(FileType::SymlinkFile),
            3 => Some(FileType::SymlinkDirectory),
            4 => Some(FileType::Symlink),
            _ => None,
        }
    }

    /// Any of the symlink kinds.
    pub fn is_symlink(self) -> bool {
        matches!(
            self,
            FileType::Symlink | FileType::SymlinkFile | FileType::SymlinkDirectory
        )
    }

    /// One of the kinds only old databases contain.
    pub fn is_deprecated(self) -> bool {
        matches!(self, FileType::SymlinkFile | FileType::SymlinkDirectory)
    }
}

/// One content block; offsets are implied by the preceding sizes.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct BlockInfo {
    /// Block length in bytes.
    pub size: u32,
    /// Content hash.
    pub hash: Vec<u8>,
}

/// A device's view of one file.
#[derive(Clone, Eq, PartialEq, Default)]
pub struct FileInfo {
    /// Slash-separated path relative to the folder root.
    pub name: String,
    /// Entry kind.
    pub file_type: FileType,
    /// Tombstone marker; deleted records keep their version for convergence.
    pub deleted: bool,
    /// Size in bytes.
    pub size: i64,
    /// Modification time, whole seconds.
    pub modified_s: i64,
    /// Modification time, nanosecond part.
    pub modified_ns: i32,
    /// Replica that made the last change.
    pub modified_by: ShortId,
    /// Unix permission bits.
    pub permissions: u32,
    /// Permissions are not tracked for this entry.
    pub no_permissions: bool,
    /// Causal version.
    pub version: Vector,
    /// Position in the owning device's record stream.
    pub sequence: i64,
    /// Content blocks.
    pub blocks: Vec<BlockInfo>,
    /// Target of a symlink.
    pub symlink_target: String,
    /// Reported invalid by the owning device.
    pub raw_invalid: bool,
    /// Local-only flag bits; never sent to other devices.
    pub local_flags: u32,
}

impl FileInfo {
    /// A regular file with the given name and version.
    pub fn new(name: impl Into<String>, version: Vector) -> Self {
        Self {
            name: name.into(),
            version,
            ..Self::default()
        }
    }

    /// Whether this record should be skipped by synchronization.
    pub fn is_invalid(&self) -> bool {
        self.raw_invalid || self.local_flags & LOCAL_INVALID_FLAGS != 0
    }

    /// Whether the local ignore patterns exclude this record.
    pub fn is_ignored(&self) -> bool {
        self.local_flags & FLAG_LOCAL_IGNORED != 0
    }

    /// Whether this is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Whether this is a directory.
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// Whether this is any kind of symlink.
    pub fn is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }

    /// Whether the record only differs from `other` in its sequence number.
    pub fn is_equivalent(&self, other: &FileInfo) -> bool {
        self.name == other.name
            && self.file_type == other.file_type
            && self.deleted == other.deleted
            && self.raw_invalid == other.raw_invalid
            && self.local_flags == other.local_flags
            && self.size == other.size
            && self.modified_s == other.modified_s
            && self.modified_ns == other.modified_ns
            && self.modified_by == other.modified_by
            && self.no_permissions == other.no_permissions
            && (self.no_permissions || self.permissions == other.permissions)
            && self.version == other.version
            && self.symlink_target == other.symlink_target
            && self.blocks == other.blocks
    }

    /// Bytes this record contributes to size counters.
    pub fn file_size(&self) -> i64 {
        if self.deleted {
            0
        } else if self.is_directory() || self.is_symlink() {
            SYNTHETIC_DIRECTORY_SIZE
        } else {
            self.size
        }
    }

    /// Sum of block sizes, used when `size` was never filled in.
    pub fn blocks_size(&self) -> i64 {
        self.blocks.iter().map(|b| i64::from(b.size)).sum()
    }
}

impl fmt::Debug for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileInfo")
            .field("name", &self.name)
            .field("type", &self.file_type)
            .field("deleted", &self.deleted)
            .field("invalid", &self.raw_invalid)
            .field("local_flags", &self.local_flags)
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .field("size", &self.size)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

/// Whether `name` is in the canonical slash-separated form.
///
/// Canonical names are relative, use `/` as the only separator, and contain
/// no empty, `.` or `..` components.
pub fn is_canonical_name(name: &str) -> bool {
    if name.is_empty() || name.contains('\\') || name.contains('\0') {
        return false;
    }
    name.split('/')
        .all(|part| !part.is_empty() && part != "." && part != "..")
}
