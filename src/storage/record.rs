//! Value codec for file records, version lists and folder counters.
//!
//! Values are varint encoded with a leading format byte. Decoding never
//! panics: anything unexpected is reported as [`DbError::Corruption`].

use super::globals::{FileVersion, VersionList};
use super::meta::{Counts, CountsSet};
use crate::primitives::bytes::buf::{put_bytes, Reader};
use crate::primitives::bytes::var;
use crate::protocol::{BlockInfo, Counter, FileInfo, FileType, Vector};
use crate::types::{DbError, DeviceId, Result, ShortId, DEVICE_ID_LEN};

const FILE_FORMAT: u8 = 1;
const VERSION_LIST_FORMAT: u8 = 1;
const COUNTS_FORMAT: u8 = 1;

const FILE_DELETED: u8 = 1 << 0;
const FILE_RAW_INVALID: u8 = 1 << 1;
const FILE_NO_PERMISSIONS: u8 = 1 << 2;

const FV_INVALID: u8 = 1 << 0;
const FV_DELETED: u8 = 1 << 1;

fn put_vector(out: &mut Vec<u8>, v: &Vector) {
    var::encode_u64(v.counters().len() as u64, out);
    for c in v.counters() {
        var::encode_u64(c.id.0, out);
        var::encode_u64(c.value, out);
    }
}

fn read_vector(r: &mut Reader<'_>) -> Result<Vector> {
    let n = r.var_u64()? as usize;
    if n > r.remaining() {
        return Err(DbError::Corruption("version vector length exceeds value".into()));
    }
    let mut counters = Vec::with_capacity(n);
    for _ in 0..n {
        let id = ShortId(r.var_u64()?);
        let value = r.var_u64()?;
        counters.push(Counter { id, value });
    }
    Ok(Vector::from_counters(counters))
}

fn read_device(r: &mut Reader<'_>) -> Result<DeviceId> {
    DeviceId::from_bytes(r.fixed(DEVICE_ID_LEN)?)
}

fn read_format(r: &mut Reader<'_>, expected: u8, what: &str) -> Result<()> {
    let format = r.u8()?;
    if format != expected {
        return Err(DbError::Corruption(format!(
            "{what}: unknown format {format}"
        )));
    }
    Ok(())
}

/// Encodes a file record.
pub fn encode_file(f: &FileInfo) -> Vec<u8> {
    let mut out = Vec::with_capacity(64 + f.name.len() + f.blocks.len() * 40);
    out.push(FILE_FORMAT);
    put_bytes(&mut out, f.name.as_bytes());
    out.push(f.file_type.as_u8());
    let mut flags = 0u8;
    if f.deleted {
        flags |= FILE_DELETED;
    }
    if f.raw_invalid {
        flags |= FILE_RAW_INVALID;
    }
    if f.no_permissions {
        flags |= FILE_NO_PERMISSIONS;
    }
    out.push(flags);
    var::encode_i64(f.size, &mut out);
    var::encode_i64(f.modified_s, &mut out);
    var::encode_i64(i64::from(f.modified_ns), &mut out);
    var::encode_u64(f.modified_by.0, &mut out);
    var::encode_u64(u64::from(f.permissions), &mut out);
    var::encode_u64(u64::from(f.local_flags), &mut out);
    var::encode_i64(f.sequence, &mut out);
    put_vector(&mut out, &f.version);
    var::encode_u64(f.blocks.len() as u64, &mut out);
    for b in &f.blocks {
        var::encode_u64(u64::from(b.size), &mut out);
        put_bytes(&mut out, &b.hash);
    }
    put_bytes(&mut out, f.symlink_target.as_bytes());
    out
}

/// Decodes a file record.
pub fn decode_file(bytes: &[u8]) -> Result<FileInfo> {
    let mut r = Reader::new(bytes, "file record");
    read_format(&mut r, FILE_FORMAT, "file record")?;
    let name = r.string()?;
    let type_tag = r.u8()?;
    let file_type = FileType::from_u8(type_tag)
        .ok_or_else(|| DbError::Corruption(format!("file record: unknown type {type_tag}")))?;
    let flags = r.u8()?;
    let size = r.var_i64()?;
    let modified_s = r.var_i64()?;
    let modified_ns = i32::try_from(r.var_i64()?)
        .map_err(|_| DbError::Corruption("file record: nanoseconds out of range".into()))?;
    let modified_by = ShortId(r.var_u64()?);
    let permissions = r.var_u32()?;
    let local_flags = r.var_u32()?;
    let sequence = r.var_i64()?;
    let version = read_vector(&mut r)?;
    let n_blocks = r.var_u64()? as usize;
    if n_blocks > r.remaining() {
        return Err(DbError::Corruption("file record: block count exceeds value".into()));
    }
    let mut blocks = Vec::with_capacity(n_blocks);
    for _ in 0..n_blocks {
        let size = r.var_u32()?;
        let hash = r.bytes()?.to_vec();
        blocks.push(BlockInfo { size, hash });
    }
    let symlink_target = r.string()?;
    r.finish()?;
    Ok(FileInfo {
        name,
        file_type,
        deleted: flags & FILE_DELETED != 0,
        size,
        modified_s,
        modified_ns,
        modified_by,
        permissions,
        no_permissions: flags & FILE_NO_PERMISSIONS != 0,
        version,
        sequence,
        blocks,
        symlink_target,
        raw_invalid: flags & FILE_RAW_INVALID != 0,
        local_flags,
    })
}

/// Encodes a version list in its ranked order.
pub fn encode_version_list(list: &VersionList) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + list.len() * (DEVICE_ID_LEN + 8));
    out.push(VERSION_LIST_FORMAT);
    var::encode_u64(list.len() as u64, &mut out);
    for v in list.versions() {
        out.extend_from_slice(v.device.as_bytes());
        let mut flags = 0u8;
        if v.invalid {
            flags |= FV_INVALID;
        }
        if v.deleted {
            flags |= FV_DELETED;
        }
        out.push(flags);
        put_vector(&mut out, &v.version);
    }
    out
}

/// Decodes a version list, keeping the stored order.
pub fn decode_version_list(bytes: &[u8]) -> Result<VersionList> {
    let mut r = Reader::new(bytes, "version list");
    read_format(&mut r, VERSION_LIST_FORMAT, "version list")?;
    let n = r.var_u64()? as usize;
    if n.saturating_mul(DEVICE_ID_LEN) > r.remaining() {
        return Err(DbError::Corruption("version list: length exceeds value".into()));
    }
    let mut versions = Vec::with_capacity(n);
    for _ in 0..n {
        let device = read_device(&mut r)?;
        let flags = r.u8()?;
        let version = read_vector(&mut r)?;
        versions.push(FileVersion {
            device,
            version,
            invalid: flags & FV_INVALID != 0,
            deleted: flags & FV_DELETED != 0,
        });
    }
    r.finish()?;
    Ok(VersionList::from_ranked(versions))
}

/// Encodes folder counters followed by a CRC32 of the preceding bytes.
pub fn encode_counts(set: &CountsSet) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + set.counts.len() * 48);
    out.push(COUNTS_FORMAT);
    var::encode_u64(set.counts.len() as u64, &mut out);
    for c in &set.counts {
        out.extend_from_slice(c.device.as_bytes());
        var::encode_u64(u64::from(c.local_flags), &mut out);
        var::encode_i64(c.files, &mut out);
        var::encode_i64(c.directories, &mut out);
        var::encode_i64(c.symlinks, &mut out);
        var::encode_i64(c.deleted, &mut out);
        var::encode_i64(c.bytes, &mut out);
    }
    var::encode_u64(set.sequences.len() as u64, &mut out);
    for (device, seq) in &set.sequences {
        out.extend_from_slice(device.as_bytes());
        var::encode_i64(*seq, &mut out);
    }
    var::encode_i64(set.created, &mut out);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}

/// Decodes folder counters, verifying the trailing checksum.
pub fn decode_counts(bytes: &[u8]) -> Result<CountsSet> {
    if bytes.len() < 4 {
        return Err(DbError::Corruption("folder counters: truncated".into()));
    }
    let (body, tail) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
    if crc32fast::hash(body) != stored {
        return Err(DbError::Corruption("folder counters: checksum mismatch".into()));
    }
    let mut r = Reader::new(body, "folder counters");
    read_format(&mut r, COUNTS_FORMAT, "folder counters")?;
    let n = r.var_u64()? as usize;
    if n.saturating_mul(DEVICE_ID_LEN) > r.remaining() {
        return Err(DbError::Corruption("folder counters: length exceeds value".into()));
    }
    let mut counts = Vec::with_capacity(n);
    for _ in 0..n {
        let device = read_device(&mut r)?;
        counts.push(Counts {
            device,
            local_flags: r.var_u32()?,
            files: r.var_i64()?,
            directories: r.var_i64()?,
            symlinks: r.var_i64()?,
            deleted: r.var_i64()?,
            bytes: r.var_i64()?,
        });
    }
    let n_seq = r.var_u64()? as usize;
    if n_seq.saturating_mul(DEVICE_ID_LEN) > r.remaining() {
        return Err(DbError::Corruption("folder counters: length exceeds value".into()));
    }
    let mut sequences = Vec::with_capacity(n_seq);
    for _ in 0..n_seq {
        let device = read_device(&mut r)?;
        sequences.push((device, r.var_i64()?));
    }
    let created = r.var_i64()?;
    r.finish()?;
    Ok(CountsSet {
        counts,
        sequences,
        created,
    })
}
