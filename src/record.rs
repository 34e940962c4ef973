//! Component C: the on-flash record codec.
//!
//! Every inode, block, and deletion is an append-only, self-checksummed
//! record (`spec.md` §3–§4.C). Decode fails cleanly on a bad magic, a
//! declared length beyond the area bound, a CRC mismatch, or truncated
//! data — the torn-write policy treats a record that runs off the end of
//! the area's live data as the end of that area's log, not corruption.

use crate::error::{Error, Result};
use crate::id::RecordId;
use alloc::vec::Vec;

/// Sentinel raw ID meaning "no id" (a deletion tombstone's parent, or a
/// file's first block's `prev`).
const ID_NONE: u32 = u32::MAX;

const INODE_MAGIC: u8 = 0xE1;
const BLOCK_MAGIC: u8 = 0xB1;
/// NOR-erased flash reads back as `0xFF`; a record can never legitimately
/// start with it, so it doubles as the "nothing written here yet" marker.
const ERASED_MAGIC: u8 = 0xFF;

const INODE_HEADER_LEN: usize = 1 + 4 + 4 + 4 + 2;
const BLOCK_HEADER_LEN: usize = 1 + 4 + 4 + 4 + 4 + 2;
const CRC_LEN: usize = 4;

/// Longest name a path component may have.
pub const MAX_NAME_LEN: usize = 255;

/// Upper bound on the size of an inode record, for sizing scratch buffers
/// used by GC and mount-time replay.
pub const fn max_inode_record_len() -> usize {
    INODE_HEADER_LEN + MAX_NAME_LEN + CRC_LEN
}

/// Upper bound on the size of a block record carrying up to
/// `block_max_data_sz` payload bytes.
pub const fn max_block_record_len(block_max_data_sz: u32) -> usize {
    BLOCK_HEADER_LEN + block_max_data_sz as usize + CRC_LEN
}

/// A decoded inode record. A later record for the same `id` (`seq` larger)
/// supersedes earlier ones; `parent == None` marks a deletion tombstone.
/// The root directory's own record is self-parented (`parent ==
/// Some(ROOT_DIR)`) rather than `None`, so it is never mistaken for a
/// tombstone (see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeRecord {
    pub id: RecordId,
    pub seq: u32,
    pub parent: Option<RecordId>,
    pub name: Vec<u8>,
}

/// A decoded block record. Blocks form a per-file singly-linked list from
/// the last block back to the first via `prev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: RecordId,
    pub seq: u32,
    pub inode_id: RecordId,
    pub prev: Option<RecordId>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Inode(InodeRecord),
    Block(BlockRecord),
}

impl Record {
    pub fn id(&self) -> RecordId {
        match self {
            Record::Inode(r) => r.id,
            Record::Block(r) => r.id,
        }
    }

    pub fn seq(&self) -> u32 {
        match self {
            Record::Inode(r) => r.seq,
            Record::Block(r) => r.seq,
        }
    }
}

/// Outcome of attempting to decode one record from a buffer that may
/// extend past the end of what was actually written.
#[derive(Debug)]
pub enum Decoded {
    /// A valid record, and the number of bytes it occupies on flash.
    Record(Record, usize),
    /// The buffer ends (or is erased) before a full record could be read.
    /// The replayer treats this as the end of the area's log.
    Torn,
    /// The record's header and length fields parsed, so its on-flash size
    /// (the `usize`) is known, but its CRC didn't match: a bit flipped
    /// somewhere in an otherwise complete record. Distinct from a bad
    /// magic byte, which leaves no way to know how many bytes to skip and
    /// so is reported as [`Error::Corrupt`] instead. The replayer skips
    /// exactly this many bytes and keeps reading the rest of the area's
    /// log, so one corrupted record drops only itself.
    Corrupt(usize),
}

fn put_id_or_none(buf: &mut [u8], id: Option<RecordId>) {
    let raw = id.map_or(ID_NONE, RecordId::raw);
    buf.copy_from_slice(&raw.to_le_bytes());
}

fn get_id_or_none(bytes: [u8; 4]) -> Result<Option<RecordId>> {
    let raw = u32::from_le_bytes(bytes);
    if raw == ID_NONE {
        return Ok(None);
    }
    RecordId::from_raw(raw).map(Some).ok_or(Error::Corrupt)
}

/// Encodes an inode record.
pub fn encode_inode(rec: &InodeRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(INODE_HEADER_LEN + rec.name.len() + CRC_LEN);
    buf.push(INODE_MAGIC);
    buf.extend_from_slice(&rec.id.raw().to_le_bytes());
    buf.extend_from_slice(&rec.seq.to_le_bytes());
    let mut parent_buf = [0u8; 4];
    put_id_or_none(&mut parent_buf, rec.parent);
    buf.extend_from_slice(&parent_buf);
    buf.extend_from_slice(&(rec.name.len() as u16).to_le_bytes());
    buf.extend_from_slice(&rec.name);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Encodes a block record.
pub fn encode_block(rec: &BlockRecord) -> Vec<u8> {
    let mut buf = Vec::with_capacity(BLOCK_HEADER_LEN + rec.data.len() + CRC_LEN);
    buf.push(BLOCK_MAGIC);
    buf.extend_from_slice(&rec.id.raw().to_le_bytes());
    buf.extend_from_slice(&rec.seq.to_le_bytes());
    buf.extend_from_slice(&rec.inode_id.raw().to_le_bytes());
    let mut prev_buf = [0u8; 4];
    put_id_or_none(&mut prev_buf, rec.prev);
    buf.extend_from_slice(&prev_buf);
    buf.extend_from_slice(&(rec.data.len() as u16).to_le_bytes());
    buf.extend_from_slice(&rec.data);
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Attempts to decode one record from the start of `buf`. `buf` may be
/// longer than the record (it is typically "everything left in the area"),
/// shorter (the trailing, possibly-torn record), or start with erased
/// (`0xFF`) bytes (nothing written past this point).
pub fn decode(buf: &[u8]) -> Result<Decoded> {
    let Some(&magic) = buf.first() else {
        return Ok(Decoded::Torn);
    };
    match magic {
        ERASED_MAGIC => Ok(Decoded::Torn),
        INODE_MAGIC => decode_inode(buf),
        BLOCK_MAGIC => decode_block(buf),
        _ => Err(Error::Corrupt),
    }
}

fn decode_inode(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < INODE_HEADER_LEN {
        return Ok(Decoded::Torn);
    }
    let name_len = u16::from_le_bytes(buf[13..15].try_into().unwrap()) as usize;
    let total = INODE_HEADER_LEN + name_len + CRC_LEN;
    if buf.len() < total {
        return Ok(Decoded::Torn);
    }
    let crc_calc = crc32fast::hash(&buf[..total - CRC_LEN]);
    let crc_stored = u32::from_le_bytes(buf[total - CRC_LEN..total].try_into().unwrap());
    if crc_calc != crc_stored {
        return Ok(Decoded::Corrupt(total));
    }
    let Some(id) = RecordId::from_raw(u32::from_le_bytes(buf[1..5].try_into().unwrap())) else {
        return Ok(Decoded::Corrupt(total));
    };
    let seq = u32::from_le_bytes(buf[5..9].try_into().unwrap());
    let parent = get_id_or_none(buf[9..13].try_into().unwrap())?;
    let name = buf[INODE_HEADER_LEN..INODE_HEADER_LEN + name_len].to_vec();
    Ok(Decoded::Record(
        Record::Inode(InodeRecord {
            id,
            seq,
            parent,
            name,
        }),
        total,
    ))
}

fn decode_block(buf: &[u8]) -> Result<Decoded> {
    if buf.len() < BLOCK_HEADER_LEN {
        return Ok(Decoded::Torn);
    }
    let data_len = u16::from_le_bytes(buf[17..19].try_into().unwrap()) as usize;
    let total = BLOCK_HEADER_LEN + data_len + CRC_LEN;
    if buf.len() < total {
        return Ok(Decoded::Torn);
    }
    let crc_calc = crc32fast::hash(&buf[..total - CRC_LEN]);
    let crc_stored = u32::from_le_bytes(buf[total - CRC_LEN..total].try_into().unwrap());
    if crc_calc != crc_stored {
        return Ok(Decoded::Corrupt(total));
    }
    let (Some(id), Some(inode_id)) = (
        RecordId::from_raw(u32::from_le_bytes(buf[1..5].try_into().unwrap())),
        RecordId::from_raw(u32::from_le_bytes(buf[9..13].try_into().unwrap())),
    ) else {
        return Ok(Decoded::Corrupt(total));
    };
    let seq = u32::from_le_bytes(buf[5..9].try_into().unwrap());
    let prev = get_id_or_none(buf[13..17].try_into().unwrap())?;
    let data = buf[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + data_len].to_vec();
    Ok(Decoded::Record(
        Record::Block(BlockRecord {
            id,
            seq,
            inode_id,
            prev,
            data,
        }),
        total,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Kind;
    use alloc::vec;

    #[test]
    fn inode_record_roundtrips() {
        let rec = InodeRecord {
            id: RecordId::new(Kind::File, 7),
            seq: 3,
            parent: Some(RecordId::new(Kind::Directory, 0)),
            name: b"hello.txt".to_vec(),
        };
        let bytes = encode_inode(&rec);
        match decode(&bytes).unwrap() {
            Decoded::Record(Record::Inode(got), len) => {
                assert_eq!(got, rec);
                assert_eq!(len, bytes.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn block_record_roundtrips() {
        let rec = BlockRecord {
            id: RecordId::new(Kind::Block, 1),
            seq: 0,
            inode_id: RecordId::new(Kind::File, 7),
            prev: None,
            data: vec![1, 2, 3, 4],
        };
        let bytes = encode_block(&rec);
        match decode(&bytes).unwrap() {
            Decoded::Record(Record::Block(got), len) => {
                assert_eq!(got, rec);
                assert_eq!(len, bytes.len());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn truncated_record_is_torn() {
        let rec = InodeRecord {
            id: RecordId::new(Kind::File, 7),
            seq: 3,
            parent: Some(RecordId::new(Kind::Directory, 0)),
            name: b"hello.txt".to_vec(),
        };
        let bytes = encode_inode(&rec);
        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(decode(truncated).unwrap(), Decoded::Torn));
    }

    #[test]
    fn erased_tail_is_torn() {
        let buf = [0xFFu8; 32];
        assert!(matches!(decode(&buf).unwrap(), Decoded::Torn));
    }

    #[test]
    fn corrupted_body_reports_corrupt_with_known_length_not_torn() {
        let rec = InodeRecord {
            id: RecordId::new(Kind::File, 7),
            seq: 3,
            parent: Some(RecordId::new(Kind::Directory, 0)),
            name: b"hello.txt".to_vec(),
        };
        let mut bytes = encode_inode(&rec);
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        match decode(&bytes).unwrap() {
            Decoded::Corrupt(total) => assert_eq!(total, bytes.len()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let buf = [0x42u8; 32];
        assert_eq!(decode(&buf).unwrap_err(), Error::Corrupt);
    }
}
