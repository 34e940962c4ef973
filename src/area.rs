//! Component B: the area manager.
//!
//! Tracks the fixed set of erase-aligned flash regions, their write
//! cursors, live-byte counts, and which one is currently scratch
//! (`spec.md` §3–§4.B).

use crate::error::{Error, Result};
use crate::flash::{AreaDescriptor, FlashDevice};
use core::fmt;

/// Magic stamped at the start of every area header.
pub const AREA_MAGIC: u32 = 0x4653_4631; // "FSF1"
/// Sentinel `id` marking an area as scratch (not part of the live set).
pub const AREA_ID_NONE: u32 = u32::MAX;
/// On-flash size of [`AreaHeader`], padded for alignment of the first record.
pub const AREA_HEADER_LEN: u32 = 16;

/// An on-flash location: an area index packed with a byte offset within it.
///
/// Packed into 32 bits per `spec.md` §3: the high byte is the area index,
/// the low 24 bits are the offset (areas up to 16 MiB).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FlashLocation(u32);

impl FlashLocation {
    pub fn new(area: usize, offset: u32) -> FlashLocation {
        debug_assert!(area <= 0xFF);
        debug_assert!(offset <= 0x00FF_FFFF);
        FlashLocation(((area as u32) << 24) | (offset & 0x00FF_FFFF))
    }

    pub const fn area(self) -> usize {
        (self.0 >> 24) as usize
    }

    pub const fn offset(self) -> u32 {
        self.0 & 0x00FF_FFFF
    }
}

impl fmt::Debug for FlashLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlashLocation(area={}, off={})", self.area(), self.offset())
    }
}

/// The header persisted at the start of every area.
#[derive(Debug, Clone, Copy)]
pub struct AreaHeader {
    pub magic: u32,
    /// The area's persistent identity, or [`AREA_ID_NONE`] for scratch.
    pub id: u32,
    /// Garbage-collection sequence number (wraps at 256); used to pick the
    /// next GC source (the area with the smallest value is the oldest).
    pub gc_seq: u8,
}

impl AreaHeader {
    fn encode(self, buf: &mut [u8; AREA_HEADER_LEN as usize]) {
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8] = self.gc_seq;
        buf[9..].fill(0);
    }

    fn decode(buf: &[u8; AREA_HEADER_LEN as usize]) -> Option<AreaHeader> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != AREA_MAGIC {
            return None;
        }
        let id = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let gc_seq = buf[8];
        Some(AreaHeader { magic, id, gc_seq })
    }
}

/// In-memory bookkeeping for one flash area.
#[derive(Debug, Clone)]
pub struct Area {
    pub offset: u32,
    pub length: u32,
    /// `None` while this area is scratch (not part of the live namespace).
    pub id: Option<u32>,
    pub gc_seq: u8,
    /// Write cursor, relative to the area's start, past the header.
    pub cursor: u32,
    /// Bytes occupied by still-referenced records (vs. superseded ones),
    /// used to decide when GC is worthwhile.
    pub live_bytes: u32,
}

impl Area {
    fn new(desc: AreaDescriptor) -> Area {
        Area {
            offset: desc.offset,
            length: desc.length,
            id: None,
            gc_seq: 0,
            cursor: AREA_HEADER_LEN,
            live_bytes: 0,
        }
    }

    pub fn free_space(&self) -> u32 {
        self.length.saturating_sub(self.cursor)
    }

    pub fn is_scratch(&self) -> bool {
        self.id.is_none()
    }
}

/// Owns the area table and the allocation cursor.
pub struct AreaManager<D: FlashDevice> {
    pub dev: D,
    pub areas: alloc::vec::Vec<Area>,
    /// Index of the area currently receiving new writes.
    pub active: usize,
    /// Index of the current scratch area.
    pub scratch: usize,
}

impl<D: FlashDevice> AreaManager<D> {
    /// Builds a fresh area table over `descs`, without touching flash.
    /// Used both by `format` (areas get erased next) and `detect` (headers
    /// get read and overlaid onto this skeleton next).
    pub fn new(dev: D, descs: &[AreaDescriptor]) -> AreaManager<D> {
        let areas = descs.iter().copied().map(Area::new).collect();
        AreaManager {
            dev,
            areas,
            active: 0,
            scratch: descs.len().saturating_sub(1),
        }
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Formats every area: erase, write a fresh header, assign sequential
    /// ids `0..n-1`, and designate the last area as scratch (`spec.md`
    /// §4.G `format`).
    pub fn format(&mut self) -> Result<()> {
        let n = self.areas.len();
        for (i, area) in self.areas.iter_mut().enumerate() {
            self.dev.erase(area.offset, area.length)?;
            let is_scratch = i == n - 1;
            let header = AreaHeader {
                magic: AREA_MAGIC,
                id: if is_scratch { AREA_ID_NONE } else { i as u32 },
                gc_seq: 0,
            };
            let mut buf = [0u8; AREA_HEADER_LEN as usize];
            header.encode(&mut buf);
            self.dev.write(area.offset, &buf)?;
            area.id = if is_scratch { None } else { Some(i as u32) };
            area.gc_seq = 0;
            area.cursor = AREA_HEADER_LEN;
            area.live_bytes = 0;
        }
        self.active = 0;
        self.scratch = n - 1;
        Ok(())
    }

    /// Reads and validates the header of area `i`.
    pub fn read_header(&mut self, i: usize) -> Result<AreaHeader> {
        let area = &self.areas[i];
        let mut buf = [0u8; AREA_HEADER_LEN as usize];
        self.dev.read(area.offset, &mut buf)?;
        AreaHeader::decode(&buf).ok_or(Error::Corrupt)
    }

    /// Allocates `size` bytes from the active area, falling back to the
    /// next area with free space. Returns [`Error::OutOfSpace`] if none
    /// has room, which the caller (component G) turns into one GC attempt.
    pub fn allocate(&mut self, size: u32) -> Result<FlashLocation> {
        let n = self.areas.len();
        for step in 0..n {
            let i = (self.active + step) % n;
            let area = &self.areas[i];
            if area.is_scratch() {
                continue;
            }
            if area.free_space() >= size {
                let loc = FlashLocation::new(i, area.cursor);
                self.active = i;
                return Ok(loc);
            }
        }
        Err(Error::OutOfSpace)
    }

    /// Writes `buf` at the next free offset of area `i`, advancing its
    /// cursor, and returns the location it was written at.
    pub fn append(&mut self, i: usize, buf: &[u8]) -> Result<FlashLocation> {
        let area = &self.areas[i];
        let off = area.offset + area.cursor;
        self.dev.write(off, buf)?;
        let loc = FlashLocation::new(i, area.cursor);
        let area = &mut self.areas[i];
        area.cursor += buf.len() as u32;
        area.live_bytes += buf.len() as u32;
        Ok(loc)
    }

    /// Reads `buf.len()` bytes at `loc`.
    pub fn read_at(&mut self, loc: FlashLocation, buf: &mut [u8]) -> Result<()> {
        let area = &self.areas[loc.area()];
        self.dev.read(area.offset + loc.offset(), buf)
    }

    /// Reads up to `max_len` bytes starting at `loc`, clamped to the area's
    /// bound, used by the record codec to check for a truncated trailing
    /// record.
    pub fn read_tail(&mut self, loc: FlashLocation, max_len: u32, buf: &mut [u8]) -> Result<usize> {
        let area = &self.areas[loc.area()];
        let avail = area.length.saturating_sub(loc.offset()).min(max_len) as usize;
        let n = avail.min(buf.len());
        self.dev.read(area.offset + loc.offset(), &mut buf[..n])?;
        Ok(n)
    }

    /// Marks area `i` as scratch: erases it and writes a scratch header.
    pub fn mark_scratch(&mut self, i: usize) -> Result<()> {
        let area = &self.areas[i];
        self.dev.erase(area.offset, area.length)?;
        let header = AreaHeader {
            magic: AREA_MAGIC,
            id: AREA_ID_NONE,
            gc_seq: area.gc_seq,
        };
        let mut buf = [0u8; AREA_HEADER_LEN as usize];
        header.encode(&mut buf);
        self.dev.write(area.offset, &buf)?;
        let area = &mut self.areas[i];
        area.id = None;
        area.cursor = AREA_HEADER_LEN;
        area.live_bytes = 0;
        self.scratch = i;
        Ok(())
    }

    /// Promotes the scratch area to carry `id` at sequence number `gc_seq`,
    /// recording the change in its in-memory header (the on-flash header
    /// was already written when the area was erased into scratch; GC
    /// rewrites it once compaction of the new contents begins).
    pub fn promote_scratch(&mut self, id: u32, gc_seq: u8) -> Result<()> {
        let i = self.scratch;
        let area = &self.areas[i];
        let header = AreaHeader {
            magic: AREA_MAGIC,
            id,
            gc_seq,
        };
        let mut buf = [0u8; AREA_HEADER_LEN as usize];
        header.encode(&mut buf);
        self.dev.write(area.offset, &buf)?;
        let area = &mut self.areas[i];
        area.id = Some(id);
        area.gc_seq = gc_seq;
        self.active = i;
        Ok(())
    }
}
