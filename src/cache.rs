//! Component H: the inode metadata cache and the block data cache
//! (`spec.md` §4.H).
//!
//! The inode cache is a conventional bounded LRU keyed by id. The block
//! cache holds a single contiguous byte range per recently-read file: a
//! read that overlaps or is adjacent to the cached range extends it, a
//! disjoint read discards it and starts a fresh one. Both are cleared on
//! write, close, or unlink of the data they cover.

use crate::id::RecordId;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

/// The decoded fields of an inode worth caching to avoid a flash re-read
/// on repeated lookups.
#[derive(Debug, Clone)]
pub struct CachedInode {
    pub name: Vec<u8>,
    pub parent: RecordId,
}

/// A bounded LRU cache of inode metadata.
pub struct InodeCache {
    capacity: usize,
    entries: BTreeMap<RecordId, CachedInode>,
    /// Most-recently-used id at the front.
    order: VecDeque<RecordId>,
}

impl InodeCache {
    pub fn new(capacity: usize) -> InodeCache {
        InodeCache {
            capacity,
            entries: BTreeMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, id: RecordId) {
        if let Some(pos) = self.order.iter().position(|&k| k == id) {
            self.order.remove(pos);
        }
        self.order.push_front(id);
    }

    pub fn get(&mut self, id: RecordId) -> Option<&CachedInode> {
        if self.entries.contains_key(&id) {
            self.touch(id);
        }
        self.entries.get(&id)
    }

    pub fn insert(&mut self, id: RecordId, value: CachedInode) {
        if self.capacity == 0 {
            return;
        }
        self.entries.insert(id, value);
        self.touch(id);
        while self.entries.len() > self.capacity {
            if let Some(evict) = self.order.pop_back() {
                self.entries.remove(&evict);
            } else {
                break;
            }
        }
    }

    pub fn invalidate(&mut self, id: RecordId) {
        self.entries.remove(&id);
        if let Some(pos) = self.order.iter().position(|&k| k == id) {
            self.order.remove(pos);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

struct CachedRange {
    file: RecordId,
    start: u64,
    data: Vec<u8>,
}

/// A single-contiguous-range cache of file byte content.
pub struct BlockCache {
    max_blocks: usize,
    block_max_data_sz: u32,
    range: Option<CachedRange>,
}

impl BlockCache {
    pub fn new(num_cache_blocks: usize, block_max_data_sz: u32) -> BlockCache {
        BlockCache {
            max_blocks: num_cache_blocks,
            block_max_data_sz,
            range: None,
        }
    }

    fn capacity_bytes(&self) -> u64 {
        self.max_blocks as u64 * self.block_max_data_sz as u64
    }

    /// Returns cached bytes for `[start, start+len)` of `file`, if the
    /// whole span is currently covered.
    pub fn read(&self, file: RecordId, start: u64, len: usize) -> Option<&[u8]> {
        let r = self.range.as_ref()?;
        if r.file != file {
            return None;
        }
        let end = start.checked_add(len as u64)?;
        let r_end = r.start + r.data.len() as u64;
        if start < r.start || end > r_end {
            return None;
        }
        let off = (start - r.start) as usize;
        Some(&r.data[off..off + len])
    }

    /// Folds freshly-read `data` for `[start, start+data.len())` of `file`
    /// into the cache: extends the existing range when it overlaps or
    /// touches it and the file matches, otherwise replaces it outright.
    pub fn fill(&mut self, file: RecordId, start: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let end = start + data.len() as u64;
        let can_extend = match &self.range {
            Some(r) if r.file == file => {
                let r_end = r.start + r.data.len() as u64;
                let touches = start <= r_end && end >= r.start;
                let merged_len = end.max(r_end) - start.min(r.start);
                touches && merged_len <= self.capacity_bytes()
            }
            _ => false,
        };

        if can_extend {
            let r = self.range.as_mut().unwrap();
            let new_start = r.start.min(start);
            let new_end = (r.start + r.data.len() as u64).max(end);
            let mut merged = alloc::vec![0u8; (new_end - new_start) as usize];
            let old_off = (r.start - new_start) as usize;
            merged[old_off..old_off + r.data.len()].copy_from_slice(&r.data);
            let new_off = (start - new_start) as usize;
            merged[new_off..new_off + data.len()].copy_from_slice(data);
            r.start = new_start;
            r.data = merged;
        } else {
            let len = (data.len() as u64).min(self.capacity_bytes()) as usize;
            self.range = Some(CachedRange {
                file,
                start,
                data: data[..len].to_vec(),
            });
        }
    }

    /// Drops the cached range for `file`, if any (write, close, unlink).
    pub fn invalidate(&mut self, file: RecordId) {
        if matches!(&self.range, Some(r) if r.file == file) {
            self.range = None;
        }
    }

    pub fn clear(&mut self) {
        self.range = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Kind;

    fn fid(n: u32) -> RecordId {
        RecordId::new(Kind::File, n)
    }

    #[test]
    fn inode_cache_evicts_least_recently_used() {
        let mut c = InodeCache::new(2);
        c.insert(fid(0), CachedInode { name: alloc::vec![b'a'], parent: fid(9) });
        c.insert(fid(1), CachedInode { name: alloc::vec![b'b'], parent: fid(9) });
        c.get(fid(0)); // touch 0, making 1 the LRU
        c.insert(fid(2), CachedInode { name: alloc::vec![b'c'], parent: fid(9) });
        assert!(c.get(fid(0)).is_some());
        assert!(c.get(fid(1)).is_none());
        assert!(c.get(fid(2)).is_some());
    }

    #[test]
    fn block_cache_hit_within_cached_range() {
        let mut bc = BlockCache::new(4, 16);
        bc.fill(fid(0), 0, &[1, 2, 3, 4]);
        assert_eq!(bc.read(fid(0), 1, 2), Some(&[2, 3][..]));
    }

    #[test]
    fn block_cache_extends_on_adjacent_read() {
        let mut bc = BlockCache::new(4, 16);
        bc.fill(fid(0), 0, &[1, 2, 3, 4]);
        bc.fill(fid(0), 4, &[5, 6]);
        assert_eq!(bc.read(fid(0), 0, 6), Some(&[1, 2, 3, 4, 5, 6][..]));
    }

    #[test]
    fn block_cache_replaces_on_disjoint_read() {
        let mut bc = BlockCache::new(4, 16);
        bc.fill(fid(0), 0, &[1, 2, 3, 4]);
        bc.fill(fid(0), 100, &[9, 9]);
        assert_eq!(bc.read(fid(0), 0, 1), None);
        assert_eq!(bc.read(fid(0), 100, 2), Some(&[9, 9][..]));
    }

    #[test]
    fn block_cache_invalidate_clears_only_matching_file() {
        let mut bc = BlockCache::new(4, 16);
        bc.fill(fid(0), 0, &[1, 2, 3]);
        bc.invalidate(fid(1));
        assert_eq!(bc.read(fid(0), 0, 1), Some(&[1][..]));
        bc.invalidate(fid(0));
        assert_eq!(bc.read(fid(0), 0, 1), None);
    }
}
