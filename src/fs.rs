//! Component G: the public file API, tying every other component
//! together into one mountable file system (`spec.md` §4.G).

use crate::area::{AreaManager, FlashLocation};
use crate::cache::{BlockCache, CachedInode, InodeCache};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::flash::FlashDevice;
use crate::gc;
use crate::graph::{Graph, NameSource};
use crate::id::{IdAllocator, Kind, RecordId, ROOT_DIR};
use crate::mount::{self, Mounted};
use crate::path;
use crate::record::{self, max_block_record_len, max_inode_record_len, BlockRecord, Decoded, InodeRecord, Record};
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, warn};

bitflags! {
    /// Access-mode flags for [`Ffs::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ     = 0b0001;
        const WRITE    = 0b0010;
        const APPEND   = 0b0100;
        const TRUNCATE = 0b1000;
    }
}

/// An opaque handle to an open file, valid until [`Ffs::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(u32);

struct OpenFile {
    inode: RecordId,
    flags: OpenFlags,
    pos: u64,
}

/// The mounted file system. Generic over the [`FlashDevice`] it's built on.
pub struct Ffs<D: FlashDevice> {
    areas: AreaManager<D>,
    graph: Graph,
    ids: IdAllocator,
    config: Config,
    inode_cache: InodeCache,
    block_cache: BlockCache,
    open_files: Vec<Option<OpenFile>>,
    /// Latched `false` on the first [`Error::Hardware`] (`spec.md` §7): once
    /// unhealthy, every operation short-circuits with [`Error::Unhealthy`].
    healthy: bool,
}

/// Lets [`Graph`]'s sorted-child-insertion and path resolution read an
/// id's current name by decoding its record straight off flash. Built by
/// [`flash_names`] rather than a `&mut self` method, so that its borrow of
/// `areas`/`cache` stays visible to the compiler as disjoint from whatever
/// field of [`Ffs`] the caller is simultaneously borrowing (typically
/// `graph`, on whose method this is passed as a callback argument).
struct FlashNames<'a, D: FlashDevice> {
    areas: &'a mut AreaManager<D>,
    cache: &'a mut InodeCache,
    max_len: usize,
}

impl<D: FlashDevice> NameSource for FlashNames<'_, D> {
    fn name_of(&mut self, id: RecordId, location: FlashLocation) -> Result<Vec<u8>> {
        if let Some(cached) = self.cache.get(id) {
            return Ok(cached.name.clone());
        }
        let mut buf = alloc::vec![0u8; self.max_len];
        let n = self.areas.read_tail(location, self.max_len as u32, &mut buf)?;
        match record::decode(&buf[..n])? {
            Decoded::Record(Record::Inode(rec), _) => {
                self.cache.insert(id, CachedInode { name: rec.name.clone(), parent: rec.parent.unwrap_or(ROOT_DIR) });
                Ok(rec.name)
            }
            _ => Err(Error::Corrupt),
        }
    }
}

fn flash_names<'a, D: FlashDevice>(
    areas: &'a mut AreaManager<D>,
    cache: &'a mut InodeCache,
    max_len: usize,
) -> FlashNames<'a, D> {
    FlashNames { areas, cache, max_len }
}

impl<D: FlashDevice> Ffs<D> {
    fn max_inode_len(&self) -> usize {
        max_inode_record_len()
    }

    fn max_block_len(&self) -> usize {
        max_block_record_len(self.config.block_max_data_sz)
    }

    fn from_mounted(mounted: Mounted<D>, config: Config) -> Ffs<D> {
        Ffs {
            areas: mounted.areas,
            graph: mounted.graph,
            ids: mounted.ids,
            inode_cache: InodeCache::new(config.num_cache_inodes),
            block_cache: BlockCache::new(config.num_cache_blocks, config.block_max_data_sz),
            open_files: Vec::new(),
            healthy: true,
            config,
        }
    }

    /// Formats a fresh file system over `dev`.
    pub fn format(dev: D, config: Config) -> Result<Ffs<D>> {
        let mounted = mount::format(dev, &config)?;
        Ok(Ffs::from_mounted(mounted, config))
    }

    /// Mounts an existing file system, replaying its log.
    pub fn detect(dev: D, config: Config) -> Result<Ffs<D>> {
        let mounted = mount::detect(dev, &config)?;
        Ok(Ffs::from_mounted(mounted, config))
    }

    /// Tears down all in-RAM state and hands back the underlying device,
    /// without touching flash (`spec.md` §5 `misc_reset`). Chaining this
    /// into [`Ffs::detect`] simulates a reboot.
    pub fn into_device(self) -> D {
        self.areas.dev
    }

    fn check_healthy(&self) -> Result<()> {
        if self.healthy {
            Ok(())
        } else {
            Err(Error::Unhealthy)
        }
    }

    /// Runs `f`, and latches the file system unhealthy if it fails with a
    /// hardware error (`spec.md` §7).
    fn guard<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.check_healthy()?;
        let result = f(self);
        if let Err(Error::Hardware) = result {
            warn!("flash device reported a hardware failure; file system is now unhealthy");
            self.healthy = false;
        }
        result
    }

    fn write_inode_record(&mut self, rec: &InodeRecord) -> Result<FlashLocation> {
        let bytes = record::encode_inode(rec);
        self.append_with_gc(bytes.len() as u32, &bytes)
    }

    fn write_block_record(&mut self, rec: &BlockRecord) -> Result<FlashLocation> {
        let bytes = record::encode_block(rec);
        self.append_with_gc(bytes.len() as u32, &bytes)
    }

    /// Allocates space for `bytes`, running one GC round and retrying once
    /// if the file system is out of space (`spec.md` §4.I).
    fn append_with_gc(&mut self, size: u32, bytes: &[u8]) -> Result<FlashLocation> {
        match self.areas.allocate(size) {
            Ok(loc) => self.areas.append(loc.area(), bytes),
            Err(Error::OutOfSpace) => {
                let max_len = self.max_inode_len().max(self.max_block_len());
                gc::collect(&mut self.areas, &mut self.graph, max_len)?;
                let loc = self.areas.allocate(size)?;
                self.areas.append(loc.area(), bytes)
            }
            Err(e) => Err(e),
        }
    }

    fn read_block_data(&mut self, loc: FlashLocation) -> Result<Vec<u8>> {
        let max_len = self.max_block_len();
        let mut buf = alloc::vec![0u8; max_len];
        let n = self.areas.read_tail(loc, max_len as u32, &mut buf)?;
        match record::decode(&buf[..n])? {
            Decoded::Record(Record::Block(rec), _) => Ok(rec.data),
            _ => Err(Error::Corrupt),
        }
    }

    /// Resolves `path` to an inode id.
    pub fn lookup(&mut self, path: &[u8]) -> Result<RecordId> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            path::resolve(&this.graph, &mut names, path)
        })
    }

    /// Creates an empty directory at `path`.
    pub fn mkdir(&mut self, path: &[u8]) -> Result<()> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let (parent, leaf) = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve_parent(&this.graph, &mut names, path)?
            };
            if leaf.len() > record::MAX_NAME_LEN {
                return Err(Error::InvalidArgument);
            }
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            if this.graph.lookup_child(&mut names, parent, leaf)?.is_some() {
                return Err(Error::AlreadyExists);
            }
            let id = this.ids.alloc(Kind::Directory);
            let rec = InodeRecord { id, seq: 0, parent: Some(parent), name: leaf.to_vec() };
            let loc = this.write_inode_record(&rec)?;
            this.graph.insert_dir(id, loc, 0, parent, Vec::new())?;
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            this.graph.add_child(&mut names, parent, id, loc)?;
            Ok(())
        })
    }

    /// Opens (and, with [`OpenFlags::WRITE`], creates) the file at `path`.
    pub fn open(&mut self, path: &[u8], flags: OpenFlags) -> Result<FileHandle> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let (parent, leaf) = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve_parent(&this.graph, &mut names, path)?
            };
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            let existing = this.graph.lookup_child(&mut names, parent, leaf)?;
            let inode = match existing {
                Some(id) => {
                    if !id.is_file() {
                        return Err(Error::InvalidArgument);
                    }
                    if flags.contains(OpenFlags::TRUNCATE) {
                        // A new id replaces the old one outright rather than
                        // clearing it in place: the old id is soft-deleted by
                        // its own tombstone record, so a crash between the
                        // truncation and the first subsequent write can never
                        // resurrect the old content without also replaying
                        // the record of its deletion (`spec.md` §4.G:
                        // "writes a new inode record with a new id; old id
                        // becomes soft-deleted").
                        this.unlink_entry(parent, id)?;
                        this.create_file(parent, leaf)?
                    } else {
                        id
                    }
                }
                None => {
                    if !flags.contains(OpenFlags::WRITE) {
                        return Err(Error::NotFound);
                    }
                    this.create_file(parent, leaf)?
                }
            };
            this.graph.file_mut(inode)?.refcnt += 1;
            let pos = if flags.contains(OpenFlags::APPEND) {
                this.graph.file(inode)?.length
            } else {
                0
            };
            let handle_idx = this
                .open_files
                .iter()
                .position(Option::is_none)
                .unwrap_or(this.open_files.len());
            let of = OpenFile { inode, flags, pos };
            if handle_idx == this.open_files.len() {
                this.open_files.push(Some(of));
            } else {
                this.open_files[handle_idx] = Some(of);
            }
            debug!("opened inode {inode} as handle {handle_idx}");
            Ok(FileHandle(handle_idx as u32))
        })
    }

    /// Creates a fresh, empty file named `leaf` inside `parent` and links
    /// it into the directory. Shared by `open`'s create-on-`WRITE` path and
    /// its `TRUNCATE`-onto-an-existing-file path (which first tombstones
    /// the old id via `unlink_entry`, then calls this to mint a new one).
    fn create_file(&mut self, parent: RecordId, leaf: &[u8]) -> Result<RecordId> {
        if leaf.len() > record::MAX_NAME_LEN {
            return Err(Error::InvalidArgument);
        }
        let id = self.ids.alloc(Kind::File);
        let rec = InodeRecord { id, seq: 0, parent: Some(parent), name: leaf.to_vec() };
        let loc = self.write_inode_record(&rec)?;
        self.graph.insert_file(id, loc, 0, parent)?;
        let max_len = max_inode_record_len();
        let mut names = flash_names(&mut self.areas, &mut self.inode_cache, max_len);
        self.graph.add_child(&mut names, parent, id, loc)?;
        Ok(id)
    }

    fn open_file(&self, handle: FileHandle) -> Result<&OpenFile> {
        self.open_files
            .get(handle.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidArgument)
    }

    fn open_file_mut(&mut self, handle: FileHandle) -> Result<&mut OpenFile> {
        self.open_files
            .get_mut(handle.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidArgument)
    }

    /// Closes `handle`. Drops a reference to the underlying file; if that
    /// was the last reference and the file was already unlinked, its block
    /// chain and inode entry are freed now (`spec.md` §4.G: "decrements
    /// refcnt; if zero and the inode has been unlinked, frees block chain").
    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        self.guard(|this| {
            let of = this
                .open_files
                .get_mut(handle.0 as usize)
                .and_then(Option::take)
                .ok_or(Error::InvalidArgument)?;
            this.block_cache.invalidate(of.inode);
            if let Ok(file) = this.graph.file_mut(of.inode) {
                file.refcnt = file.refcnt.saturating_sub(1);
                if file.refcnt == 0 && file.unlinked {
                    for b in this.graph.block_walk(of.inode) {
                        this.graph.remove_block(b);
                    }
                    this.graph.remove_inode(of.inode);
                    this.inode_cache.invalidate(of.inode);
                }
            }
            Ok(())
        })
    }

    fn block_ranges(&self, file: RecordId) -> Vec<(RecordId, u64, u64)> {
        let mut out = Vec::new();
        let mut off = 0u64;
        for id in self.graph.block_walk(file) {
            let len = self.graph.blocks.find(id).map_or(0, |b| b.data_len as u64);
            out.push((id, off, off + len));
            off += len;
        }
        out
    }

    /// Reads up to `buf.len()` bytes at the handle's current position,
    /// advancing it by the amount read.
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        self.guard(|this| {
            let of = this.open_file(handle)?;
            if !of.flags.contains(OpenFlags::READ) {
                return Err(Error::InvalidArgument);
            }
            let (file, mut pos) = (of.inode, of.pos);
            let length = this.graph.file(file)?.length;
            let want = (buf.len() as u64).min(length.saturating_sub(pos)) as usize;
            let mut done = 0;
            while done < want {
                let at = pos + done as u64;
                if let Some(cached) = this.block_cache.read(file, at, want - done) {
                    buf[done..done + cached.len()].copy_from_slice(cached);
                    done += cached.len();
                    continue;
                }
                let ranges = this.block_ranges(file);
                let Some(&(bid, start, end)) = ranges.iter().find(|&&(_, s, e)| at >= s && at < e) else {
                    break;
                };
                let loc = this.graph.blocks.find(bid).and_then(|b| b.location).ok_or(Error::Corrupt)?;
                let data = this.read_block_data(loc)?;
                this.block_cache.fill(file, start, &data);
                let off = (at - start) as usize;
                let n = (data.len() - off).min(want - done).min((end - at) as usize);
                buf[done..done + n].copy_from_slice(&data[off..off + n]);
                done += n;
            }
            pos += done as u64;
            this.open_file_mut(handle)?.pos = pos;
            Ok(done)
        })
    }

    /// Writes `data` at the handle's current position (or at EOF if opened
    /// with [`OpenFlags::APPEND`]), overwriting any existing bytes in
    /// range. Since a committed block record is immutable, overwriting any
    /// part of it requires rewriting it and every block after it in the
    /// chain (each carries its predecessor's id in `prev`), splicing in the
    /// new bytes and recreating the tail (`spec.md` §4.G).
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        self.guard(|this| {
            if data.is_empty() {
                return Ok(0);
            }
            let of = this.open_file(handle)?;
            if !of.flags.contains(OpenFlags::WRITE) {
                return Err(Error::InvalidArgument);
            }
            let file = of.inode;
            let pos = if of.flags.contains(OpenFlags::APPEND) {
                this.graph.file(file)?.length
            } else {
                of.pos
            };
            this.block_cache.invalidate(file);

            let ranges = this.block_ranges(file);
            let write_end = pos + data.len() as u64;
            let first_touched = ranges.iter().position(|&(_, _, end)| end > pos);

            let (stale, mut carry_prev) = match first_touched {
                Some(idx) => {
                    let prev = if idx == 0 { None } else { Some(ranges[idx - 1].0) };
                    (ranges[idx..].to_vec(), prev)
                }
                None => (Vec::new(), ranges.last().map(|r| r.0)),
            };

            let max_sz = this.config.block_max_data_sz as u64;
            let mut new_blocks: Vec<alloc::vec::Vec<u8>> = Vec::new();
            if !stale.is_empty() {
                let merged_start = stale[0].1;
                let merged_end = stale.last().unwrap().2.max(write_end);
                let mut merged = alloc::vec![0u8; (merged_end - merged_start) as usize];
                for &(bid, start, end) in &stale {
                    let loc = this.graph.blocks.find(bid).and_then(|b| b.location).ok_or(Error::Corrupt)?;
                    let old = this.read_block_data(loc)?;
                    let off = (start - merged_start) as usize;
                    merged[off..off + (end - start) as usize].copy_from_slice(&old);
                }
                let data_off = (pos - merged_start) as usize;
                merged[data_off..data_off + data.len()].copy_from_slice(data);
                for chunk in merged.chunks(max_sz as usize) {
                    new_blocks.push(chunk.to_vec());
                }
            } else {
                // Pure append, possibly past EOF: zero-fill the gap, if any,
                // between the old end of file and `pos` (`spec.md` §4.G
                // treats a seek-then-write past EOF as creating a hole).
                let old_end = ranges.last().map_or(0, |r| r.2);
                let gap = pos.saturating_sub(old_end) as usize;
                let mut padded = alloc::vec![0u8; gap];
                padded.extend_from_slice(data);
                for chunk in padded.chunks(max_sz as usize) {
                    new_blocks.push(chunk.to_vec());
                }
            }

            for old in &stale {
                this.graph.remove_block(old.0);
            }

            let mut last_new = carry_prev;
            for chunk in &new_blocks {
                let id = this.ids.alloc(Kind::Block);
                let rec = BlockRecord { id, seq: 0, inode_id: file, prev: last_new, data: chunk.clone() };
                let loc = this.write_block_record(&rec)?;
                this.graph.insert_block(id, loc, file, last_new, chunk.len() as u32)?;
                last_new = Some(id);
            }
            carry_prev = last_new;

            let f = this.graph.file_mut(file)?;
            f.last_block = carry_prev.or(f.last_block);
            f.length = f.length.max(write_end);

            let of = this.open_file_mut(handle)?;
            if !of.flags.contains(OpenFlags::APPEND) {
                of.pos = write_end;
            }
            Ok(data.len())
        })
    }

    /// Moves `handle`'s position to `offset` bytes from the start of the
    /// file.
    pub fn seek(&mut self, handle: FileHandle, offset: u64) -> Result<()> {
        self.guard(|this| {
            this.open_file_mut(handle)?.pos = offset;
            Ok(())
        })
    }

    pub fn getpos(&mut self, handle: FileHandle) -> Result<u64> {
        self.guard(|this| Ok(this.open_file(handle)?.pos))
    }

    pub fn file_len(&mut self, path: &[u8]) -> Result<u64> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let id = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve(&this.graph, &mut names, path)?
            };
            Ok(this.graph.file(id)?.length)
        })
    }

    /// Number of block records currently backing the file at `path`. Block
    /// count is the property exercised heavily by the test suite
    /// (`spec.md` §4.G), since it's the only externally visible signature
    /// of how overwrite splicing and GC compaction reshape a file's chain.
    pub fn block_count(&mut self, path: &[u8]) -> Result<usize> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let id = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve(&this.graph, &mut names, path)?
            };
            this.graph.file(id)?;
            Ok(this.graph.block_walk(id).len())
        })
    }

    /// Removes the directory entry at `path`. A file with open handles is
    /// marked unlinked and kept (along with its blocks) until its last
    /// handle closes; a directory's children are unlinked first, depth
    /// first, then the directory itself (`spec.md` §4.G).
    pub fn unlink(&mut self, path: &[u8]) -> Result<()> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let (parent, leaf) = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve_parent(&this.graph, &mut names, path)?
            };
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            let id = this.graph.lookup_child(&mut names, parent, leaf)?.ok_or(Error::NotFound)?;
            this.unlink_entry(parent, id)
        })
    }

    /// Removes `id`, a direct child of `parent`, from the namespace. Used
    /// both by the top-level `unlink` and, recursively, to drain a
    /// directory's children before removing the directory itself.
    fn unlink_entry(&mut self, parent: RecordId, id: RecordId) -> Result<()> {
        if id.is_directory() {
            let children: Vec<RecordId> = self.graph.dir(id)?.children.iter().map(|&(c, _)| c).collect();
            for child in children {
                self.unlink_entry(id, child)?;
            }
        } else if self.graph.file(id)?.refcnt > 0 {
            self.graph.file_mut(id)?.unlinked = true;
        }
        // `seq` must keep increasing past whatever the id was last written
        // with (creation, a prior rename, ...) so this tombstone wins the
        // replay tie-break on remount (`spec.md` §3: "seq is monotone per
        // id"); a hardcoded seq would let an earlier mutation's record
        // outrank this one during `detect`.
        let next_seq = self.graph.seq(id)?.wrapping_add(1);
        let rec = InodeRecord { id, seq: next_seq, parent: None, name: Vec::new() };
        self.write_inode_record(&rec)?;
        self.graph.remove_child(parent, id)?;
        if !id.is_directory() && self.graph.file(id)?.refcnt == 0 {
            for b in self.graph.block_walk(id) {
                self.graph.remove_block(b);
            }
            self.graph.remove_inode(id);
        } else if id.is_directory() {
            self.graph.remove_inode(id);
        } else {
            self.graph.set_seq(id, next_seq)?;
        }
        self.inode_cache.invalidate(id);
        self.block_cache.invalidate(id);
        Ok(())
    }

    /// Moves the entry at `from` to `to`. If `to` already names an entry,
    /// it is replaced (`spec.md` §4.G): an open handle on the replaced
    /// entry keeps working until its last close, the same as a direct
    /// `unlink` (`spec.md` §9, §5 "open handles").
    pub fn rename(&mut self, from: &[u8], to: &[u8]) -> Result<()> {
        self.guard(|this| {
            let max_len = max_inode_record_len();
            let (old_parent, old_leaf) = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve_parent(&this.graph, &mut names, from)?
            };
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            let id = this.graph.lookup_child(&mut names, old_parent, old_leaf)?.ok_or(Error::NotFound)?;
            let (new_parent, new_leaf) = {
                let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
                path::resolve_parent(&this.graph, &mut names, to)?
            };
            if new_leaf.len() > record::MAX_NAME_LEN {
                return Err(Error::InvalidArgument);
            }
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            if let Some(existing_id) = this.graph.lookup_child(&mut names, new_parent, new_leaf)? {
                if existing_id != id {
                    this.unlink_entry(new_parent, existing_id)?;
                }
            }
            // As in `unlink_entry`, this record must outrank whatever `id`
            // was last written with, or a second rename loses the replay
            // tie-break on remount and the first rename "wins" instead.
            let next_seq = this.graph.seq(id)?.wrapping_add(1);
            let rec = InodeRecord { id, seq: next_seq, parent: Some(new_parent), name: new_leaf.to_vec() };
            let loc = this.write_inode_record(&rec)?;
            this.graph.remove_child(old_parent, id)?;
            this.graph.set_parent(id, new_parent)?;
            {
                let entry = this.graph.inodes.find_mut(id).ok_or(Error::NotFound)?;
                entry.location = Some(loc);
                entry.seq = next_seq;
            }
            let mut names = flash_names(&mut this.areas, &mut this.inode_cache, max_len);
            this.graph.add_child(&mut names, new_parent, id, loc)?;
            this.inode_cache.invalidate(id);
            Ok(())
        })
    }

    /// Runs one GC round, compacting the oldest flash area into scratch.
    pub fn gc(&mut self) -> Result<()> {
        self.guard(|this| {
            let max_len = this.max_inode_len().max(this.max_block_len());
            gc::collect(&mut this.areas, &mut this.graph, max_len)?;
            Ok(())
        })
    }
}
