//! Component E: the inode/block graph.
//!
//! Sits on top of the hash index (component D) and gives it shape: two
//! arenas, one for inodes (directories and files) and one for blocks, plus
//! the operations that keep a directory's children sorted and a file's
//! blocks linked (`spec.md` §4.E).
//!
//! Directory children are kept sorted by name, but names themselves are
//! not cached here — `spec.md`'s design notes call for a small RAM
//! footprint, so comparisons go back through a [`NameSource`] that reads
//! the current name for an id off flash. Each child is stored alongside
//! its own current [`FlashLocation`] precisely so that lookup, rather
//! than re-borrowing the graph it's already a method of, can hand that
//! location straight to the `NameSource` callback.

use crate::area::FlashLocation;
use crate::error::{Error, Result};
use crate::hash::HashIndex;
use crate::id::RecordId;
use alloc::vec::Vec;

/// A directory's contents: a stable parent and a name-sorted child list.
#[derive(Debug, Clone)]
pub struct DirNode {
    pub parent: RecordId,
    pub children: Vec<(RecordId, FlashLocation)>,
}

/// A file's bookkeeping: link to its last block and the running length
/// used to answer `file_len` without walking the block chain.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub parent: RecordId,
    pub refcnt: u32,
    pub unlinked: bool,
    pub last_block: Option<RecordId>,
    pub length: u64,
}

#[derive(Debug, Clone)]
pub enum InodeKind {
    Dir(DirNode),
    File(FileNode),
}

/// An inode's hash-table entry: its most recent on-flash location, the
/// `seq` that record was written with, and its live shape. `seq` must be
/// carried here (not just on-flash) so that every subsequent mutation of
/// the id — rename, unlink, truncate-replace — can write a strictly
/// greater `seq` than the last; `detect`'s replay only supersedes a
/// tentative record when the new `seq` is greater (`spec.md` §3 "seq is
/// monotone per id"), so re-using a stale value would let a later
/// mutation lose a replay tie against an earlier one.
#[derive(Debug, Clone)]
pub struct InodeEntry {
    pub location: Option<FlashLocation>,
    pub seq: u32,
    pub kind: InodeKind,
}

/// A block's hash-table entry.
#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub location: Option<FlashLocation>,
    pub inode_id: RecordId,
    pub prev: Option<RecordId>,
    pub data_len: u32,
}

/// Resolves an id's current name, given its current flash location, by
/// reading and decoding the record there. Implemented by whichever caller
/// holds the area manager (component G, or the mount-time replayer), since
/// `Graph` itself never touches flash. Taking the location as a parameter
/// (rather than looking it up from the graph) keeps the implementor free
/// of any borrow on `Graph`, which callers are simultaneously mutating.
pub trait NameSource {
    fn name_of(&mut self, id: RecordId, location: FlashLocation) -> Result<Vec<u8>>;
}

/// The live inode/block graph: two hash indices, sized independently
/// (`spec.md` §4.E: inode and block capacities are configured separately).
pub struct Graph {
    pub inodes: HashIndex<InodeEntry>,
    pub blocks: HashIndex<BlockEntry>,
}

impl Graph {
    pub fn new(num_inodes: usize, num_blocks: usize) -> Graph {
        Graph {
            inodes: HashIndex::new(num_inodes),
            blocks: HashIndex::new(num_blocks),
        }
    }

    pub fn insert_dir(
        &mut self,
        id: RecordId,
        location: FlashLocation,
        seq: u32,
        parent: RecordId,
        children: Vec<(RecordId, FlashLocation)>,
    ) -> Result<()> {
        self.inodes.insert(
            id,
            InodeEntry {
                location: Some(location),
                seq,
                kind: InodeKind::Dir(DirNode { parent, children }),
            },
        )
    }

    pub fn insert_file(&mut self, id: RecordId, location: FlashLocation, seq: u32, parent: RecordId) -> Result<()> {
        self.inodes.insert(
            id,
            InodeEntry {
                location: Some(location),
                seq,
                kind: InodeKind::File(FileNode {
                    parent,
                    refcnt: 0,
                    unlinked: false,
                    last_block: None,
                    length: 0,
                }),
            },
        )
    }

    /// Current `seq` of an inode's last-written record, for computing the
    /// next mutation's `seq` (`spec.md` §3: "seq is monotone per id").
    pub fn seq(&self, id: RecordId) -> Result<u32> {
        Ok(self.inodes.find(id).ok_or(Error::NotFound)?.seq)
    }

    pub fn set_seq(&mut self, id: RecordId, seq: u32) -> Result<()> {
        self.inodes.find_mut(id).ok_or(Error::NotFound)?.seq = seq;
        Ok(())
    }

    pub fn insert_block(
        &mut self,
        id: RecordId,
        location: FlashLocation,
        inode_id: RecordId,
        prev: Option<RecordId>,
        data_len: u32,
    ) -> Result<()> {
        self.blocks.insert(
            id,
            BlockEntry {
                location: Some(location),
                inode_id,
                prev,
                data_len,
            },
        )
    }

    pub fn remove_inode(&mut self, id: RecordId) -> Option<InodeEntry> {
        self.inodes.remove(id)
    }

    pub fn remove_block(&mut self, id: RecordId) -> Option<BlockEntry> {
        self.blocks.remove(id)
    }

    pub fn dir(&self, id: RecordId) -> Result<&DirNode> {
        match &self.inodes.find(id).ok_or(Error::NotFound)?.kind {
            InodeKind::Dir(d) => Ok(d),
            InodeKind::File(_) => Err(Error::InvalidArgument),
        }
    }

    pub fn dir_mut(&mut self, id: RecordId) -> Result<&mut DirNode> {
        match &mut self.inodes.find_mut(id).ok_or(Error::NotFound)?.kind {
            InodeKind::Dir(d) => Ok(d),
            InodeKind::File(_) => Err(Error::InvalidArgument),
        }
    }

    pub fn file(&self, id: RecordId) -> Result<&FileNode> {
        match &self.inodes.find(id).ok_or(Error::NotFound)?.kind {
            InodeKind::File(f) => Ok(f),
            InodeKind::Dir(_) => Err(Error::InvalidArgument),
        }
    }

    pub fn file_mut(&mut self, id: RecordId) -> Result<&mut FileNode> {
        match &mut self.inodes.find_mut(id).ok_or(Error::NotFound)?.kind {
            InodeKind::File(f) => Ok(f),
            InodeKind::Dir(_) => Err(Error::InvalidArgument),
        }
    }

    /// Finds `name` among `dir`'s children, reading each candidate's current
    /// name off flash via `names` until it matches or the children run out.
    pub fn lookup_child(
        &self,
        names: &mut dyn NameSource,
        dir: RecordId,
        name: &[u8],
    ) -> Result<Option<RecordId>> {
        for &(child, loc) in &self.dir(dir)?.children {
            if names.name_of(child, loc)? == name {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    /// Inserts `child` (currently at `location`) into `dir`'s children,
    /// keeping them sorted by name. Fails with [`Error::AlreadyExists`] if a
    /// child with the same name is already present.
    pub fn add_child(
        &mut self,
        names: &mut dyn NameSource,
        dir: RecordId,
        child: RecordId,
        location: FlashLocation,
    ) -> Result<()> {
        let new_name = names.name_of(child, location)?;
        let children = self.dir(dir)?.children.clone();
        let mut insert_at = children.len();
        for (i, &(existing, existing_loc)) in children.iter().enumerate() {
            let existing_name = names.name_of(existing, existing_loc)?;
            if existing_name == new_name {
                return Err(Error::AlreadyExists);
            }
            if existing_name.as_slice() > new_name.as_slice() {
                insert_at = i;
                break;
            }
        }
        self.dir_mut(dir)?.children.insert(insert_at, (child, location));
        Ok(())
    }

    pub fn remove_child(&mut self, dir: RecordId, child: RecordId) -> Result<()> {
        let d = self.dir_mut(dir)?;
        let pos = d.children.iter().position(|&(c, _)| c == child).ok_or(Error::NotFound)?;
        d.children.remove(pos);
        Ok(())
    }

    /// Re-parents an inode (used by `rename` across directories and by
    /// mount-time orphan relocation into `lost+found`).
    pub fn set_parent(&mut self, id: RecordId, new_parent: RecordId) -> Result<()> {
        match &mut self.inodes.find_mut(id).ok_or(Error::NotFound)?.kind {
            InodeKind::Dir(d) => d.parent = new_parent,
            InodeKind::File(f) => f.parent = new_parent,
        }
        Ok(())
    }

    /// Appends `block` to `file`'s block chain as the new last block.
    pub fn block_append(
        &mut self,
        file: RecordId,
        block: RecordId,
        location: FlashLocation,
        data_len: u32,
    ) -> Result<()> {
        let prev = self.file(file)?.last_block;
        self.insert_block(block, location, file, prev, data_len)?;
        self.file_mut(file)?.last_block = Some(block);
        Ok(())
    }

    /// Returns `file`'s block ids in file order (oldest/first block first),
    /// walking the chain backward from `last_block` via `prev`.
    pub fn block_walk(&self, file: RecordId) -> Vec<RecordId> {
        let mut out = Vec::new();
        let mut cur = self.file(file).ok().and_then(|f| f.last_block);
        while let Some(id) = cur {
            out.push(id);
            cur = self.blocks.find(id).and_then(|b| b.prev);
        }
        out.reverse();
        out
    }
}
