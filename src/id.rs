//! Record IDs: 32-bit handles composed of a 2-bit kind tag and a 30-bit
//! monotonically increasing counter (`spec.md` §3).

use core::fmt;

const KIND_SHIFT: u32 = 30;
const COUNTER_MASK: u32 = (1 << KIND_SHIFT) - 1;

/// Discriminates the three record kinds that share the ID namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Kind {
    Directory = 0,
    File = 1,
    Block = 2,
}

impl Kind {
    const fn from_tag(tag: u32) -> Option<Kind> {
        match tag {
            0 => Some(Kind::Directory),
            1 => Some(Kind::File),
            2 => Some(Kind::Block),
            _ => None,
        }
    }
}

/// A stable, reboot-surviving identifier for an inode or block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u32);

/// Fixed ID of the root directory. Never allocated by [`IdAllocator`].
pub const ROOT_DIR: RecordId = RecordId::new(Kind::Directory, 0);
/// Fixed ID of the `lost+found` directory that mount-time recovery populates.
pub const LOST_FOUND_DIR: RecordId = RecordId::new(Kind::Directory, 1);

impl RecordId {
    pub const fn new(kind: Kind, counter: u32) -> RecordId {
        RecordId(((kind as u32) << KIND_SHIFT) | (counter & COUNTER_MASK))
    }

    /// Packs this ID's raw on-flash representation.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Unpacks a raw on-flash value. Returns `None` for an unrecognized kind
    /// tag (corrupt data).
    pub const fn from_raw(raw: u32) -> Option<RecordId> {
        match Kind::from_tag(raw >> KIND_SHIFT) {
            Some(_) => Some(RecordId(raw)),
            None => None,
        }
    }

    pub const fn kind(self) -> Kind {
        // `from_raw` is the only public constructor besides `new`, both of
        // which guarantee a valid tag.
        match Kind::from_tag(self.0 >> KIND_SHIFT) {
            Some(k) => k,
            None => unreachable!(),
        }
    }

    pub const fn counter(self) -> u32 {
        self.0 & COUNTER_MASK
    }

    pub const fn is_directory(self) -> bool {
        matches!(self.kind(), Kind::Directory)
    }

    pub const fn is_file(self) -> bool {
        matches!(self.kind(), Kind::File)
    }

    pub const fn is_block(self) -> bool {
        matches!(self.kind(), Kind::Block)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({:?}, {})", self.kind(), self.counter())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out fresh, monotonically increasing IDs per kind.
///
/// The two reserved directory IDs ([`ROOT_DIR`], [`LOST_FOUND_DIR`]) are
/// pre-claimed: the directory counter starts at 2.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_dir: u32,
    next_file: u32,
    next_block: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator {
            next_dir: 2,
            next_file: 0,
            next_block: 0,
        }
    }
}

impl IdAllocator {
    pub fn new() -> IdAllocator {
        Self::default()
    }

    /// Allocates a fresh ID of the given kind.
    pub fn alloc(&mut self, kind: Kind) -> RecordId {
        let counter = match kind {
            Kind::Directory => &mut self.next_dir,
            Kind::File => &mut self.next_file,
            Kind::Block => &mut self.next_block,
        };
        let id = RecordId::new(kind, *counter & COUNTER_MASK);
        *counter = counter.wrapping_add(1);
        id
    }

    /// Bumps the allocator so that IDs already observed on flash (during
    /// mount replay) are never handed out again.
    pub fn observe(&mut self, id: RecordId) {
        let counter = match id.kind() {
            Kind::Directory => &mut self.next_dir,
            Kind::File => &mut self.next_file,
            Kind::Block => &mut self.next_block,
        };
        if id.counter() >= *counter {
            *counter = id.counter() + 1;
        }
    }
}
