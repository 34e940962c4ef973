//! A flash-resident hierarchical file system for raw NOR flash.
//!
//! Built around an append-only on-flash record log (component C), a
//! scratch-area garbage collector for wear leveling (component I), and an
//! in-memory hash-table graph (components D/E) that's rebuilt from the log
//! at mount time (component J). See `spec.md` for the full design.
//!
//! The crate is `no_std` plus `alloc`: it makes no assumptions about a
//! host OS, only about the [`FlashDevice`] contract. Enable the `std`
//! feature (on by default) to pull in [`RamFlash`], a `Vec`-backed test
//! device, and to build the crate's own test suite.

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

mod area;
mod cache;
mod config;
mod error;
mod flash;
mod fs;
mod gc;
mod graph;
mod hash;
mod id;
mod mount;
mod path;
mod record;

pub use area::{AreaDescriptor, FlashLocation};
pub use config::Config;
pub use error::{Error, Result};
pub use flash::FlashDevice;
#[cfg(feature = "std")]
pub use flash::RamFlash;
pub use fs::{FileHandle, Ffs, OpenFlags};
pub use id::{Kind, RecordId, LOST_FOUND_DIR, ROOT_DIR};
