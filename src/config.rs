//! File system configuration: arena sizes, cache sizes, and the flash
//! area layout, all fixed at `init` time (`spec.md` §4.D, §4.H, §6).

use crate::flash::AreaDescriptor;
use alloc::vec::Vec;

/// Tuning knobs and the area layout for one [`crate::fs::Ffs`] instance.
///
/// There is no sensible default for `areas` (it depends on the flash
/// device being mounted), so callers always set it explicitly; the
/// [`Default`] impl exists only to let the rest of the struct use
/// struct-update syntax (`Config { areas, ..Default::default() }`).
#[derive(Debug, Clone)]
pub struct Config {
    /// Capacity of the inode hash index (directories + files).
    pub num_inodes: usize,
    /// Capacity of the block hash index.
    pub num_blocks: usize,
    /// Number of inodes the inode cache holds.
    pub num_cache_inodes: usize,
    /// Number of blocks the block cache holds.
    pub num_cache_blocks: usize,
    /// Maximum payload bytes carried by one block record.
    pub block_max_data_sz: u32,
    /// The flash areas this file system is built over. Must contain at
    /// least two (one scratch plus at least one live area).
    pub areas: Vec<AreaDescriptor>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            num_inodes: 128,
            num_blocks: 1024,
            num_cache_inodes: 16,
            num_cache_blocks: 32,
            block_max_data_sz: 2048,
            areas: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_update_syntax_works() {
        let cfg = Config {
            areas: alloc::vec![AreaDescriptor::new(0, 4096)],
            ..Default::default()
        };
        assert_eq!(cfg.areas.len(), 1);
        assert_eq!(cfg.num_inodes, 128);
    }
}
