//! Component I: garbage collection and wear leveling.
//!
//! Picks the live area with the oldest `gc_seq`, compacts its still-live
//! records into scratch, and rotates scratch and source (`spec.md` §4.I).
//! The scratch area is promoted (its header rewritten to carry the
//! source's logical id and `gc_seq + 1`) *before* records are copied, so a
//! crash mid-compaction leaves two areas sharing an id on flash — mount's
//! `detect` breaks the tie by `gc_seq` and reclaims the loser as scratch.

use crate::area::AreaManager;
use crate::error::{Error, Result};
use crate::flash::FlashDevice;
use crate::graph::Graph;
use crate::id::RecordId;
use crate::record::{self, Decoded};
use alloc::vec::Vec;

/// True if `a` is strictly older than `b` in 8-bit wraparound sequence
/// order (`spec.md` §4.I: "GC sequence numbers wrap at 256").
fn is_older(a: u8, b: u8) -> bool {
    (a.wrapping_sub(b) as i8) < 0
}

fn pick_source<D: FlashDevice>(areas: &AreaManager<D>) -> Result<usize> {
    let mut best: Option<usize> = None;
    for (i, area) in areas.areas.iter().enumerate() {
        if area.is_scratch() {
            continue;
        }
        best = match best {
            None => Some(i),
            Some(b) if is_older(area.gc_seq, areas.areas[b].gc_seq) => Some(i),
            Some(b) => Some(b),
        };
    }
    best.ok_or(Error::Corrupt)
}

/// Runs one GC round: compacts the oldest live area into scratch. Returns
/// the index of the area that was just GC'd (now the new scratch).
///
/// `max_record_len` bounds the largest single record this file system can
/// write (derived from `Config::block_max_data_sz` and the name length
/// cap), sizing the scratch buffer used to shuttle a record's bytes
/// unchanged from its old location to its new one.
pub fn collect<D: FlashDevice>(
    areas: &mut AreaManager<D>,
    graph: &mut Graph,
    max_record_len: usize,
) -> Result<usize> {
    let source = pick_source(areas)?;
    let source_id = areas.areas[source].id.ok_or(Error::Corrupt)?;
    let new_seq = areas.areas[source].gc_seq.wrapping_add(1);
    let scratch = areas.scratch;

    areas.promote_scratch(source_id, new_seq)?;

    let mut buf = alloc::vec![0u8; max_record_len];

    let inode_ids: Vec<RecordId> = graph
        .inodes
        .iter()
        .filter(|(_, e)| e.location.is_some_and(|l| l.area() == source))
        .map(|(id, _)| id)
        .collect();
    for id in inode_ids {
        let old_loc = graph.inodes.find(id).unwrap().location.unwrap();
        let n = areas.read_tail(old_loc, max_record_len as u32, &mut buf)?;
        let total = match record::decode(&buf[..n])? {
            Decoded::Record(_, total) => total,
            Decoded::Torn | Decoded::Corrupt(_) => return Err(Error::Corrupt),
        };
        let new_loc = areas.append(scratch, &buf[..total])?;
        graph.inodes.find_mut(id).unwrap().location = Some(new_loc);
    }

    let block_ids: Vec<RecordId> = graph
        .blocks
        .iter()
        .filter(|(_, e)| e.location.is_some_and(|l| l.area() == source))
        .map(|(id, _)| id)
        .collect();
    for id in block_ids {
        let old_loc = graph.blocks.find(id).unwrap().location.unwrap();
        let n = areas.read_tail(old_loc, max_record_len as u32, &mut buf)?;
        let total = match record::decode(&buf[..n])? {
            Decoded::Record(_, total) => total,
            Decoded::Torn | Decoded::Corrupt(_) => return Err(Error::Corrupt),
        };
        let new_loc = areas.append(scratch, &buf[..total])?;
        graph.blocks.find_mut(id).unwrap().location = Some(new_loc);
    }

    areas.mark_scratch(source)?;
    Ok(source)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::flash::{AreaDescriptor, RamFlash};
    use crate::id::{Kind, ROOT_DIR};
    use crate::record::{encode_inode, InodeRecord};

    fn descs() -> Vec<AreaDescriptor> {
        alloc::vec![
            AreaDescriptor::new(0, 256),
            AreaDescriptor::new(256, 256),
            AreaDescriptor::new(512, 256),
        ]
    }

    #[test]
    fn picks_the_area_with_smallest_gc_seq() {
        let mut am = AreaManager::new(RamFlash::new(768), &descs());
        am.format().unwrap();
        am.areas[0].gc_seq = 5;
        am.areas[1].gc_seq = 2;
        assert_eq!(pick_source(&am).unwrap(), 1);
    }

    #[test]
    fn picker_handles_wraparound() {
        let mut am = AreaManager::new(RamFlash::new(768), &descs());
        am.format().unwrap();
        am.areas[0].gc_seq = 255;
        am.areas[1].gc_seq = 1; // "newer" than 255 once wrapped
        assert_eq!(pick_source(&am).unwrap(), 0);
    }

    #[test]
    fn collect_preserves_live_records_and_rotates_scratch() {
        let mut am = AreaManager::new(RamFlash::new(768), &descs());
        am.format().unwrap();
        let mut graph = Graph::new(8, 8);

        let rec = InodeRecord {
            id: ROOT_DIR,
            seq: 0,
            parent: Some(ROOT_DIR),
            name: alloc::vec![],
        };
        let bytes = encode_inode(&rec);
        let loc = am.append(0, &bytes).unwrap();
        graph.insert_dir(ROOT_DIR, loc, 0, ROOT_DIR, alloc::vec![]).unwrap();

        let live_was = 0;
        assert!(!am.areas[live_was].is_scratch());
        let gced = collect(&mut am, &mut graph, 256).unwrap();
        assert_eq!(gced, 0);
        assert!(am.areas[0].is_scratch());
        assert!(!am.areas[1].is_scratch());

        let new_loc = graph.inodes.find(ROOT_DIR).unwrap().location.unwrap();
        assert_eq!(new_loc.area(), 1);
        let mut buf = alloc::vec![0u8; bytes.len()];
        am.read_at(new_loc, &mut buf).unwrap();
        assert_eq!(buf, bytes);
    }
}
