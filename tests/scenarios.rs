//! End-to-end scenarios from `spec.md` §8, driven entirely through the
//! public [`Ffs`] API against the in-memory [`RamFlash`] test device.

use ffs::{AreaDescriptor, Config, Error, FlashDevice, Ffs, OpenFlags, RamFlash};

fn config(block_max_data_sz: u32, area_sizes: &[u32]) -> Config {
    let mut offset = 0u32;
    let areas = area_sizes
        .iter()
        .map(|&len| {
            let desc = AreaDescriptor::new(offset, len);
            offset += len;
            desc
        })
        .collect();
    Config {
        num_inodes: 64,
        num_blocks: 256,
        num_cache_inodes: 8,
        num_cache_blocks: 8,
        block_max_data_sz,
        areas,
    }
}

fn device(area_sizes: &[u32]) -> RamFlash {
    RamFlash::new(area_sizes.iter().sum::<u32>() as usize)
}

#[test]
fn mkdir_chain_and_failure_modes() {
    let sizes = [4096, 4096, 4096];
    let mut fs = Ffs::format(device(&sizes), config(64, &sizes)).unwrap();

    fs.mkdir(b"/a").unwrap();
    fs.mkdir(b"/a/b").unwrap();
    fs.mkdir(b"/a/b/c").unwrap();
    assert!(fs.lookup(b"/a/b/c").is_ok());

    assert_eq!(fs.mkdir(b"/x/y").unwrap_err(), Error::NotFound);
    assert_eq!(fs.mkdir(b"asdf").unwrap_err(), Error::InvalidArgument);
    assert_eq!(fs.mkdir(b"/a").unwrap_err(), Error::AlreadyExists);
}

#[test]
fn in_place_overwrite_stays_within_one_block() {
    let sizes = [4096, 4096, 4096];
    let mut fs = Ffs::format(device(&sizes), config(8, &sizes)).unwrap();

    let h = fs.open(b"/myfile.txt", OpenFlags::WRITE | OpenFlags::READ).unwrap();
    fs.write(h, b"abcdefgh").unwrap();
    assert_eq!(fs.block_count(b"/myfile.txt").unwrap(), 1);

    fs.seek(h, 3).unwrap();
    fs.write(h, b"12").unwrap();

    assert_eq!(fs.file_len(b"/myfile.txt").unwrap(), 8);
    assert_eq!(fs.block_count(b"/myfile.txt").unwrap(), 1);

    fs.seek(h, 0).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(fs.read(h, &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"abc12fgh");
}

#[test]
fn overwrite_spanning_a_block_boundary_rewrites_the_tail() {
    let sizes = [4096, 4096, 4096];
    let mut fs = Ffs::format(device(&sizes), config(8, &sizes)).unwrap();

    let h = fs.open(b"/two.txt", OpenFlags::WRITE | OpenFlags::READ).unwrap();
    fs.write(h, b"abcdefghijklmnop").unwrap(); // two 8-byte blocks
    assert_eq!(fs.block_count(b"/two.txt").unwrap(), 2);

    fs.seek(h, 7).unwrap();
    fs.write(h, b"123").unwrap();

    assert_eq!(fs.block_count(b"/two.txt").unwrap(), 2);
    fs.seek(h, 0).unwrap();
    let mut buf = [0u8; 16];
    assert_eq!(fs.read(h, &mut buf).unwrap(), 16);
    assert_eq!(&buf, b"abcdefg123klmnop");
}

#[test]
fn gc_preserves_block_count_and_contents() {
    let sizes = [4096, 4096, 4096];
    let block_sz = 16u32;
    let mut fs = Ffs::format(device(&sizes), config(block_sz, &sizes)).unwrap();

    let h = fs.open(b"/big", OpenFlags::WRITE | OpenFlags::READ).unwrap();
    let data: Vec<u8> = (0..5 * block_sz as usize).map(|i| (i % 251) as u8).collect();
    fs.write(h, &data).unwrap();
    assert_eq!(fs.block_count(b"/big").unwrap(), 5);

    fs.gc().unwrap();
    assert_eq!(fs.block_count(b"/big").unwrap(), 5);

    fs.seek(h, 0).unwrap();
    let mut buf = vec![0u8; data.len()];
    assert_eq!(fs.read(h, &mut buf).unwrap(), data.len());
    assert_eq!(buf, data);
}

#[test]
fn many_gc_rounds_survive_the_gc_seq_rollover() {
    // Five small areas, well past the 256-round point where the 8-bit
    // gc_seq wraps, checking only that wraparound never loses data
    // (the exact sequence-number histogram is gc.rs's own unit tests).
    let sizes = [1024, 1024, 1024, 1024, 1024];
    let block_sz = 16u32;
    let mut fs = Ffs::format(device(&sizes), config(block_sz, &sizes)).unwrap();

    fs.mkdir(b"/d").unwrap();
    let h = fs.open(b"/d/f", OpenFlags::WRITE | OpenFlags::READ).unwrap();
    fs.write(h, b"hello wear leveling").unwrap();

    for _ in 0..300 {
        fs.gc().unwrap();
    }

    fs.seek(h, 0).unwrap();
    let mut buf = [0u8; 19];
    assert_eq!(fs.read(h, &mut buf).unwrap(), 19);
    assert_eq!(&buf, b"hello wear leveling");
    assert!(fs.lookup(b"/d/f").is_ok());
}

/// Finds `needle` verbatim in the device's flash image and flips one of its
/// bytes, simulating bit rot inside an already-committed record.
fn corrupt_pattern(flash: &mut RamFlash, total_len: usize, needle: &[u8]) {
    let mut buf = vec![0u8; total_len];
    flash.read(0, &mut buf).unwrap();
    let pos = buf
        .windows(needle.len())
        .position(|w| w == needle)
        .expect("pattern not found on flash");
    let at = pos + needle.len() - 1;
    flash.corrupt_byte(at as u32, buf[at] ^ 0xFF);
}

#[test]
fn corrupted_block_drops_only_its_own_file_on_remount() {
    let sizes = [2048, 2048, 2048];
    let total: u32 = sizes.iter().sum();
    let cfg = config(32, &sizes);
    let mut fs = Ffs::format(device(&sizes), cfg.clone()).unwrap();

    fs.mkdir(b"/mydir").unwrap();
    let ha = fs.open(b"/mydir/a", OpenFlags::WRITE).unwrap();
    fs.write(ha, b"alpha-content").unwrap();
    fs.close(ha).unwrap();
    let hb = fs.open(b"/mydir/b", OpenFlags::WRITE).unwrap();
    fs.write(hb, b"bravo-content-unique").unwrap();
    fs.close(hb).unwrap();
    let hc = fs.open(b"/mydir/c", OpenFlags::WRITE).unwrap();
    fs.write(hc, b"charlie-content").unwrap();
    fs.close(hc).unwrap();

    let mut dev = fs.into_device();
    corrupt_pattern(&mut dev, total as usize, b"bravo-content-unique");

    let mut fs = Ffs::detect(dev, cfg).unwrap();
    assert_eq!(fs.lookup(b"/mydir/b").unwrap_err(), Error::NotFound);

    let ha = fs.open(b"/mydir/a", OpenFlags::READ).unwrap();
    let mut buf = [0u8; 13];
    fs.read(ha, &mut buf).unwrap();
    assert_eq!(&buf, b"alpha-content");

    let hc = fs.open(b"/mydir/c", OpenFlags::READ).unwrap();
    let mut buf = [0u8; 15];
    fs.read(hc, &mut buf).unwrap();
    assert_eq!(&buf, b"charlie-content");
}

#[test]
fn double_rename_survives_reboot() {
    let sizes = [2048, 2048, 2048];
    let cfg = config(32, &sizes);
    let mut fs = Ffs::format(device(&sizes), cfg.clone()).unwrap();

    fs.mkdir(b"/a").unwrap();
    fs.mkdir(b"/a/b").unwrap();
    fs.rename(b"/a/b", b"/a/c").unwrap();
    fs.rename(b"/a/c", b"/a/d").unwrap();

    let h = fs.open(b"/file1", OpenFlags::WRITE).unwrap();
    fs.write(h, b"payload").unwrap();
    fs.close(h).unwrap();
    fs.rename(b"/file1", b"/file2").unwrap();
    fs.rename(b"/file2", b"/file3").unwrap();

    let dev = fs.into_device();
    let mut fs = Ffs::detect(dev, cfg).unwrap();

    assert_eq!(fs.lookup(b"/a/b").unwrap_err(), Error::NotFound);
    assert_eq!(fs.lookup(b"/a/c").unwrap_err(), Error::NotFound);
    assert!(fs.lookup(b"/a/d").is_ok());

    assert_eq!(fs.lookup(b"/file1").unwrap_err(), Error::NotFound);
    assert_eq!(fs.lookup(b"/file2").unwrap_err(), Error::NotFound);
    let h = fs.open(b"/file3", OpenFlags::READ).unwrap();
    let mut buf = [0u8; 7];
    fs.read(h, &mut buf).unwrap();
    assert_eq!(&buf, b"payload");
}

#[test]
fn rename_then_unlink_does_not_resurrect_on_reboot() {
    let sizes = [2048, 2048, 2048];
    let cfg = config(32, &sizes);
    let mut fs = Ffs::format(device(&sizes), cfg.clone()).unwrap();

    let h = fs.open(b"/orig", OpenFlags::WRITE).unwrap();
    fs.write(h, b"gone soon").unwrap();
    fs.close(h).unwrap();
    fs.rename(b"/orig", b"/renamed").unwrap();
    fs.unlink(b"/renamed").unwrap();

    let dev = fs.into_device();
    let mut fs = Ffs::detect(dev, cfg).unwrap();

    assert_eq!(fs.lookup(b"/orig").unwrap_err(), Error::NotFound);
    assert_eq!(fs.lookup(b"/renamed").unwrap_err(), Error::NotFound);
}

#[test]
fn corrupted_directory_name_relocates_its_subtree_to_lost_and_found() {
    let sizes = [2048, 2048, 2048];
    let total: u32 = sizes.iter().sum();
    let cfg = config(32, &sizes);
    let mut fs = Ffs::format(device(&sizes), cfg.clone()).unwrap();

    fs.mkdir(b"/victim-directory-name").unwrap();
    let h = fs.open(b"/victim-directory-name/leaf.txt", OpenFlags::WRITE).unwrap();
    fs.write(h, b"still here").unwrap();
    fs.close(h).unwrap();

    let mut dev = fs.into_device();
    corrupt_pattern(&mut dev, total as usize, b"victim-directory-name");

    let mut fs = Ffs::detect(dev, cfg).unwrap();
    assert_eq!(fs.lookup(b"/victim-directory-name").unwrap_err(), Error::NotFound);

    // The directory's own identity is unrecoverable (its name record is
    // what was corrupted), but its child's inode record survived and is
    // now an orphan: relocated under lost+found by its own id.
    let mut found = false;
    for name in [
        b"/lost+found/0".as_slice(),
        b"/lost+found/1",
        b"/lost+found/2",
        b"/lost+found/3",
    ] {
        if fs.lookup(name).is_ok() {
            found = true;
            let h = fs.open(name, OpenFlags::READ).unwrap();
            let mut buf = [0u8; 10];
            fs.read(h, &mut buf).unwrap();
            assert_eq!(&buf, b"still here");
        }
    }
    assert!(found, "orphaned leaf was not relocated into lost+found");
}
