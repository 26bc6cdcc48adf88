//! End-to-end VFS scenarios: mounting two FAT volumes and resolving paths across them (§8,
//! scenario 3).

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use qk_block::MemoryBlockDevice;
use qk_cache::SectorCache;
use qk_fat::{FatFileSystem, OpenMode};

use crate::fat_adapter::FatAdapter;
use crate::mount::Vfs;

const BYTES_PER_SECTOR: u32 = 512;

/// Builds a minimal FAT16 image with a single root-directory file `name` (8.3, no extension
/// fanciness) containing `contents`.
fn fat16_image_with_file(total_sectors: u32, name: &str, contents: &[u8]) -> Vec<u8> {
    let sectors_per_cluster = 1u8;
    let reserved = 1u32;
    let fat_count = 2u32;
    let root_entries = 16u32;
    let sectors_per_fat = 4u32;
    let root_dir_sectors = (root_entries * 32 + BYTES_PER_SECTOR - 1) / BYTES_PER_SECTOR;
    let root_dir_start = reserved + fat_count * sectors_per_fat;
    let data_start = root_dir_start + root_dir_sectors;

    let mut image = vec![0u8; (total_sectors * BYTES_PER_SECTOR) as usize];
    image[0x0B..0x0D].copy_from_slice(&(BYTES_PER_SECTOR as u16).to_le_bytes());
    image[0x0D] = sectors_per_cluster;
    image[0x0E..0x10].copy_from_slice(&(reserved as u16).to_le_bytes());
    image[0x10] = fat_count as u8;
    image[0x11..0x13].copy_from_slice(&(root_entries as u16).to_le_bytes());
    image[0x16..0x18].copy_from_slice(&(sectors_per_fat as u16).to_le_bytes());
    image[0x20..0x24].copy_from_slice(&total_sectors.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;

    // FAT[2] = EOC (first data cluster occupied by our file).
    let fat0_off = (reserved * BYTES_PER_SECTOR) as usize;
    image[fat0_off + 4..fat0_off + 6].copy_from_slice(&0xFFFFu16.to_le_bytes());

    // Root directory entry at slot 0: short name, archive attribute, cluster 2, size.
    let root_off = (root_dir_start * BYTES_PER_SECTOR) as usize;
    let (base, ext) = name.split_once('.').unwrap_or((name, ""));
    let mut raw_name = [b' '; 11];
    for (i, b) in base.bytes().take(8).enumerate() {
        raw_name[i] = b.to_ascii_uppercase();
    }
    for (i, b) in ext.bytes().take(3).enumerate() {
        raw_name[8 + i] = b.to_ascii_uppercase();
    }
    image[root_off..root_off + 11].copy_from_slice(&raw_name);
    image[root_off + 11] = 0x20; // ATTR_ARCHIVE
    image[root_off + 26..root_off + 28].copy_from_slice(&2u16.to_le_bytes()); // first cluster low
    image[root_off + 28..root_off + 32].copy_from_slice(&(contents.len() as u32).to_le_bytes());

    // Cluster 2's data.
    let cluster2_off = (data_start * BYTES_PER_SECTOR) as usize;
    image[cluster2_off..cluster2_off + contents.len()].copy_from_slice(contents);

    image
}

fn mount_fat16_adapter(total_sectors: u32, name: &str, contents: &[u8]) -> FatAdapter<MemoryBlockDevice> {
    let image = fat16_image_with_file(total_sectors, name, contents);
    let dev = MemoryBlockDevice::from_image(BYTES_PER_SECTOR as usize, image);
    let cache = SectorCache::new(dev, 64 * BYTES_PER_SECTOR as usize);
    let fs = FatFileSystem::mount(cache).unwrap();
    FatAdapter::new(fs)
}

fn small_volume_sectors() -> u32 {
    // Large enough cluster count estimate to probe as FAT16 but still tiny.
    1 + 2 * 4 + 1 + 5000
}

#[test]
fn path_resolution_picks_longest_boundary_respecting_prefix() {
    let mut vfs = Vfs::new();
    let root = mount_fat16_adapter(small_volume_sectors(), "ROOTFILE.TXT", b"root");
    let shared = mount_fat16_adapter(small_volume_sectors(), "NOTES.TXT", b"shared notes");

    vfs.mount(String::from("/"), Box::new(root));
    vfs.mount(String::from("/shared"), Box::new(shared));

    // Resolves into the /shared mount with the shared-relative path.
    let file = vfs.open("/shared/notes.txt", OpenMode::Read).unwrap();
    let mut buf = vec![0u8; 12];
    let n = vfs.read(file, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"shared notes");
    vfs.close(file).unwrap();

    // "/shared2" must NOT match the "/shared" mount (component boundary), so it resolves to
    // root instead, where it doesn't exist.
    let err = vfs.stat("/shared2").unwrap_err();
    assert_eq!(err, crate::VfsError::NotFound);
}

#[test]
fn ramdisk_round_trip_write_then_reopen_for_read() {
    let mut vfs = Vfs::new();
    let root = mount_fat16_adapter(small_volume_sectors(), "HELLO.TXT", b"Hello, world\n");
    vfs.mount(String::from("/"), Box::new(root));

    let file = vfs.open("/HELLO.TXT", OpenMode::Read).unwrap();
    let mut buf = vec![0u8; 13];
    let n = vfs.read(file, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"Hello, world\n");
    vfs.close(file).unwrap();

    let file = vfs
        .open("/QFSDEMO.TXT", OpenMode::CreateTruncate)
        .unwrap();
    let payload = b"QAIOS+ FileIO demo\n";
    vfs.write(file, payload).unwrap();
    vfs.close(file).unwrap();

    let file = vfs.open("/QFSDEMO.TXT", OpenMode::Read).unwrap();
    let mut buf = vec![0u8; payload.len()];
    let n = vfs.read(file, &mut buf).unwrap();
    assert_eq!(&buf[..n], payload);
    vfs.close(file).unwrap();
}
