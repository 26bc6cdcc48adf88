//! Resolves Limine boot modules into mounted volumes (§6 "Boot protocol"): the module with
//! cmdline exactly `ramdisk` is the boot FAT image mounted at `/`; a module with cmdline
//! `volume:<NAME>:<MOUNTPATH>[:<fs>]` is registered and mounted as a `QFS_…` volume.
//!
//! Grounded on `original_source/kernel/Boot/Limine/LimineModules.cpp`'s `FindRamdiskModule`:
//! if no module's cmdline matches `"ramdisk"` exactly, the first module present is used as a
//! fallback rather than leaving the kernel with no root filesystem at all.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use limine::file::File;
use qk_block::MemoryBlockDevice;
use qk_vfs::FsKind;

const SECTOR_SIZE: usize = 512;

pub struct VolumeModule {
    pub name: String,
    pub mount_path: String,
    pub kind: FsKind,
    pub device: MemoryBlockDevice,
}

fn module_bytes(file: &File) -> &'static [u8] {
    unsafe { core::slice::from_raw_parts(file.addr(), file.size() as usize) }
}

fn module_cmdline(file: &File) -> &str {
    file.cmdline().to_str().unwrap_or("")
}

/// Copies `file`'s contents into a sector-addressed in-memory block device.
fn module_to_device(file: &File) -> MemoryBlockDevice {
    let bytes = module_bytes(file);
    let sectors = bytes.len().div_ceil(SECTOR_SIZE);
    let mut image = Vec::with_capacity(sectors * SECTOR_SIZE);
    image.extend_from_slice(bytes);
    image.resize(sectors * SECTOR_SIZE, 0);
    MemoryBlockDevice::from_image(SECTOR_SIZE, image)
}

/// Picks the module to mount at `/`: an exact `cmdline == "ramdisk"` match, or the first module
/// present if none matches.
pub fn find_ramdisk<'a>(modules: &[&'a File]) -> Option<&'a File> {
    modules
        .iter()
        .copied()
        .find(|m| module_cmdline(m) == "ramdisk")
        .or_else(|| modules.first().copied())
}

pub fn ramdisk_device(file: &File) -> MemoryBlockDevice {
    module_to_device(file)
}

/// Parses a `volume:<NAME>:<MOUNTPATH>[:<fs>]` cmdline. `<fs>` defaults to `fat32`.
fn parse_volume_cmdline(cmdline: &str) -> Option<(String, String, FsKind)> {
    let rest = cmdline.strip_prefix("volume:")?;
    let mut parts = rest.splitn(3, ':');
    let name = parts.next()?.to_string();
    let mount_path = parts.next()?.to_string();
    let kind = match parts.next().unwrap_or("fat32").to_ascii_lowercase().as_str() {
        "auto" => FsKind::FatAuto,
        "fat16" => FsKind::Fat16,
        _ => FsKind::Fat32,
    };
    if name.is_empty() || mount_path.is_empty() {
        return None;
    }
    Some((name, mount_path, kind))
}

/// Collects every `volume:...` module present (excluding whichever file was chosen as the
/// ramdisk).
pub fn find_volumes<'a>(modules: &[&'a File], ramdisk: Option<&'a File>) -> Vec<VolumeModule> {
    let ramdisk_ptr = ramdisk.map(|f| f as *const File);
    modules
        .iter()
        .copied()
        .filter(|m| Some(*m as *const File) != ramdisk_ptr)
        .filter_map(|m| {
            let (name, mount_path, kind) = parse_volume_cmdline(module_cmdline(m))?;
            Some(VolumeModule {
                name,
                mount_path,
                kind,
                device: module_to_device(m),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volume_cmdline_with_explicit_fs() {
        let (name, path, kind) = parse_volume_cmdline("volume:QFS_DATA:/data:fat16").unwrap();
        assert_eq!(name, "QFS_DATA");
        assert_eq!(path, "/data");
        assert_eq!(kind, FsKind::Fat16);
    }

    #[test]
    fn defaults_to_fat32_when_fs_omitted() {
        let (_, _, kind) = parse_volume_cmdline("volume:QFS_DATA:/data").unwrap();
        assert_eq!(kind, FsKind::Fat32);
    }

    #[test]
    fn rejects_malformed_cmdlines() {
        assert!(parse_volume_cmdline("ramdisk").is_none());
        assert!(parse_volume_cmdline("volume:onlyname").is_none());
    }
}
