#![no_std]
#![no_main]

extern crate alloc;

use alloc::vec::Vec;
use core::arch::asm;

use limine::memory_map::EntryType;
use x86_64::VirtAddr;

mod boot_modules;
mod dma;
mod gdt;
mod interrupts;
mod limine_requests;
mod pci;
mod phys_mapper;
mod ps2;
mod serial;
mod startup_config;
mod state;

use limine_requests::{HHDM_REQUEST, MEMORY_MAP_REQUEST, MODULE_REQUEST};
use qk_block::{AtaPioDevice, OffsetBlockDevice};
use qk_crypto::EntropyPool;
use qk_event::{Category, Event, EventKind, Priority};
use qk_mm::frame::{MemoryRegion, MemoryRegionKind};
use qk_mm::{Heap, VmManager};
use qk_secure::{SecureStore, WrapKeyPolicy};
use qk_tpm::{CrbControlArea, CrbTransport};
use qk_vfs::{FsKind, Vfs, VolumeManager};
use startup_config::StartupConfig;

#[global_allocator]
static HEAP: Heap = Heap::empty();

const HEAP_VIRT_START: usize = 0x_4444_4444_0000;
const HEAP_SIZE: usize = 8 * 1024 * 1024;

/// A 1024x768 virtual desktop, matching the coordinate space `qk_xhci`'s `MouseCursor` and the
/// PS/2 mouse driver both clamp into (§4.12, §6).
const SCREEN_WIDTH: u32 = 1024;
const SCREEN_HEIGHT: u32 = 768;

fn memory_region_kind(entry_type: EntryType) -> MemoryRegionKind {
    match entry_type {
        EntryType::USABLE => MemoryRegionKind::Available,
        EntryType::ACPI_RECLAIMABLE => MemoryRegionKind::Acpi,
        EntryType::ACPI_NVS => MemoryRegionKind::Nvs,
        EntryType::BAD_MEMORY => MemoryRegionKind::Bad,
        EntryType::BOOTLOADER_RECLAIMABLE => MemoryRegionKind::BootloaderReclaimable,
        EntryType::KERNEL_AND_MODULES => MemoryRegionKind::Kernel,
        _ => MemoryRegionKind::Reserved,
    }
}

fn collect_memory_regions() -> Vec<MemoryRegion> {
    let response = MEMORY_MAP_REQUEST
        .get_response()
        .expect("bootloader did not answer the memory map request");

    response
        .entries()
        .iter()
        .map(|entry| MemoryRegion {
            base: entry.base,
            size: entry.length,
            kind: memory_region_kind(entry.entry_type),
        })
        .collect()
}

/// Maps the heap's virtual range to freshly allocated frames and hands the result to the
/// global allocator. Run once, right after the frame allocator and `VmManager` exist.
fn init_heap(vmm: &mut VmManager, frame_allocator: &qk_mm::frame::LockedFrameAllocator) {
    use x86_64::structures::paging::{Page, PageTableFlags, Size4KiB};

    let heap_start = VirtAddr::new(HEAP_VIRT_START as u64);
    let heap_end = heap_start + HEAP_SIZE as u64 - 1u64;
    let start_page = Page::<Size4KiB>::containing_address(heap_start);
    let end_page = Page::<Size4KiB>::containing_address(heap_end);
    let flags = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;

    let mut mapped = 0u64;
    for page in Page::range_inclusive(start_page, end_page) {
        let frame = frame_allocator
            .allocate_contiguous(1)
            .expect("out of physical memory while mapping the kernel heap");
        let phys_frame = x86_64::structures::paging::PhysFrame::containing_address(frame);
        vmm.map(page, phys_frame, flags, &mut HeapFrames(frame_allocator))
            .expect("failed to map a kernel heap page");
        mapped += 1;
    }
    let _ = mapped;

    unsafe {
        HEAP.init(HEAP_VIRT_START, HEAP_SIZE);
    }
}

/// Adapts `&LockedFrameAllocator` (shared reference, used read-only here since the page itself
/// was already allocated above) to the `FrameAllocator` trait `VmManager::map` needs for its
/// intermediate page-table frames.
struct HeapFrames<'a>(&'a qk_mm::frame::LockedFrameAllocator);

unsafe impl x86_64::structures::paging::FrameAllocator<x86_64::structures::paging::Size4KiB>
    for HeapFrames<'_>
{
    fn allocate_frame(&mut self) -> Option<x86_64::structures::paging::PhysFrame> {
        self.0
            .allocate_contiguous(1)
            .map(x86_64::structures::paging::PhysFrame::containing_address)
    }
}

fn read_whole_file(vfs: &mut Vfs, path: &str) -> Option<alloc::vec::Vec<u8>> {
    use qk_fat::OpenMode;

    let meta = vfs.stat(path).ok()?;
    let file = vfs.open(path, OpenMode::Read).ok()?;
    let mut buf = alloc::vec![0u8; meta.size as usize];
    let mut read = 0;
    while read < buf.len() {
        match vfs.read(file, &mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(_) => break,
        }
    }
    let _ = vfs.close(file);
    buf.truncate(read);
    Some(buf)
}

/// Probes ATA-PIO primary-master for a shared volume: reads LBA 0 and trusts the caller's
/// `IDE_SHARED` opt-in rather than parsing a partition table (§6 "optional shared-volume
/// probe" — out of scope: real MBR/GPT parsing).
fn probe_shared_volume(vfs: &mut Vfs, volumes: &mut VolumeManager) {
    const SHARED_SECTOR_COUNT: u64 = 131_072; // 64 MiB at 512 B/sector, a generous fixed guess
    const SHARED_CACHE_BYTES: usize = 256 * 1024;

    let device = unsafe { AtaPioDevice::new_primary_master(SHARED_SECTOR_COUNT) };
    let offset_device = OffsetBlockDevice::new(device, 0, SHARED_SECTOR_COUNT);

    match volumes.register(
        vfs,
        alloc::string::String::from("QFS_SHARED"),
        alloc::string::String::from("/shared"),
        FsKind::FatAuto,
        offset_device,
        SHARED_CACHE_BYTES,
        true,
    ) {
        Ok(()) => log::info!("mounted shared ATA volume at /shared"),
        Err(e) => log::warn!("shared volume probe failed: {:?}", e),
    }
}

/// Builds a CRB control area over DMA-arena command/response buffers and runs the secure
/// store's TPM self-test. There is no ACPI TPM2-table discovery in this build (no ACPI parser
/// is in scope, see `DESIGN.md`), so a present TPM is represented by the kernel constructing its
/// own control area rather than by probing real firmware MMIO.
fn tpm_self_test(vfs: &mut Vfs, entropy: &mut EntropyPool, policy: WrapKeyPolicy) {
    const CMD_LEN: u32 = 4096;
    const RSP_LEN: u32 = 4096;

    let cmd_ptr = dma::alloc(CMD_LEN as usize, 4096);
    let rsp_ptr = dma::alloc(RSP_LEN as usize, 4096);
    let cmd_pa = dma::phys_addr_of(cmd_ptr);
    let rsp_pa = dma::phys_addr_of(rsp_ptr);

    let mut control = CrbControlArea::new(cmd_pa, CMD_LEN, rsp_pa, RSP_LEN);
    let mapper = phys_mapper::IdentityPhysMapper;
    let mut transport = unsafe { CrbTransport::new(&mut control, &mapper) };

    let store = SecureStore::new(None);
    let test_key = "BOOT_SELFTEST";
    let payload = b"qk boot self-test payload";

    let transport_ref = if policy == WrapKeyPolicy::Tpm {
        Some(&mut transport)
    } else {
        None
    };
    match store.seal(vfs, entropy, policy, transport_ref, test_key, payload) {
        Ok(()) => log::info!("secure store self-test seal succeeded"),
        Err(e) => {
            log::error!("secure store self-test seal failed: {:?}", e);
            return;
        }
    }

    let transport_ref = if policy == WrapKeyPolicy::Tpm {
        Some(&mut transport)
    } else {
        None
    };
    match store.unseal(vfs, entropy, policy, transport_ref, test_key) {
        Ok(bytes) if bytes == payload => log::info!("secure store self-test round-trip OK"),
        Ok(_) => log::error!("secure store self-test round-trip mismatch"),
        Err(e) => log::error!("secure store self-test unseal failed: {:?}", e),
    }
}

#[unsafe(no_mangle)]
unsafe extern "C" fn kmain() -> ! {
    assert!(limine_requests::BASE_REVISION.is_supported());
    limine_requests::touch_all();

    serial::init();
    log::info!("serial debug online");

    gdt::init();
    log::info!("GDT loaded");

    interrupts::init();
    log::info!("IDT loaded, PIC remapped and masked");

    let hhdm_offset = HHDM_REQUEST
        .get_response()
        .expect("bootloader did not answer the HHDM request")
        .offset();
    let regions = collect_memory_regions();
    let frame_allocator = qk_mm::frame::LockedFrameAllocator::new(&regions);
    let (total_frames, free_frames) = frame_allocator.stats();
    log::info!(
        "frame allocator: {} total frames, {} free ({} MiB)",
        total_frames,
        free_frames,
        (free_frames as u64 * 4096) / (1024 * 1024)
    );

    let mut vmm = unsafe { VmManager::init(VirtAddr::new(hhdm_offset)) };
    init_heap(&mut vmm, &frame_allocator);
    log::info!("heap online: {} bytes", HEAP.extent());

    state::install_timer_callback();
    state::TIMER.program_pit();
    interrupts::VECTORS.register(interrupts::InterruptIndex::Timer.as_u8(), state::timer_irq_handler);
    interrupts::VECTORS.register(interrupts::InterruptIndex::Keyboard.as_u8(), state::keyboard_irq_handler);
    interrupts::VECTORS.register(interrupts::InterruptIndex::Mouse.as_u8(), state::mouse_irq_handler);
    interrupts::PIC.enable_irq(0);
    interrupts::PIC.enable_irq(1);
    interrupts::PIC.enable_irq(12);
    x86_64::instructions::interrupts::enable();
    log::info!("timer programmed at {} Hz, keyboard/mouse IRQs unmasked", state::TIMER.frequency_hz());

    let mut vfs = Vfs::new();
    let mut volumes = VolumeManager::new();

    let module_response = MODULE_REQUEST.get_response();
    let modules: Vec<&limine::file::File> = module_response
        .map(|r| r.modules().iter().collect())
        .unwrap_or_default();

    if let Some(ramdisk_file) = boot_modules::find_ramdisk(&modules) {
        let device = boot_modules::ramdisk_device(ramdisk_file);
        if let Err(e) = volumes.register(
            &mut vfs,
            alloc::string::String::from("QFS_ROOT"),
            alloc::string::String::from("/"),
            FsKind::FatAuto,
            device,
            512 * 1024,
            true,
        ) {
            log::error!("failed to mount boot ramdisk at /: {:?}", e);
        } else {
            log::info!("mounted boot ramdisk at /");
        }

        for volume in boot_modules::find_volumes(&modules, Some(ramdisk_file)) {
            let name = volume.name.clone();
            let mount_path = volume.mount_path.clone();
            match volumes.register(&mut vfs, volume.name, volume.mount_path, volume.kind, volume.device, 256 * 1024, true) {
                Ok(()) => log::info!("mounted volume {} at {}", name, mount_path),
                Err(e) => log::error!("failed to mount volume {} at {}: {:?}", name, mount_path, e),
            }
        }
    } else {
        log::warn!("no boot modules present, booting without a root filesystem");
    }

    let startup_config = read_whole_file(&mut vfs, "/startup.cfg")
        .and_then(|bytes| alloc::string::String::from_utf8(bytes).ok())
        .map(|text| StartupConfig::parse(&text))
        .unwrap_or_default();
    log::info!("startup config: mode={:?} sc_mode={:?}", startup_config.mode, startup_config.sc_mode);

    if startup_config.ide_shared {
        probe_shared_volume(&mut vfs, &mut volumes);
    }

    if let Some(xhci_device) = pci::find_xhci_controller() {
        xhci_device.enable();
        let bar0 = xhci_device.bar0_address();
        log::info!("xHCI controller found at BAR0={:#x}", bar0);

        match unsafe { qk_xhci::Controller::init(bar0 as *mut u8, SCREEN_WIDTH, SCREEN_HEIGHT) } {
            Ok(mut controller) => {
                log::info!(
                    "xHCI controller online: {} ports, {} slots",
                    controller.max_ports(),
                    controller.max_slots()
                );
                run_event_loop(&mut controller, &mut vfs, startup_config);
            }
            Err(e) => {
                log::error!("xHCI init failed: {:?}", e);
                run_event_loop_no_usb(&mut vfs, startup_config);
            }
        }
    } else {
        log::warn!("no xHCI controller found on the PCI bus");
        run_event_loop_no_usb(&mut vfs, startup_config);
    }
}

fn run_secure_store_bringup(vfs: &mut Vfs, config: &StartupConfig) {
    let mut entropy = EntropyPool::new();
    let mut seed = [0u8; 32];
    for (i, b) in seed.iter_mut().enumerate() {
        *b = (state::TIMER.tick_count() as u8).wrapping_add(i as u8);
    }
    entropy.add_entropy(&seed);

    let policy = match config.sc_mode {
        startup_config::SecureCenterMode::Bypass => WrapKeyPolicy::Plaintext,
        startup_config::SecureCenterMode::Enforce if config.sc_bypass => WrapKeyPolicy::Plaintext,
        startup_config::SecureCenterMode::Enforce => WrapKeyPolicy::Tpm,
    };
    tpm_self_test(vfs, &mut entropy, policy);
}

/// Drains whatever the xHCI controller produced since the last call and posts it onto the
/// event bus as `qk_event` pointer events.
fn drain_xhci(controller: &mut qk_xhci::Controller) {
    for event in controller.poll() {
        let posted = Event::new(
            EventKind::Mouse {
                x: event.x,
                y: event.y,
                buttons: event.buttons,
                is_absolute: event.is_absolute,
            },
            Category::INPUT,
            Priority::Normal,
            state::EVENT_BUS.next_timestamp(),
        );
        let _ = state::EVENT_BUS.post(posted);
    }
}

fn run_event_loop(controller: &mut qk_xhci::Controller, vfs: &mut Vfs, config: StartupConfig) -> ! {
    run_secure_store_bringup(vfs, &config);
    log::info!("entering serial console fallback (desktop/compositor out of scope)");
    loop {
        drain_xhci(controller);
        state::EVENT_BUS.process_events(32);
        x86_64::instructions::hlt();
    }
}

fn run_event_loop_no_usb(vfs: &mut Vfs, config: StartupConfig) -> ! {
    run_secure_store_bringup(vfs, &config);
    log::info!("entering serial console fallback (desktop/compositor out of scope)");
    loop {
        state::EVENT_BUS.process_events(32);
        x86_64::instructions::hlt();
    }
}

#[cfg(not(test))]
#[panic_handler]
fn rust_panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("panic: {}", info);
    hcf();
}

fn hcf() -> ! {
    loop {
        unsafe {
            asm!("cli");
            asm!("hlt");
        }
    }
}
