//! Limine boot protocol requests (§6 "Boot protocol"): framebuffer, higher-half direct map
//! offset, memory map, and boot modules. Every request lives in `.requests` and is referenced
//! from `kmain` so the linker can't discard it, per the Limine crate's own contract.

use limine::request::{
    FramebufferRequest, HhdmRequest, MemoryMapRequest, ModuleRequest, RequestsEndMarker,
    RequestsStartMarker,
};
use limine::BaseRevision;

#[used]
#[unsafe(link_section = ".requests")]
pub static BASE_REVISION: BaseRevision = BaseRevision::new();

#[used]
#[unsafe(link_section = ".requests")]
pub static FRAMEBUFFER_REQUEST: FramebufferRequest = FramebufferRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
pub static HHDM_REQUEST: HhdmRequest = HhdmRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
pub static MEMORY_MAP_REQUEST: MemoryMapRequest = MemoryMapRequest::new();

#[used]
#[unsafe(link_section = ".requests")]
pub static MODULE_REQUEST: ModuleRequest = ModuleRequest::new();

#[used]
#[unsafe(link_section = ".requests_start_marker")]
static _START_MARKER: RequestsStartMarker = RequestsStartMarker::new();
#[used]
#[unsafe(link_section = ".requests_end_marker")]
static _END_MARKER: RequestsEndMarker = RequestsEndMarker::new();

/// References every static above so the linker can never discard one as unused, even if a
/// future change stops reading from it directly in `kmain`.
pub fn touch_all() {
    core::hint::black_box(&BASE_REVISION);
    core::hint::black_box(&FRAMEBUFFER_REQUEST);
    core::hint::black_box(&HHDM_REQUEST);
    core::hint::black_box(&MEMORY_MAP_REQUEST);
    core::hint::black_box(&MODULE_REQUEST);
}
