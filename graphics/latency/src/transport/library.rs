//! Transport backed by the `NvLowLatencyVk` dynamic library
//!
//! `VkDevice` and `VkQueue` are dispatchable handles and cross the FFI
//! boundary pointer-sized. `VkSemaphore` is non-dispatchable and always 64 bits.

use libloading::Library;

use crate::abi::{
    GetSleepStatusParams, LatencyMarkerParams, LatencyResultParams, SetSleepModeParams,
};
use crate::common::{
    DeviceHandle, LatencyError, QueueHandle, Result, SemaphoreHandle, Status,
};
use crate::transport::Transport;

/// Base name of the driver support library
pub const LIBRARY_NAME: &str = "NvLowLatencyVk";

type InitializeFn = unsafe extern "system" fn() -> i32;
type UnloadFn = unsafe extern "system" fn() -> i32;
type InitLowLatencyDeviceFn = unsafe extern "system" fn(usize, *mut u64) -> i32;
type DestroyLowLatencyDeviceFn = unsafe extern "system" fn(usize) -> i32;
type GetSleepStatusFn = unsafe extern "system" fn(usize, *mut GetSleepStatusParams) -> i32;
type SetSleepModeFn = unsafe extern "system" fn(usize, *const SetSleepModeParams) -> i32;
type SleepFn = unsafe extern "system" fn(usize, u64) -> i32;
type GetLatencyFn = unsafe extern "system" fn(usize, *mut LatencyResultParams) -> i32;
type SetLatencyMarkerFn = unsafe extern "system" fn(usize, *const LatencyMarkerParams) -> i32;
type NotifyOutOfBandQueueFn = unsafe extern "system" fn(usize, usize, u32) -> i32;

/// Pointer-sized value of a dispatchable handle
///
/// `None` when the handle does not fit, which no valid handle on the running
/// target does.
fn dispatchable(raw: u64) -> Option<usize> {
    usize::try_from(raw).ok()
}

/// Unwrap a dispatchable handle or return `InvalidHandle` from the caller
macro_rules! dispatchable {
    ($handle:expr) => {
        match dispatchable($handle.as_raw()) {
            Some(raw) => raw,
            None => return Status::InvalidHandle.as_raw(),
        }
    };
}

/// Resolved driver entry points
struct EntryPoints {
    initialize: InitializeFn,
    unload: UnloadFn,
    init_low_latency_device: InitLowLatencyDeviceFn,
    destroy_low_latency_device: DestroyLowLatencyDeviceFn,
    get_sleep_status: GetSleepStatusFn,
    set_sleep_mode: SetSleepModeFn,
    sleep: SleepFn,
    get_latency: GetLatencyFn,
    set_latency_marker: SetLatencyMarkerFn,
    notify_out_of_band_queue: NotifyOutOfBandQueueFn,
}

/// Transport calling into the driver support library
pub struct LibraryTransport {
    entry: EntryPoints,
    // Keeps the entry points valid; dropped after `entry`.
    _library: Library,
}

impl LibraryTransport {
    /// Load the support library from the platform search path
    pub fn load() -> Result<Self> {
        Self::load_from(libloading::library_filename(LIBRARY_NAME))
    }

    /// Load the support library from an explicit path
    pub fn load_from(path: impl AsRef<std::ffi::OsStr>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("Loading low latency library {:?}", path);

        // SAFETY: loading the driver library runs its initializers, which is the
        // documented way of using it.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            log::warn!("Failed to load {:?}: {}", path, e);
            LatencyError::Driver(Status::LibraryNotFound)
        })?;

        let entry = Self::resolve(&library)?;

        Ok(Self {
            entry,
            _library: library,
        })
    }

    fn resolve(library: &Library) -> Result<EntryPoints> {
        macro_rules! symbol {
            ($name:literal, $ty:ty) => {{
                // SAFETY: the signature matches the exported driver declaration.
                let symbol = unsafe { library.get::<$ty>(concat!($name, "\0").as_bytes()) };
                *symbol.map_err(|e| {
                    log::warn!("Missing driver entry point {}: {}", $name, e);
                    LatencyError::Driver(Status::LibraryNotFound)
                })?
            }};
        }

        Ok(EntryPoints {
            initialize: symbol!("NvLL_VK_Initialize", InitializeFn),
            unload: symbol!("NvLL_VK_Unload", UnloadFn),
            init_low_latency_device: symbol!(
                "NvLL_VK_InitLowLatencyDevice",
                InitLowLatencyDeviceFn
            ),
            destroy_low_latency_device: symbol!(
                "NvLL_VK_DestroyLowLatencyDevice",
                DestroyLowLatencyDeviceFn
            ),
            get_sleep_status: symbol!("NvLL_VK_GetSleepStatus", GetSleepStatusFn),
            set_sleep_mode: symbol!("NvLL_VK_SetSleepMode", SetSleepModeFn),
            sleep: symbol!("NvLL_VK_Sleep", SleepFn),
            get_latency: symbol!("NvLL_VK_GetLatency", GetLatencyFn),
            set_latency_marker: symbol!("NvLL_VK_SetLatencyMarker", SetLatencyMarkerFn),
            notify_out_of_band_queue: symbol!(
                "NvLL_VK_NotifyOutOfBandQueue",
                NotifyOutOfBandQueueFn
            ),
        })
    }
}

// SAFETY (all calls below): the library outlives `entry`, argument blocks are
// `#[repr(C)]` and live for the duration of the call, and the driver does not
// retain the pointers.
impl Transport for LibraryTransport {
    fn initialize(&self) -> i32 {
        unsafe { (self.entry.initialize)() }
    }

    fn unload(&self) -> i32 {
        unsafe { (self.entry.unload)() }
    }

    fn init_low_latency_device(
        &self,
        device: DeviceHandle,
        signal_semaphore: &mut SemaphoreHandle,
    ) -> i32 {
        let device = dispatchable!(device);
        let mut raw = signal_semaphore.as_raw();
        let status = unsafe { (self.entry.init_low_latency_device)(device, &mut raw) };
        *signal_semaphore = SemaphoreHandle::from_raw(raw);
        status
    }

    fn destroy_low_latency_device(&self, device: DeviceHandle) -> i32 {
        let device = dispatchable!(device);
        unsafe { (self.entry.destroy_low_latency_device)(device) }
    }

    fn get_sleep_status(&self, device: DeviceHandle, params: &mut GetSleepStatusParams) -> i32 {
        let device = dispatchable!(device);
        unsafe { (self.entry.get_sleep_status)(device, params) }
    }

    fn set_sleep_mode(&self, device: DeviceHandle, params: &SetSleepModeParams) -> i32 {
        let device = dispatchable!(device);
        unsafe { (self.entry.set_sleep_mode)(device, params) }
    }

    fn sleep(&self, device: DeviceHandle, signal_value: u64) -> i32 {
        let device = dispatchable!(device);
        unsafe { (self.entry.sleep)(device, signal_value) }
    }

    fn get_latency(&self, device: DeviceHandle, params: &mut LatencyResultParams) -> i32 {
        let device = dispatchable!(device);
        unsafe { (self.entry.get_latency)(device, params) }
    }

    fn set_latency_marker(&self, device: DeviceHandle, params: &LatencyMarkerParams) -> i32 {
        let device = dispatchable!(device);
        unsafe { (self.entry.set_latency_marker)(device, params) }
    }

    fn notify_out_of_band_queue(
        &self,
        device: DeviceHandle,
        queue: QueueHandle,
        queue_type: u32,
    ) -> i32 {
        let device = dispatchable!(device);
        let queue = dispatchable!(queue);
        unsafe { (self.entry.notify_out_of_band_queue)(device, queue, queue_type) }
    }
}
