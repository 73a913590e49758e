//! Driver transport boundary
//!
//! Every low-latency command ends up as one blocking call on a [`Transport`].
//! Methods mirror the driver entry points one to one: they return the raw
//! driver status and write any output through the `&mut` argument blocks.
//! The coordination layer never interprets handles, it only forwards them.

use crate::abi::{
    GetSleepStatusParams, LatencyMarkerParams, LatencyResultParams, SetSleepModeParams,
};
use crate::common::{DeviceHandle, QueueHandle, SemaphoreHandle};

pub mod fake;

#[cfg(feature = "driver-library")]
pub mod library;

pub use fake::FakeDriver;

#[cfg(feature = "driver-library")]
pub use library::LibraryTransport;

/// Low-latency driver transport
pub trait Transport: Send + Sync {
    /// Initialize the driver library and increment its reference count
    fn initialize(&self) -> i32;

    /// Decrement the driver reference count, unloading at zero
    fn unload(&self) -> i32;

    /// Register a device for low-latency tracking
    fn init_low_latency_device(
        &self,
        device: DeviceHandle,
        signal_semaphore: &mut SemaphoreHandle,
    ) -> i32;

    /// Release the low-latency parameters of a device
    fn destroy_low_latency_device(&self, device: DeviceHandle) -> i32;

    /// Query the effective sleep status
    fn get_sleep_status(&self, device: DeviceHandle, params: &mut GetSleepStatusParams) -> i32;

    /// Update the sleep mode
    fn set_sleep_mode(&self, device: DeviceHandle, params: &SetSleepModeParams) -> i32;

    /// Arm the device semaphore to be signaled with `signal_value` at the optimal wake point
    fn sleep(&self, device: DeviceHandle, signal_value: u64) -> i32;

    /// Fill the 64-slot latency report
    fn get_latency(&self, device: DeviceHandle, params: &mut LatencyResultParams) -> i32;

    /// Record a latency marker
    fn set_latency_marker(&self, device: DeviceHandle, params: &LatencyMarkerParams) -> i32;

    /// Flag a queue as running outside the frame cadence
    fn notify_out_of_band_queue(
        &self,
        device: DeviceHandle,
        queue: QueueHandle,
        queue_type: u32,
    ) -> i32;
}
