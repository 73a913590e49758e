//! Low-latency frame pacing for Vulkan devices
//!
//! This crate coordinates the `NvLowLatencyVk` driver interface:
//! - Reference-counted library session ([`Session`])
//! - Device registration and the sleep semaphore ([`DeviceRegistrar`])
//! - Sleep policy: low latency mode, boost, frame rate cap ([`SleepPolicyController`])
//! - Per-frame sleep ([`FramePacer`]) and latency markers ([`MarkerSequencer`])
//! - The 64-frame rolling latency report ([`TelemetryReader`])
//! - Out-of-band queues ([`OutOfBandQueues`])
//!
//! The driver itself sits behind the [`Transport`] trait. Enable the
//! `driver-library` feature for [`transport::LibraryTransport`], or use
//! [`transport::FakeDriver`] in tests.
//!
//! # Usage
//!
//! ```ignore
//! let session = Session::new(Arc::new(LibraryTransport::load()?));
//! session.acquire()?;
//!
//! let semaphore = DeviceRegistrar::new(&session).register_device(device)?;
//! SleepPolicyController::new(&session).set_policy(device, SleepPolicy::low_latency())?;
//!
//! let pacer = FramePacer::new(&session);
//! let markers = MarkerSequencer::new(&session);
//! let mut frames = FrameCounter::default();
//! loop {
//!     let frame = frames.advance();
//!     pacer.sleep(device, frame)?;
//!     // wait on `semaphore` for `frame`
//!     markers.set_marker(device, frame, MarkerType::SimulationStart)?;
//!     // ...
//! }
//! ```

pub mod abi;
pub mod common;
pub mod config;
pub mod device;
pub mod frame_pacing;
pub mod markers;
pub mod out_of_band;
pub mod session;
pub mod sleep;
pub mod telemetry;
pub mod transport;

pub use abi::FrameReport;
pub use common::{
    DeviceHandle, LatencyError, LatencyStats, MarkerType, OutOfBandQueueType, QueueHandle, Result,
    SemaphoreHandle, Status, FRAME_REPORT_COUNT, RECOMMENDED_WARMUP_FRAMES,
};
pub use config::{LatencyConfig, MarkerValidation};
pub use device::DeviceRegistrar;
pub use frame_pacing::{FrameCounter, FramePacer};
pub use markers::{MarkerSequencer, MarkerTracker, MarkerViolation};
pub use out_of_band::{OutOfBandQueueBinding, OutOfBandQueues};
pub use session::Session;
pub use sleep::{SleepPolicy, SleepPolicyController};
pub use telemetry::{LatencyReport, ReportEntry, TelemetryReader};
pub use transport::Transport;
