//! Driver argument blocks
//!
//! These structures are handed to the driver by pointer and must keep the
//! exact field order and widths of the `NvLowLatencyVk` interface.

use crate::common::{MarkerType, FRAME_REPORT_COUNT};

/// Parameters for `NvLL_VK_SetSleepMode`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SetSleepModeParams {
    /// Low latency mode enable/disable
    pub low_latency_mode: bool,
    /// Request maximum GPU clock frequency regardless of workload
    pub low_latency_boost: bool,
    /// Minimum frame interval in microseconds. 0 = no frame rate limit.
    pub minimum_interval_us: u32,
}

/// Parameters for `NvLL_VK_GetSleepStatus`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct GetSleepStatusParams {
    /// Is low latency mode enabled?
    pub low_latency_mode: bool,
}

/// Parameters for `NvLL_VK_SetLatencyMarker`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct LatencyMarkerParams {
    /// Application frame ID the marker belongs to
    pub frame_id: u64,
    /// Raw [`MarkerType`] value
    pub marker_type: u32,
}

impl LatencyMarkerParams {
    /// Marker of `marker` type for a frame
    pub fn new(frame_id: u64, marker: MarkerType) -> Self {
        Self {
            frame_id,
            marker_type: marker.as_raw(),
        }
    }
}

/// Timestamps of one completed frame, in driver microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct FrameReport {
    /// Application frame ID (0 with all timestamps 0 marks an empty slot)
    pub frame_id: u64,
    /// `InputSample` marker
    pub input_sample_time: u64,
    /// `SimulationStart` marker
    pub sim_start_time: u64,
    /// `SimulationEnd` marker
    pub sim_end_time: u64,
    /// `RenderSubmitStart` marker
    pub render_submit_start_time: u64,
    /// `RenderSubmitEnd` marker
    pub render_submit_end_time: u64,
    /// `PresentStart` marker
    pub present_start_time: u64,
    /// `PresentEnd` marker
    pub present_end_time: u64,
    /// Driver starts processing the frame's submissions
    pub driver_start_time: u64,
    /// Driver hands the frame to the OS
    pub driver_end_time: u64,
    /// Frame enters the OS render queue
    pub os_render_queue_start_time: u64,
    /// Frame leaves the OS render queue
    pub os_render_queue_end_time: u64,
    /// GPU starts rendering the frame
    pub gpu_render_start_time: u64,
    /// GPU finishes rendering the frame
    pub gpu_render_end_time: u64,
}

/// Parameters for `NvLL_VK_GetLatency`
///
/// Element 63 is the newest completed frame, element 0 the oldest retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct LatencyResultParams {
    /// Rolling window of completed frames, oldest first
    pub frame_report: [FrameReport; FRAME_REPORT_COUNT],
}

impl Default for LatencyResultParams {
    fn default() -> Self {
        Self {
            frame_report: [FrameReport::default(); FRAME_REPORT_COUNT],
        }
    }
}

const _: () = assert!(core::mem::size_of::<SetSleepModeParams>() == 8);
const _: () = assert!(core::mem::size_of::<GetSleepStatusParams>() == 1);
const _: () = assert!(core::mem::size_of::<LatencyMarkerParams>() == 16);
const _: () = assert!(core::mem::size_of::<FrameReport>() == 14 * 8);
const _: () =
    assert!(core::mem::size_of::<LatencyResultParams>() == FRAME_REPORT_COUNT * 14 * 8);
