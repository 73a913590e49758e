//! Latency telemetry
//!
//! The driver returns a fixed 64-slot report. Slot 63 holds the newest
//! completed frame and slot 0 the oldest retained one. Slots the driver has no
//! data for are all-zero. The report only fills after roughly
//! [`RECOMMENDED_WARMUP_FRAMES`](crate::RECOMMENDED_WARMUP_FRAMES) frames of
//! continuous marker use, and until enough frames are valid the driver may
//! return the whole report zeroed.
//!
//! A slot is considered empty only when every field, frame ID included, is
//! zero. A slot with frame ID 0 and any timestamp set is a real frame 0.

use crate::abi::{FrameReport, LatencyResultParams};
use crate::common::{DeviceHandle, LatencyError, LatencyStats, Result, Status, FRAME_REPORT_COUNT};
use crate::session::Session;

impl FrameReport {
    /// Check for a slot without data
    pub fn is_empty(&self) -> bool {
        *self == FrameReport::default()
    }

    /// Simulation time (µs)
    pub fn simulation_us(&self) -> Option<u64> {
        span(self.sim_start_time, self.sim_end_time)
    }

    /// Render submission time (µs)
    pub fn render_submit_us(&self) -> Option<u64> {
        span(self.render_submit_start_time, self.render_submit_end_time)
    }

    /// Present call time (µs)
    pub fn present_us(&self) -> Option<u64> {
        span(self.present_start_time, self.present_end_time)
    }

    /// Driver time (µs)
    pub fn driver_us(&self) -> Option<u64> {
        span(self.driver_start_time, self.driver_end_time)
    }

    /// Time spent in the OS render queue (µs)
    pub fn os_render_queue_us(&self) -> Option<u64> {
        span(self.os_render_queue_start_time, self.os_render_queue_end_time)
    }

    /// GPU render time (µs)
    pub fn gpu_render_us(&self) -> Option<u64> {
        span(self.gpu_render_start_time, self.gpu_render_end_time)
    }

    /// Input sample (or simulation start without one) to GPU render end (µs)
    pub fn total_latency_us(&self) -> Option<u64> {
        let start = if self.input_sample_time != 0 {
            self.input_sample_time
        } else {
            self.sim_start_time
        };
        span(start, self.gpu_render_end_time)
    }
}

fn span(start: u64, end: u64) -> Option<u64> {
    if start == 0 || end == 0 || end < start {
        None
    } else {
        Some(end - start)
    }
}

/// A populated report slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportEntry<'a> {
    /// Slot index, 0 = oldest, 63 = newest
    pub slot: usize,
    /// Frame timestamps
    pub frame: &'a FrameReport,
}

/// Snapshot of the rolling latency report of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyReport {
    slots: Box<[FrameReport; FRAME_REPORT_COUNT]>,
}

impl LatencyReport {
    /// Wrap a report returned by the driver
    pub fn from_params(params: &LatencyResultParams) -> Self {
        Self {
            slots: Box::new(params.frame_report),
        }
    }

    /// Wrap raw slots, oldest first
    pub fn from_slots(slots: [FrameReport; FRAME_REPORT_COUNT]) -> Self {
        Self { slots: Box::new(slots) }
    }

    /// All 64 slots, empty ones included
    pub fn slots(&self) -> &[FrameReport; FRAME_REPORT_COUNT] {
        &self.slots
    }

    /// A populated slot, `None` when out of range or empty
    pub fn slot(&self, index: usize) -> Option<&FrameReport> {
        self.slots.get(index).filter(|frame| !frame.is_empty())
    }

    /// Populated slots from oldest to newest
    pub fn frames(&self) -> impl Iterator<Item = ReportEntry<'_>> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, frame)| !frame.is_empty())
            .map(|(slot, frame)| ReportEntry { slot, frame })
    }

    /// Number of populated slots
    pub fn valid_count(&self) -> usize {
        self.frames().count()
    }

    /// Newest completed frame
    pub fn newest(&self) -> Option<ReportEntry<'_>> {
        self.frames().last()
    }

    /// Oldest retained frame
    pub fn oldest(&self) -> Option<ReportEntry<'_>> {
        self.frames().next()
    }

    /// Check if no slot holds data
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(FrameReport::is_empty)
    }

    /// Check if every slot holds data
    pub fn is_filled(&self) -> bool {
        self.slots.iter().all(|frame| !frame.is_empty())
    }

    /// Check that populated slots carry strictly increasing frame IDs
    pub fn is_ordered(&self) -> bool {
        let mut previous: Option<u64> = None;
        for entry in self.frames() {
            if let Some(previous) = previous {
                if entry.frame.frame_id <= previous {
                    return false;
                }
            }
            previous = Some(entry.frame.frame_id);
        }
        true
    }

    /// Average stage times over the populated slots
    pub fn stats(&self) -> LatencyStats {
        let mut stats = LatencyStats::new();
        let frames: Vec<&FrameReport> = self.frames().map(|entry| entry.frame).collect();
        if frames.is_empty() {
            return stats;
        }

        let average_ms = |stage: fn(&FrameReport) -> Option<u64>| -> f32 {
            let (sum, count) = frames
                .iter()
                .filter_map(|frame| stage(frame))
                .fold((0u64, 0u64), |(sum, count), us| (sum + us, count + 1));
            if count == 0 {
                0.0
            } else {
                sum as f32 / count as f32 / 1000.0
            }
        };

        stats.input_latency_ms = average_ms(FrameReport::total_latency_us);
        stats.simulation_ms = average_ms(FrameReport::simulation_us);
        stats.render_latency_ms = average_ms(FrameReport::render_submit_us);
        stats.present_latency_ms = average_ms(FrameReport::present_us);
        stats.driver_latency_ms = average_ms(FrameReport::driver_us);
        stats.os_queue_latency_ms = average_ms(FrameReport::os_render_queue_us);
        stats.gpu_render_ms = average_ms(FrameReport::gpu_render_us);
        stats.frames = frames.len();
        stats
    }
}

/// Telemetry ring reader
#[derive(Debug, Clone)]
pub struct TelemetryReader {
    session: Session,
}

impl TelemetryReader {
    /// Create a reader for a session
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
        }
    }

    /// Fetch a fresh latency report
    ///
    /// May be called at any cadence, independent of the frame loop.
    pub fn get_latency(&self, device: DeviceHandle) -> Result<LatencyReport> {
        self.session
            .with_device(device, "get_latency", Status::InvalidHandle, |_| {
                let mut params = Box::<LatencyResultParams>::default();
                LatencyError::check(self.session.transport().get_latency(device, &mut params))?;

                let report = LatencyReport::from_params(&params);
                log::trace!(
                    "Latency report for device {}: {} valid frame(s)",
                    device,
                    report.valid_count()
                );
                Ok(report)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::DeviceRegistrar;
    use crate::transport::fake::FakeDriver;

    const DEVICE: DeviceHandle = DeviceHandle::from_raw(0x7e1e);

    fn frame(frame_id: u64, base: u64) -> FrameReport {
        FrameReport {
            frame_id,
            input_sample_time: base + 100,
            sim_start_time: base,
            sim_end_time: base + 1_000,
            render_submit_start_time: base + 1_000,
            render_submit_end_time: base + 3_000,
            present_start_time: base + 3_000,
            present_end_time: base + 3_500,
            driver_start_time: base + 1_100,
            driver_end_time: base + 3_600,
            os_render_queue_start_time: base + 3_600,
            os_render_queue_end_time: base + 4_000,
            gpu_render_start_time: base + 4_000,
            gpu_render_end_time: base + 8_100,
        }
    }

    #[test]
    fn test_single_newest_slot() {
        let mut slots = [FrameReport::default(); FRAME_REPORT_COUNT];
        slots[63] = FrameReport {
            frame_id: 1000,
            ..FrameReport::default()
        };
        let report = LatencyReport::from_slots(slots);

        assert_eq!(report.valid_count(), 1);
        let newest = report.newest().unwrap();
        assert_eq!(newest.slot, 63);
        assert_eq!(newest.frame.frame_id, 1000);
        assert_eq!(report.oldest().unwrap().slot, 63);
        assert!((0..63).all(|index| report.slot(index).is_none()));
        assert!(!report.is_empty());
        assert!(!report.is_filled());
    }

    #[test]
    fn test_frame_zero_with_timestamps_is_valid() {
        let mut slots = [FrameReport::default(); FRAME_REPORT_COUNT];
        slots[63] = frame(0, 10_000);
        let report = LatencyReport::from_slots(slots);

        assert_eq!(report.valid_count(), 1);
        assert_eq!(report.slot(63).unwrap().frame_id, 0);
    }

    #[test]
    fn test_empty_report() {
        let report = LatencyReport::from_params(&LatencyResultParams::default());
        assert!(report.is_empty());
        assert!(report.newest().is_none());
        assert!(report.is_ordered());
        assert_eq!(report.stats().frames, 0);
    }

    #[test]
    fn test_stage_spans() {
        let frame = frame(7, 50_000);
        assert_eq!(frame.simulation_us(), Some(1_000));
        assert_eq!(frame.render_submit_us(), Some(2_000));
        assert_eq!(frame.present_us(), Some(500));
        assert_eq!(frame.gpu_render_us(), Some(4_100));
        assert_eq!(frame.total_latency_us(), Some(8_000));

        let partial = FrameReport {
            frame_id: 3,
            sim_start_time: 10,
            ..FrameReport::default()
        };
        assert_eq!(partial.simulation_us(), None);
        assert_eq!(partial.total_latency_us(), None);
    }

    #[test]
    fn test_stats_and_ordering() {
        let mut slots = [FrameReport::default(); FRAME_REPORT_COUNT];
        slots[62] = frame(1, 10_000);
        slots[63] = frame(2, 30_000);
        let report = LatencyReport::from_slots(slots);

        assert!(report.is_ordered());
        let stats = report.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.input_latency_ms, 8.0);
        assert_eq!(stats.render_latency_ms, 2.0);
        assert_eq!(stats.gpu_render_ms, 4.1);

        slots[62] = frame(5, 10_000);
        assert!(!LatencyReport::from_slots(slots).is_ordered());
    }

    #[test]
    fn test_get_latency_from_driver() {
        let driver = Arc::new(FakeDriver::new());
        let session = Session::new(driver.clone());
        session.acquire().unwrap();
        DeviceRegistrar::new(&session).register_device(DEVICE).unwrap();

        let mut params = LatencyResultParams::default();
        params.frame_report[63] = frame(1000, 1);
        driver.set_latency_report(DEVICE, params);

        let report = TelemetryReader::new(&session).get_latency(DEVICE).unwrap();
        assert_eq!(report.valid_count(), 1);
        assert_eq!(report.newest().unwrap().frame.frame_id, 1000);
    }

    #[test]
    fn test_get_latency_unregistered() {
        let session = Session::new(Arc::new(FakeDriver::new()));
        session.acquire().unwrap();
        assert_eq!(
            TelemetryReader::new(&session).get_latency(DEVICE),
            Err(LatencyError::Driver(Status::InvalidHandle))
        );
    }
}
