//! In-memory driver for tests and headless runs
//!
//! `FakeDriver` behaves like the low-latency driver as far as the coordination
//! layer can observe: it keeps its own reference count, refuses to unload
//! while devices are registered, stamps markers with a synthetic microsecond
//! clock and assembles completed frames into the 64-slot report.
//!
//! Per-command call counts are kept for the driver's lifetime; the call log
//! itself only holds the most recent calls.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::abi::{
    FrameReport, GetSleepStatusParams, LatencyMarkerParams, LatencyResultParams,
    SetSleepModeParams,
};
use crate::common::{
    DeviceHandle, MarkerType, OutOfBandQueueType, QueueHandle, SemaphoreHandle, Status,
    FRAME_REPORT_COUNT,
};
use crate::transport::Transport;

/// Synthetic time between two consecutive markers (microseconds)
const MARKER_STEP_US: u64 = 100;

/// First semaphore handle handed out
const SEMAPHORE_BASE: u64 = 0x5e3a_0000;

/// Number of recent calls kept in the call log
pub const CALL_LOG_LIMIT: usize = 1024;

/// Driver command, used to target status injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Library load
    Initialize,
    /// Library unload
    Unload,
    /// Device registration
    InitLowLatencyDevice,
    /// Device teardown
    DestroyLowLatencyDevice,
    /// Effective low latency state query
    GetSleepStatus,
    /// Sleep policy update
    SetSleepMode,
    /// Per-frame sleep
    Sleep,
    /// Latency report read
    GetLatency,
    /// Latency marker
    SetLatencyMarker,
    /// Out-of-band queue notification
    NotifyOutOfBandQueue,
}

/// A call observed by the fake driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    /// Library load
    Initialize,
    /// Library unload
    Unload,
    /// Device registration
    InitLowLatencyDevice(DeviceHandle),
    /// Device teardown
    DestroyLowLatencyDevice(DeviceHandle),
    /// Effective low latency state query
    GetSleepStatus(DeviceHandle),
    /// Sleep policy update with the requested mode
    SetSleepMode(DeviceHandle, SetSleepModeParams),
    /// Per-frame sleep with its signal value
    Sleep(DeviceHandle, u64),
    /// Latency report read
    GetLatency(DeviceHandle),
    /// Latency marker as sent
    SetLatencyMarker(DeviceHandle, LatencyMarkerParams),
    /// Out-of-band queue notification with the raw queue type
    NotifyOutOfBandQueue(DeviceHandle, QueueHandle, u32),
}

impl DriverCall {
    /// Command this call was issued for
    pub fn command(&self) -> Command {
        match self {
            DriverCall::Initialize => Command::Initialize,
            DriverCall::Unload => Command::Unload,
            DriverCall::InitLowLatencyDevice(_) => Command::InitLowLatencyDevice,
            DriverCall::DestroyLowLatencyDevice(_) => Command::DestroyLowLatencyDevice,
            DriverCall::GetSleepStatus(_) => Command::GetSleepStatus,
            DriverCall::SetSleepMode(..) => Command::SetSleepMode,
            DriverCall::Sleep(..) => Command::Sleep,
            DriverCall::GetLatency(_) => Command::GetLatency,
            DriverCall::SetLatencyMarker(..) => Command::SetLatencyMarker,
            DriverCall::NotifyOutOfBandQueue(..) => Command::NotifyOutOfBandQueue,
        }
    }
}

#[derive(Default)]
struct FakeDevice {
    semaphore: SemaphoreHandle,
    mode: SetSleepModeParams,
    mode_override: Option<bool>,
    last_signal: Option<u64>,
    pending: BTreeMap<u64, FrameReport>,
    completed: VecDeque<FrameReport>,
    completed_total: usize,
    report_override: Option<LatencyResultParams>,
    out_of_band: Vec<(QueueHandle, OutOfBandQueueType)>,
}

impl FakeDevice {
    fn stamp(&mut self, frame_id: u64, marker: MarkerType, now: u64) {
        if marker.is_out_of_band()
            || matches!(marker, MarkerType::TriggerFlash | MarkerType::PcLatencyPing)
        {
            return;
        }

        let frame = self.pending.entry(frame_id).or_insert_with(|| FrameReport {
            frame_id,
            ..FrameReport::default()
        });

        match marker {
            MarkerType::SimulationStart => frame.sim_start_time = now,
            MarkerType::SimulationEnd => frame.sim_end_time = now,
            MarkerType::RenderSubmitStart => frame.render_submit_start_time = now,
            MarkerType::RenderSubmitEnd => frame.render_submit_end_time = now,
            MarkerType::PresentStart => frame.present_start_time = now,
            MarkerType::InputSample => frame.input_sample_time = now,
            MarkerType::PresentEnd => {
                frame.present_end_time = now;
                if let Some(mut done) = self.pending.remove(&frame_id) {
                    Self::synthesize_driver_times(&mut done);
                    self.completed.push_back(done);
                    self.completed_total += 1;
                    while self.completed.len() > FRAME_REPORT_COUNT {
                        self.completed.pop_front();
                    }
                }
            }
            _ => {}
        }
    }

    fn synthesize_driver_times(frame: &mut FrameReport) {
        let submit = frame.render_submit_start_time.max(frame.sim_end_time);
        frame.driver_start_time = submit + 10;
        frame.driver_end_time = frame.present_end_time + 20;
        frame.os_render_queue_start_time = frame.driver_end_time;
        frame.os_render_queue_end_time = frame.os_render_queue_start_time + 300;
        frame.gpu_render_start_time = frame.os_render_queue_end_time;
        frame.gpu_render_end_time = frame.gpu_render_start_time + 2_000;
    }
}

#[derive(Default)]
struct FakeState {
    ref_count: u32,
    unload_count: usize,
    library_missing: bool,
    min_valid_frames: usize,
    next_semaphore: u64,
    clock_us: u64,
    devices: HashMap<DeviceHandle, FakeDevice>,
    injected: HashMap<Command, VecDeque<Status>>,
    calls: VecDeque<DriverCall>,
    call_counts: HashMap<Command, usize>,
}

impl FakeState {
    fn record(&mut self, call: DriverCall) -> Option<i32> {
        let command = call.command();
        *self.call_counts.entry(command).or_default() += 1;
        self.calls.push_back(call);
        if self.calls.len() > CALL_LOG_LIMIT {
            self.calls.pop_front();
        }

        if let Some(status) = self.injected.get_mut(&command).and_then(VecDeque::pop_front) {
            log::debug!("Fake driver: injected {:?} for {:?}", status, command);
            return Some(status.as_raw());
        }

        if command != Command::Initialize && self.ref_count == 0 {
            return Some(Status::ApiNotInitialized.as_raw());
        }

        None
    }

    fn tick(&mut self, step: u64) -> u64 {
        self.clock_us += step;
        self.clock_us
    }
}

/// In-memory low-latency driver
pub struct FakeDriver {
    state: Mutex<FakeState>,
}

impl FakeDriver {
    /// Create a fake driver that reports completed frames immediately
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                next_semaphore: SEMAPHORE_BASE,
                ..FakeState::default()
            }),
        }
    }

    /// Keep reports all-zero until this many frames have completed
    pub fn with_min_valid_frames(self, frames: usize) -> Self {
        self.state.lock().min_valid_frames = frames;
        self
    }

    /// Make `initialize` fail as if the support library were missing
    pub fn set_library_missing(&self, missing: bool) {
        self.state.lock().library_missing = missing;
    }

    /// Force the effective low latency state reported for a device
    pub fn set_sleep_status_override(&self, device: DeviceHandle, enabled: Option<bool>) {
        if let Some(dev) = self.state.lock().devices.get_mut(&device) {
            dev.mode_override = enabled;
        }
    }

    /// Replace the generated report of a device with a fixed one
    pub fn set_latency_report(&self, device: DeviceHandle, report: LatencyResultParams) {
        if let Some(dev) = self.state.lock().devices.get_mut(&device) {
            dev.report_override = Some(report);
        }
    }

    /// Return `status` from the next call of `command`
    pub fn inject_status(&self, command: Command, status: Status) {
        self.state
            .lock()
            .injected
            .entry(command)
            .or_default()
            .push_back(status);
    }

    /// Most recent calls, oldest first (at most [`CALL_LOG_LIMIT`])
    pub fn calls(&self) -> Vec<DriverCall> {
        self.state.lock().calls.iter().copied().collect()
    }

    /// Number of observed calls of one command
    pub fn call_count(&self, command: Command) -> usize {
        self.state
            .lock()
            .call_counts
            .get(&command)
            .copied()
            .unwrap_or(0)
    }

    /// Forget observed calls and their counts
    pub fn clear_calls(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.call_counts.clear();
    }

    /// Driver-side reference count
    pub fn ref_count(&self) -> u32 {
        self.state.lock().ref_count
    }

    /// Number of completed library unloads
    pub fn unload_count(&self) -> usize {
        self.state.lock().unload_count
    }

    /// Check if a device is registered with the driver
    pub fn is_device_registered(&self, device: DeviceHandle) -> bool {
        self.state.lock().devices.contains_key(&device)
    }

    /// Sleep mode last applied to a device
    pub fn sleep_mode(&self, device: DeviceHandle) -> Option<SetSleepModeParams> {
        self.state.lock().devices.get(&device).map(|dev| dev.mode)
    }

    /// Last armed signal value of a device
    pub fn last_signal(&self, device: DeviceHandle) -> Option<u64> {
        self.state.lock().devices.get(&device).and_then(|dev| dev.last_signal)
    }

    /// Queues flagged as out of band for a device
    pub fn out_of_band_queues(
        &self,
        device: DeviceHandle,
    ) -> Vec<(QueueHandle, OutOfBandQueueType)> {
        self.state
            .lock()
            .devices
            .get(&device)
            .map(|dev| dev.out_of_band.clone())
            .unwrap_or_default()
    }

    /// Number of frames completed on a device since registration
    pub fn completed_frames(&self, device: DeviceHandle) -> usize {
        self.state
            .lock()
            .devices
            .get(&device)
            .map_or(0, |dev| dev.completed_total)
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for FakeDriver {
    fn initialize(&self) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::Initialize) {
            return status;
        }
        if state.library_missing {
            return Status::LibraryNotFound.as_raw();
        }
        state.ref_count += 1;
        Status::Ok.as_raw()
    }

    fn unload(&self) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::Unload) {
            return status;
        }
        if state.ref_count == 1 && !state.devices.is_empty() {
            return Status::ApiInUse.as_raw();
        }
        state.ref_count -= 1;
        if state.ref_count == 0 {
            state.unload_count += 1;
        }
        Status::Ok.as_raw()
    }

    fn init_low_latency_device(
        &self,
        device: DeviceHandle,
        signal_semaphore: &mut SemaphoreHandle,
    ) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::InitLowLatencyDevice(device)) {
            return status;
        }
        if device.is_null() {
            return Status::InvalidHandle.as_raw();
        }
        if state.devices.contains_key(&device) {
            return Status::InvalidArgument.as_raw();
        }

        let semaphore = SemaphoreHandle::from_raw(state.next_semaphore);
        state.next_semaphore += 1;
        state.devices.insert(
            device,
            FakeDevice {
                semaphore,
                ..FakeDevice::default()
            },
        );
        *signal_semaphore = semaphore;
        Status::Ok.as_raw()
    }

    fn destroy_low_latency_device(&self, device: DeviceHandle) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::DestroyLowLatencyDevice(device)) {
            return status;
        }
        match state.devices.remove(&device) {
            Some(dev) => {
                log::trace!("Fake driver: released semaphore {}", dev.semaphore);
                Status::Ok.as_raw()
            }
            None => Status::InvalidHandle.as_raw(),
        }
    }

    fn get_sleep_status(&self, device: DeviceHandle, params: &mut GetSleepStatusParams) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::GetSleepStatus(device)) {
            return status;
        }
        match state.devices.get(&device) {
            Some(dev) => {
                params.low_latency_mode = dev.mode_override.unwrap_or(dev.mode.low_latency_mode);
                Status::Ok.as_raw()
            }
            None => Status::InvalidHandle.as_raw(),
        }
    }

    fn set_sleep_mode(&self, device: DeviceHandle, params: &SetSleepModeParams) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::SetSleepMode(device, *params)) {
            return status;
        }
        match state.devices.get_mut(&device) {
            Some(dev) => {
                dev.mode = *params;
                Status::Ok.as_raw()
            }
            None => Status::InvalidArgument.as_raw(),
        }
    }

    fn sleep(&self, device: DeviceHandle, signal_value: u64) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::Sleep(device, signal_value)) {
            return status;
        }
        let interval = match state.devices.get_mut(&device) {
            Some(dev) => {
                dev.last_signal = Some(signal_value);
                u64::from(dev.mode.minimum_interval_us)
            }
            None => return Status::InvalidHandle.as_raw(),
        };
        state.tick(interval);
        Status::Ok.as_raw()
    }

    fn get_latency(&self, device: DeviceHandle, params: &mut LatencyResultParams) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::GetLatency(device)) {
            return status;
        }
        let min_valid_frames = state.min_valid_frames;
        let Some(dev) = state.devices.get(&device) else {
            return Status::InvalidHandle.as_raw();
        };

        *params = LatencyResultParams::default();
        if let Some(report) = &dev.report_override {
            *params = *report;
        } else if dev.completed_total >= min_valid_frames {
            let offset = FRAME_REPORT_COUNT - dev.completed.len();
            for (slot, frame) in dev.completed.iter().enumerate() {
                params.frame_report[offset + slot] = *frame;
            }
        }
        Status::Ok.as_raw()
    }

    fn set_latency_marker(&self, device: DeviceHandle, params: &LatencyMarkerParams) -> i32 {
        let mut state = self.state.lock();
        if let Some(status) = state.record(DriverCall::SetLatencyMarker(device, *params)) {
            return status;
        }
        if !state.devices.contains_key(&device) {
            return Status::InvalidHandle.as_raw();
        }
        let Some(marker) = MarkerType::from_raw(params.marker_type) else {
            return Status::InvalidArgument.as_raw();
        };

        let now = state.tick(MARKER_STEP_US);
        if let Some(dev) = state.devices.get_mut(&device) {
            dev.stamp(params.frame_id, marker, now);
        }
        Status::Ok.as_raw()
    }

    fn notify_out_of_band_queue(
        &self,
        device: DeviceHandle,
        queue: QueueHandle,
        queue_type: u32,
    ) -> i32 {
        let mut state = self.state.lock();
        let call = DriverCall::NotifyOutOfBandQueue(device, queue, queue_type);
        if let Some(status) = state.record(call) {
            return status;
        }
        let Some(queue_type) = OutOfBandQueueType::from_raw(queue_type) else {
            return Status::InvalidArgument.as_raw();
        };
        match state.devices.get_mut(&device) {
            Some(dev) => {
                if !dev.out_of_band.contains(&(queue, queue_type)) {
                    dev.out_of_band.push((queue, queue_type));
                }
                Status::Ok.as_raw()
            }
            None => Status::InvalidHandle.as_raw(),
        }
    }
}
