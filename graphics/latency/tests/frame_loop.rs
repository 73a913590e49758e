use std::sync::Arc;

use latency_vk::transport::fake::{Command, FakeDriver};
use latency_vk::{
    DeviceHandle, DeviceRegistrar, FrameCounter, FramePacer, LatencyConfig, LatencyError,
    MarkerSequencer, MarkerType, MarkerValidation, MarkerViolation, OutOfBandQueueType,
    OutOfBandQueues, QueueHandle, Session, SleepPolicy, SleepPolicyController, Status,
    TelemetryReader, FRAME_REPORT_COUNT, RECOMMENDED_WARMUP_FRAMES,
};

const DEVICE: DeviceHandle = DeviceHandle::from_raw(0x7000_0001);

fn render_frame(
    pacer: &FramePacer,
    markers: &MarkerSequencer,
    frame: u64,
) -> latency_vk::Result<()> {
    pacer.sleep(DEVICE, frame)?;
    markers.set_marker(DEVICE, frame, MarkerType::SimulationStart)?;
    markers.set_marker(DEVICE, frame, MarkerType::InputSample)?;
    markers.set_marker(DEVICE, frame, MarkerType::SimulationEnd)?;
    markers.set_marker(DEVICE, frame, MarkerType::RenderSubmitStart)?;
    markers.set_marker(DEVICE, frame, MarkerType::RenderSubmitEnd)?;
    markers.set_marker(DEVICE, frame, MarkerType::PresentStart)?;
    markers.set_marker(DEVICE, frame, MarkerType::PresentEnd)
}

#[test]
fn full_session_lifecycle() {
    let driver = Arc::new(
        FakeDriver::new().with_min_valid_frames(RECOMMENDED_WARMUP_FRAMES as usize),
    );
    let config = LatencyConfig::new().with_marker_validation(MarkerValidation::Strict);
    let session = Session::with_config(driver.clone(), config);
    session.acquire().unwrap();

    let registrar = DeviceRegistrar::new(&session);
    let semaphore = registrar.register_device(DEVICE).unwrap();
    assert!(!semaphore.is_null());

    let policy = SleepPolicyController::new(&session);
    policy
        .set_policy(DEVICE, SleepPolicy::low_latency().with_boost(true))
        .unwrap();
    assert_eq!(policy.get_status(DEVICE), Ok(true));

    let pacer = FramePacer::new(&session);
    let markers = MarkerSequencer::new(&session);
    let telemetry = TelemetryReader::new(&session);
    let mut frames = FrameCounter::starting_at(500);

    for _ in 0..10 {
        render_frame(&pacer, &markers, frames.advance()).unwrap();
    }
    assert!(telemetry.get_latency(DEVICE).unwrap().is_empty());

    for _ in 10..RECOMMENDED_WARMUP_FRAMES {
        render_frame(&pacer, &markers, frames.advance()).unwrap();
    }

    let report = telemetry.get_latency(DEVICE).unwrap();
    assert!(report.is_filled());
    assert!(report.is_ordered());
    assert_eq!(report.valid_count(), FRAME_REPORT_COUNT);
    let newest = report.newest().unwrap();
    assert_eq!(newest.slot, FRAME_REPORT_COUNT - 1);
    assert_eq!(newest.frame.frame_id, frames.current());

    let stats = report.stats();
    assert_eq!(stats.frames, FRAME_REPORT_COUNT);
    assert!(stats.input_latency_ms > stats.gpu_render_ms);

    assert!(session.release().unwrap_err().is_retryable());
    registrar.unregister_device(DEVICE).unwrap();
    session.release().unwrap();
    assert!(!session.is_initialized());
    assert_eq!(driver.unload_count(), 1);
}

#[test]
fn out_of_band_work_alongside_frames() {
    let driver = Arc::new(FakeDriver::new());
    let config = LatencyConfig::new().with_marker_validation(MarkerValidation::Strict);
    let session = Session::with_config(driver.clone(), config);
    session.acquire().unwrap();
    DeviceRegistrar::new(&session).register_device(DEVICE).unwrap();

    let pacer = FramePacer::new(&session);
    let markers = MarkerSequencer::new(&session);
    let queues = OutOfBandQueues::new(&session);
    let compute = QueueHandle::from_raw(0xc0c0);

    pacer.sleep(DEVICE, 1).unwrap();
    markers.set_marker(DEVICE, 1, MarkerType::SimulationStart).unwrap();

    queues
        .notify_out_of_band_queue(DEVICE, compute, OutOfBandQueueType::Render)
        .unwrap();
    markers
        .set_marker(DEVICE, 1, MarkerType::OutOfBandRenderSubmitStart)
        .unwrap();
    markers
        .set_marker(DEVICE, 1, MarkerType::OutOfBandRenderSubmitEnd)
        .unwrap();
    assert_eq!(markers.in_flight(DEVICE), vec![1]);

    let err = markers
        .set_marker(DEVICE, 1, MarkerType::OutOfBandPresentStart)
        .unwrap_err();
    assert!(matches!(err, LatencyError::MarkerOrder(_)));

    for marker in [
        MarkerType::SimulationEnd,
        MarkerType::RenderSubmitStart,
        MarkerType::RenderSubmitEnd,
        MarkerType::PresentStart,
        MarkerType::PresentEnd,
    ] {
        markers.set_marker(DEVICE, 1, marker).unwrap();
    }
    assert!(markers.in_flight(DEVICE).is_empty());
    assert_eq!(driver.completed_frames(DEVICE), 1);
}

#[test]
fn calls_before_acquire_are_rejected() {
    let driver = Arc::new(FakeDriver::new());
    let session = Session::new(driver.clone());

    let not_initialized = Err(LatencyError::Driver(Status::ApiNotInitialized));
    assert_eq!(
        DeviceRegistrar::new(&session)
            .register_device(DEVICE)
            .map(|_| ()),
        not_initialized
    );
    assert_eq!(FramePacer::new(&session).sleep(DEVICE, 1), not_initialized);
    assert_eq!(
        MarkerSequencer::new(&session).set_marker(DEVICE, 1, MarkerType::SimulationStart),
        not_initialized
    );
    assert_eq!(
        TelemetryReader::new(&session).get_latency(DEVICE).map(|_| ()),
        not_initialized
    );
    assert!(driver.calls().is_empty());
}

#[test]
fn feature_absence_is_not_fatal() {
    let driver = Arc::new(FakeDriver::new());
    driver.inject_status(Command::Initialize, Status::NoVulkanSupport);
    let session = Session::new(driver.clone());

    let err = session.acquire().unwrap_err();
    assert!(err.is_feature_absent());
    assert!(!err.is_fatal());
    assert!(!session.is_initialized());
}

#[test]
fn strict_pacing_rejects_skipped_sleep() {
    let driver = Arc::new(FakeDriver::new());
    let config = LatencyConfig::new().with_marker_validation(MarkerValidation::Strict);
    let session = Session::with_config(driver.clone(), config);
    session.acquire().unwrap();
    DeviceRegistrar::new(&session).register_device(DEVICE).unwrap();

    let pacer = FramePacer::new(&session);
    let markers = MarkerSequencer::new(&session);
    let mut frames = FrameCounter::default();
    for _ in 0..3 {
        render_frame(&pacer, &markers, frames.advance()).unwrap();
    }

    let skipped = frames.advance();
    assert_eq!(
        markers.set_marker(DEVICE, skipped, MarkerType::SimulationStart),
        Err(LatencyError::MarkerOrder(
            MarkerViolation::SimulationStartWithoutSleep { frame_id: skipped }
        ))
    );
    render_frame(&pacer, &markers, skipped).unwrap();
    assert_eq!(driver.completed_frames(DEVICE), 4);
}
