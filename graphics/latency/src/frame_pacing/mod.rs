//! Frame pacing
//!
//! [`FramePacer::sleep`] is the per-frame entry point: called once at the very
//! start of each frame (before input sampling), it asks the driver to signal
//! the device semaphore with `signal_value` at the latency-optimal wake point.
//! The call only arms the signal. The render loop then waits on the semaphore
//! for `signal_value` itself, with a generous timeout.
//!
//! Signal values should increase by one every frame. The driver does not
//! report violations and neither does this layer; a non-increasing value is
//! logged and forwarded.
//!
//! Unless marker validation is off, each sleep is also checked against the
//! device's marker sequence: one sleep per frame, before `SimulationStart`.
//! Strict validation rejects a second sleep without the driver seeing it.

use crate::common::{DeviceHandle, LatencyError, Result, Status};
use crate::config::MarkerValidation;
use crate::session::Session;

/// Frame pacer
#[derive(Debug, Clone)]
pub struct FramePacer {
    session: Session,
}

impl FramePacer {
    /// Create a frame pacer for a session
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
        }
    }

    /// Arm the device semaphore for this frame
    pub fn sleep(&self, device: DeviceHandle, signal_value: u64) -> Result<()> {
        let validation = self.session.config().marker_validation;

        self.session
            .with_device(device, "sleep", Status::InvalidHandle, |ctx| {
                if let Some(previous) = ctx.last_signal {
                    if signal_value <= previous {
                        log::warn!(
                            "Sleep signal value {} for device {} does not increase (previous {})",
                            signal_value,
                            device,
                            previous
                        );
                    }
                }

                if validation != MarkerValidation::Off {
                    if let Err(violation) = ctx.markers.check_sleep(signal_value) {
                        log::warn!("Device {}: {}", device, violation);
                        if validation == MarkerValidation::Strict {
                            return Err(violation.into());
                        }
                    }
                }

                log::trace!("Frame {} sleep on device {}", signal_value, device);
                LatencyError::check(self.session.transport().sleep(device, signal_value))?;

                if validation != MarkerValidation::Off {
                    ctx.markers.record_sleep();
                }
                ctx.last_signal = Some(signal_value);
                ctx.frames_since_policy = ctx.frames_since_policy.saturating_add(1);
                Ok(())
            })
    }

    /// Last signal value armed for a device
    pub fn last_signal(&self, device: DeviceHandle) -> Option<u64> {
        self.session
            .with_device(device, "last_signal", Status::InvalidHandle, |ctx| {
                Ok(ctx.last_signal)
            })
            .ok()
            .flatten()
    }
}

/// Strictly increasing per-frame counter
///
/// Convenience for callers that do not already number their frames; the
/// same value can be used as sleep signal value and marker frame ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCounter {
    current: u64,
}

impl FrameCounter {
    /// Counter whose first [`advance`](Self::advance) yields `first` (at least 1)
    pub fn starting_at(first: u64) -> Self {
        Self {
            current: first.saturating_sub(1),
        }
    }

    /// Move to the next frame and return its value
    pub fn advance(&mut self) -> u64 {
        self.current += 1;
        self.current
    }

    /// Value of the current frame
    pub fn current(&self) -> u64 {
        self.current
    }
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::LatencyConfig;
    use crate::device::DeviceRegistrar;
    use crate::sleep::{SleepPolicy, SleepPolicyController};
    use crate::transport::fake::{Command, FakeDriver};

    const DEVICE: DeviceHandle = DeviceHandle::from_raw(0xf4a3e);

    /// Session with a registered device and marker validation off, so frames
    /// can be paced without markers
    fn setup() -> (Arc<FakeDriver>, Session, FramePacer) {
        let driver = Arc::new(FakeDriver::new());
        let config = LatencyConfig::new().with_marker_validation(MarkerValidation::Off);
        let session = Session::with_config(driver.clone(), config);
        session.acquire().unwrap();
        DeviceRegistrar::new(&session).register_device(DEVICE).unwrap();
        let pacer = FramePacer::new(&session);
        (driver, session, pacer)
    }

    #[test]
    fn test_sleep_unregistered_device() {
        let (driver, _session, pacer) = setup();

        assert_eq!(
            pacer.sleep(DeviceHandle::from_raw(0x7), 7),
            Err(LatencyError::Driver(Status::InvalidHandle))
        );
        assert_eq!(driver.call_count(Command::Sleep), 0);
    }

    #[test]
    fn test_sleep_before_acquire() {
        let session = Session::new(Arc::new(FakeDriver::new()));
        assert_eq!(
            FramePacer::new(&session).sleep(DEVICE, 1),
            Err(LatencyError::Driver(Status::ApiNotInitialized))
        );
    }

    #[test]
    fn test_sleep_arms_signal() {
        let (driver, _session, pacer) = setup();

        let mut counter = FrameCounter::default();
        for _ in 0..3 {
            pacer.sleep(DEVICE, counter.advance()).unwrap();
        }

        assert_eq!(driver.last_signal(DEVICE), Some(3));
        assert_eq!(pacer.last_signal(DEVICE), Some(3));
    }

    #[test]
    fn test_non_monotonic_signal_is_forwarded() {
        let (driver, _session, pacer) = setup();

        pacer.sleep(DEVICE, 10).unwrap();
        pacer.sleep(DEVICE, 10).unwrap();
        pacer.sleep(DEVICE, 4).unwrap();

        assert_eq!(driver.call_count(Command::Sleep), 3);
        assert_eq!(driver.last_signal(DEVICE), Some(4));
    }

    #[test]
    fn test_sleep_counts_frames_for_policy_churn() {
        let (_driver, session, pacer) = setup();
        let controller = SleepPolicyController::new(&session);

        controller
            .set_policy(DEVICE, SleepPolicy::low_latency())
            .unwrap();
        for value in 1..=5 {
            pacer.sleep(DEVICE, value).unwrap();
        }

        let frames = session
            .with_device(DEVICE, "test", Status::InvalidHandle, |ctx| {
                Ok(ctx.frames_since_policy)
            })
            .unwrap();
        assert_eq!(frames, 5);
    }

    #[test]
    fn test_frame_counter_sequence() {
        let mut counter = FrameCounter::starting_at(100);
        assert_eq!(counter.advance(), 100);
        assert_eq!(counter.advance(), 101);
        assert_eq!(counter.current(), 101);
    }
}
