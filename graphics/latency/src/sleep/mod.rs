//! Sleep policy control
//!
//! The sleep policy is persistent per device: low latency mode, GPU clock boost
//! and a minimum frame interval. The three settings are independent; low
//! latency mode lowers latency without touching frame rate, while the interval
//! caps frame rate (10 000 µs limits rendering to 100 FPS).

use crate::abi::{GetSleepStatusParams, SetSleepModeParams};
use crate::common::{DeviceHandle, LatencyError, Result, Status};
use crate::device::DeviceContext;
use crate::session::Session;

/// Requested sleep policy for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SleepPolicy {
    /// Low latency mode
    pub low_latency: bool,
    /// Keep GPU clocks at maximum even when mostly idle
    pub boost: bool,
    /// Minimum frame interval in microseconds (0 = uncapped)
    pub minimum_interval_us: u32,
}

impl SleepPolicy {
    /// Everything off, no frame rate cap
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Low latency mode on, no boost, no cap
    pub fn low_latency() -> Self {
        Self {
            low_latency: true,
            ..Self::default()
        }
    }

    /// Set the boost flag
    pub fn with_boost(mut self, boost: bool) -> Self {
        self.boost = boost;
        self
    }

    /// Cap the frame rate (0 FPS removes the cap)
    pub fn with_frame_rate_limit(mut self, fps: u32) -> Self {
        self.minimum_interval_us = if fps == 0 { 0 } else { 1_000_000 / fps };
        self
    }

    /// Frame rate cap implied by the interval, if any
    pub fn frame_rate_limit(&self) -> Option<f32> {
        if self.minimum_interval_us == 0 {
            None
        } else {
            Some(1_000_000.0 / self.minimum_interval_us as f32)
        }
    }

    fn to_params(self) -> SetSleepModeParams {
        SetSleepModeParams {
            low_latency_mode: self.low_latency,
            low_latency_boost: self.boost,
            minimum_interval_us: self.minimum_interval_us,
        }
    }
}

/// Sleep policy controller
#[derive(Debug, Clone)]
pub struct SleepPolicyController {
    session: Session,
}

impl SleepPolicyController {
    /// Create a controller for a session
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
        }
    }

    /// Apply a sleep policy in a single driver request
    ///
    /// Meant for infrequent changes (menus, settings); the policy persists for
    /// the device. Fails with `InvalidArgument` for an unregistered device.
    pub fn set_policy(&self, device: DeviceHandle, policy: SleepPolicy) -> Result<()> {
        let churn_frames = self.session.config().policy_churn_frames;

        self.session
            .with_device(device, "set_policy", Status::InvalidArgument, |ctx| {
                LatencyError::check(
                    self.session
                        .transport()
                        .set_sleep_mode(device, &policy.to_params()),
                )?;

                if is_policy_churn(ctx, churn_frames) {
                    log::warn!(
                        "Sleep policy for device {} changed again after {} frame(s); \
                         the policy persists and need not be set every frame",
                        device,
                        ctx.frames_since_policy
                    );
                }

                log::debug!("Sleep policy for device {}: {:?}", device, policy);
                ctx.requested_policy = Some(policy);
                ctx.frames_since_policy = 0;
                Ok(())
            })
    }

    /// Query whether low latency mode is effectively enabled
    ///
    /// This is the driver's view and may differ from the last requested policy
    /// (unsupported platform, control panel override).
    pub fn get_status(&self, device: DeviceHandle) -> Result<bool> {
        self.session
            .with_device(device, "get_status", Status::InvalidHandle, |ctx| {
                let mut params = GetSleepStatusParams::default();
                LatencyError::check(
                    self.session
                        .transport()
                        .get_sleep_status(device, &mut params),
                )?;

                if let Some(requested) = ctx.requested_policy {
                    if requested.low_latency != params.low_latency_mode {
                        log::debug!(
                            "Device {} low latency mode is {} although {} was requested",
                            device,
                            params.low_latency_mode,
                            requested.low_latency
                        );
                    }
                }
                Ok(params.low_latency_mode)
            })
    }

    /// Last policy successfully applied to a device
    pub fn last_requested(&self, device: DeviceHandle) -> Option<SleepPolicy> {
        self.session
            .with_device(device, "last_requested", Status::InvalidHandle, |ctx| {
                Ok(ctx.requested_policy)
            })
            .ok()
            .flatten()
    }
}

/// A policy change counts as churn only once frames are being paced
///
/// Frames are counted by sleep calls, so without sleep there is no cadence to
/// compare against.
fn is_policy_churn(ctx: &DeviceContext, churn_frames: u64) -> bool {
    ctx.requested_policy.is_some()
        && ctx.last_signal.is_some()
        && ctx.frames_since_policy < churn_frames
}
