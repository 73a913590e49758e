//! Out-of-band queues
//!
//! Queues whose submissions or presents do not follow the main frame cadence
//! (async compute, a separate present path) are flagged to the driver so it
//! does not fold their timing into the frame pacing model. There is no
//! unregister call; a binding lives as long as the queue.

use crate::common::{
    DeviceHandle, LatencyError, OutOfBandQueueType, QueueHandle, Result, Status,
};
use crate::session::Session;

/// A queue flagged as out of band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutOfBandQueueBinding {
    /// Device owning the queue
    pub device: DeviceHandle,
    /// Flagged queue
    pub queue: QueueHandle,
    /// Kind of out-of-band work on the queue
    pub queue_type: OutOfBandQueueType,
}

/// Out-of-band queue registrar
#[derive(Debug, Clone)]
pub struct OutOfBandQueues {
    session: Session,
}

impl OutOfBandQueues {
    /// Create a registrar for a session
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
        }
    }

    /// Flag a queue as running outside the frame cadence
    ///
    /// Re-flagging a queue is forwarded; how the driver treats it is up to the
    /// driver. Frame marker tracking is not touched.
    pub fn notify_out_of_band_queue(
        &self,
        device: DeviceHandle,
        queue: QueueHandle,
        queue_type: OutOfBandQueueType,
    ) -> Result<()> {
        self.session
            .with_device(device, "notify_out_of_band_queue", Status::InvalidHandle, |ctx| {
                if queue.is_null() {
                    return Err(LatencyError::Driver(Status::InvalidHandle));
                }

                LatencyError::check(self.session.transport().notify_out_of_band_queue(
                    device,
                    queue,
                    queue_type.as_raw(),
                ))?;

                let binding = OutOfBandQueueBinding {
                    device,
                    queue,
                    queue_type,
                };
                if ctx.out_of_band.contains(&binding) {
                    log::debug!(
                        "Queue {} already flagged as {:?} out of band",
                        queue,
                        queue_type
                    );
                } else {
                    log::debug!(
                        "Queue {} on device {} flagged as {:?} out of band",
                        queue,
                        device,
                        queue_type
                    );
                    ctx.out_of_band.push(binding);
                }
                Ok(())
            })
    }

    /// Queues flagged for a device
    pub fn bindings(&self, device: DeviceHandle) -> Vec<OutOfBandQueueBinding> {
        self.session
            .with_device(device, "bindings", Status::InvalidHandle, |ctx| {
                Ok(ctx.out_of_band.clone())
            })
            .unwrap_or_default()
    }
}
