//! Low-latency device registration

use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{DeviceHandle, LatencyError, Result, SemaphoreHandle, Status};
use crate::markers::MarkerTracker;
use crate::out_of_band::OutOfBandQueueBinding;
use crate::session::Session;
use crate::sleep::SleepPolicy;

/// Device context shared between the session registry and in-flight calls
pub(crate) type SharedDevice = Arc<Mutex<DeviceContext>>;

/// Per-device tracking state
///
/// Created on registration and dropped on teardown, so nothing carries over
/// to a later registration of the same handle.
#[derive(Debug)]
pub struct DeviceContext {
    handle: DeviceHandle,
    semaphore: SemaphoreHandle,
    live: bool,
    pub(crate) requested_policy: Option<SleepPolicy>,
    pub(crate) frames_since_policy: u64,
    pub(crate) last_signal: Option<u64>,
    pub(crate) markers: MarkerTracker,
    pub(crate) out_of_band: Vec<OutOfBandQueueBinding>,
}

impl DeviceContext {
    fn new(handle: DeviceHandle, semaphore: SemaphoreHandle, max_tracked_frames: usize) -> Self {
        Self {
            handle,
            semaphore,
            live: true,
            requested_policy: None,
            frames_since_policy: 0,
            last_signal: None,
            markers: MarkerTracker::new(max_tracked_frames),
            out_of_band: Vec::new(),
        }
    }

    /// Device handle
    pub fn handle(&self) -> DeviceHandle {
        self.handle
    }

    /// Semaphore the driver signals at sleep
    pub fn semaphore(&self) -> SemaphoreHandle {
        self.semaphore
    }

    pub(crate) fn is_live(&self) -> bool {
        self.live
    }
}

/// Device registrar
#[derive(Debug, Clone)]
pub struct DeviceRegistrar {
    session: Session,
}

impl DeviceRegistrar {
    /// Create a registrar for a session
    pub fn new(session: &Session) -> Self {
        Self {
            session: session.clone(),
        }
    }

    /// Register a device for low-latency tracking
    ///
    /// Returns the semaphore the driver will signal after each
    /// [`FramePacer::sleep`](crate::FramePacer::sleep). Registering a handle that
    /// is already live fails with `InvalidArgument`.
    pub fn register_device(&self, device: DeviceHandle) -> Result<SemaphoreHandle> {
        let mut state = self.session.lock_state();
        state.ensure_initialized("register_device")?;

        if device.is_null() {
            return Err(LatencyError::Driver(Status::InvalidHandle));
        }
        if state.devices.contains_key(&device) {
            log::warn!("Device {} is already registered for low latency", device);
            return Err(LatencyError::Driver(Status::InvalidArgument));
        }

        let mut semaphore = SemaphoreHandle::NULL;
        LatencyError::check(
            self.session
                .transport()
                .init_low_latency_device(device, &mut semaphore),
        )?;

        let max_tracked_frames = self.session.config().max_tracked_frames;
        let context = DeviceContext::new(device, semaphore, max_tracked_frames);
        state.devices.insert(device, Arc::new(Mutex::new(context)));

        log::info!("Registered low latency device {} (semaphore {})", device, semaphore);
        Ok(semaphore)
    }

    /// Release the low-latency tracking of a device
    pub fn unregister_device(&self, device: DeviceHandle) -> Result<()> {
        let mut state = self.session.lock_state();
        state.ensure_initialized("unregister_device")?;

        let shared = state
            .devices
            .get(&device)
            .cloned()
            .ok_or(LatencyError::Driver(Status::InvalidHandle))?;

        let mut context = shared.lock();
        LatencyError::check(self.session.transport().destroy_low_latency_device(device))?;
        context.live = false;
        drop(context);

        state.devices.remove(&device);
        log::info!("Unregistered low latency device {}", device);
        Ok(())
    }

    /// Check if a device is registered
    pub fn is_registered(&self, device: DeviceHandle) -> bool {
        self.session.lock_state().devices.contains_key(&device)
    }

    /// Semaphore of a registered device
    pub fn semaphore(&self, device: DeviceHandle) -> Option<SemaphoreHandle> {
        let shared = self.session.lock_state().devices.get(&device).cloned()?;
        let semaphore = shared.lock().semaphore();
        Some(semaphore)
    }
}
