//! Session management
//!
//! A [`Session`] is the reference-counted initialization state of the
//! low-latency library. It is an explicit object rather than a process-wide
//! singleton: every component is built from a `Session` and clones of it share
//! the same count, transport and device registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::common::{DeviceHandle, LatencyError, Result, Status};
use crate::config::LatencyConfig;
use crate::device::{DeviceContext, SharedDevice};
use crate::transport::Transport;

/// Mutable session state
pub(crate) struct SessionState {
    pub(crate) ref_count: u32,
    pub(crate) devices: HashMap<DeviceHandle, SharedDevice>,
}

impl SessionState {
    /// Fail with `ApiNotInitialized` when the session has not been acquired
    pub(crate) fn ensure_initialized(&self, operation: &str) -> Result<()> {
        if self.ref_count == 0 {
            log::error!(
                "{} called before the low latency session was acquired",
                operation
            );
            return Err(LatencyError::Driver(Status::ApiNotInitialized));
        }
        Ok(())
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    config: LatencyConfig,
    state: Mutex<SessionState>,
}

/// Low-latency library session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session over a transport with the default configuration
    pub fn new<T: Transport + 'static>(transport: Arc<T>) -> Self {
        Self::with_config(transport, LatencyConfig::default())
    }

    /// Create a session over a transport
    pub fn with_config<T: Transport + 'static>(
        transport: Arc<T>,
        config: LatencyConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                transport,
                config,
                state: Mutex::new(SessionState {
                    ref_count: 0,
                    devices: HashMap::new(),
                }),
            }),
        }
    }

    /// Increment the reference count, loading the library on the first acquire
    ///
    /// If loading fails the count stays at zero.
    pub fn acquire(&self) -> Result<()> {
        let mut state = self.inner.state.lock();

        if state.ref_count == 0 {
            log::info!("Initializing low latency library");
            LatencyError::check(self.inner.transport.initialize()).map_err(|e| {
                log::warn!("Low latency library initialization failed: {}", e);
                e
            })?;
        }

        state.ref_count += 1;
        log::trace!("Low latency session acquired (count {})", state.ref_count);
        Ok(())
    }

    /// Decrement the reference count, unloading the library on the last release
    ///
    /// Unloading is refused with `ApiInUse` while devices are still registered
    /// or the driver reports outstanding work. The count is left unchanged in
    /// that case and the release can be retried.
    pub fn release(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.ensure_initialized("release")?;

        if state.ref_count == 1 {
            if !state.devices.is_empty() {
                log::warn!(
                    "Cannot unload low latency library: {} device(s) still registered",
                    state.devices.len()
                );
                return Err(LatencyError::Driver(Status::ApiInUse));
            }

            LatencyError::check(self.inner.transport.unload()).map_err(|e| {
                log::warn!("Low latency library unload failed: {}", e);
                e
            })?;
            log::info!("Low latency library unloaded");
        }

        state.ref_count -= 1;
        log::trace!("Low latency session released (count {})", state.ref_count);
        Ok(())
    }

    /// Check if the session has been acquired more often than released
    pub fn is_initialized(&self) -> bool {
        self.inner.state.lock().ref_count > 0
    }

    /// Current reference count
    pub fn ref_count(&self) -> u32 {
        self.inner.state.lock().ref_count
    }

    /// Number of registered devices
    pub fn device_count(&self) -> usize {
        self.inner.state.lock().devices.len()
    }

    /// Session configuration
    pub fn config(&self) -> &LatencyConfig {
        &self.inner.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.inner.transport.as_ref()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock()
    }

    /// Run `f` on a registered device, failing with `missing` if it is unknown
    ///
    /// The session lock is only held for the lookup; the device lock is held
    /// for the whole of `f`, which serializes frame-cadence calls per device.
    pub(crate) fn with_device<R>(
        &self,
        handle: DeviceHandle,
        operation: &str,
        missing: Status,
        f: impl FnOnce(&mut DeviceContext) -> Result<R>,
    ) -> Result<R> {
        let shared = self.lookup_device(handle, operation, missing)?;
        Self::run_on_device(&shared, handle, operation, missing, f)
    }

    fn lookup_device(
        &self,
        handle: DeviceHandle,
        operation: &str,
        missing: Status,
    ) -> Result<SharedDevice> {
        let state = self.lock_state();
        state.ensure_initialized(operation)?;
        let shared = state.devices.get(&handle).cloned();
        shared.ok_or_else(|| {
            log::debug!("{} on unregistered device {}", operation, handle);
            LatencyError::Driver(missing)
        })
    }

    /// The device may have been torn down between lookup and locking
    fn run_on_device<R>(
        shared: &SharedDevice,
        handle: DeviceHandle,
        operation: &str,
        missing: Status,
        f: impl FnOnce(&mut DeviceContext) -> Result<R>,
    ) -> Result<R> {
        let mut device = shared.lock();
        if !device.is_live() {
            log::debug!("{} on device {} raced with its teardown", operation, handle);
            return Err(LatencyError::Driver(missing));
        }
        f(&mut *device)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("ref_count", &state.ref_count)
            .field("devices", &state.devices.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
