//! Common low-latency types: status codes, errors, handles and markers

use core::fmt;

use crate::markers::MarkerViolation;

/// Number of frame slots in a latency report
pub const FRAME_REPORT_COUNT: usize = 64;

/// Frames of continuous marker use before a latency report is fully populated
pub const RECOMMENDED_WARMUP_FRAMES: u64 = 90;

/// Driver status codes
///
/// Every driver entry point returns one of these values. The numeric values
/// are part of the driver ABI and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Status {
    /// Success. Request is completed.
    Ok = 0,
    /// Generic error
    GenericError = -1,
    /// Driver support library cannot be loaded
    LibraryNotFound = -2,
    /// Not implemented in current driver installation
    NotImplemented = -3,
    /// Support library has not been initialized
    ApiNotInitialized = -4,
    /// The argument/parameter value is not valid or NULL
    InvalidArgument = -5,
    /// Invalid handle
    InvalidHandle = -8,
    /// An argument's structure version is not supported
    IncompatibleStructVersion = -9,
    /// An invalid pointer, usually NULL, was passed as a parameter
    InvalidPointer = -14,
    /// Could not allocate sufficient memory to complete the call
    OutOfMemory = -130,
    /// An API is still being called
    ApiInUse = -209,
    /// No Vulkan support
    NoVulkanSupport = -229,
}

impl Status {
    /// Map a raw driver code onto the taxonomy
    pub fn from_raw(code: i32) -> Option<Self> {
        let status = match code {
            0 => Status::Ok,
            -1 => Status::GenericError,
            -2 => Status::LibraryNotFound,
            -3 => Status::NotImplemented,
            -4 => Status::ApiNotInitialized,
            -5 => Status::InvalidArgument,
            -8 => Status::InvalidHandle,
            -9 => Status::IncompatibleStructVersion,
            -14 => Status::InvalidPointer,
            -130 => Status::OutOfMemory,
            -209 => Status::ApiInUse,
            -229 => Status::NoVulkanSupport,
            _ => return None,
        };
        Some(status)
    }

    /// Raw driver code
    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "Ok"),
            Status::GenericError => write!(f, "Generic driver error"),
            Status::LibraryNotFound => write!(f, "Low latency support library not found"),
            Status::NotImplemented => write!(f, "Not implemented in current driver"),
            Status::ApiNotInitialized => write!(f, "Low latency API not initialized"),
            Status::InvalidArgument => write!(f, "Invalid argument"),
            Status::InvalidHandle => write!(f, "Invalid handle"),
            Status::IncompatibleStructVersion => write!(f, "Incompatible structure version"),
            Status::InvalidPointer => write!(f, "Invalid pointer"),
            Status::OutOfMemory => write!(f, "Out of memory"),
            Status::ApiInUse => write!(f, "API still in use"),
            Status::NoVulkanSupport => write!(f, "No Vulkan support"),
        }
    }
}

/// Result type for low-latency operations
pub type Result<T> = core::result::Result<T, LatencyError>;

/// Latency error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatencyError {
    /// The driver (or the local protocol checks) returned a failure status
    Driver(Status),
    /// The driver returned a code outside the known taxonomy
    UnknownStatus(i32),
    /// A marker was rejected by strict ordering validation
    MarkerOrder(MarkerViolation),
}

impl LatencyError {
    /// Convert a raw transport status into a result
    pub fn check(code: i32) -> Result<()> {
        match Status::from_raw(code) {
            Some(Status::Ok) => Ok(()),
            Some(status) => Err(LatencyError::Driver(status)),
            None => Err(LatencyError::UnknownStatus(code)),
        }
    }

    /// Status carried by this error, if it came from the taxonomy
    pub fn status(&self) -> Option<Status> {
        match self {
            LatencyError::Driver(status) => Some(*status),
            LatencyError::UnknownStatus(_) | LatencyError::MarkerOrder(_) => None,
        }
    }

    /// Whether the operation may succeed if retried later
    pub fn is_retryable(&self) -> bool {
        self.status() == Some(Status::ApiInUse)
    }

    /// Whether the error means the feature is simply absent on this platform
    pub fn is_feature_absent(&self) -> bool {
        matches!(
            self.status(),
            Some(Status::NoVulkanSupport | Status::NotImplemented)
        )
    }

    /// Whether the error should be treated as fatal for the low-latency path
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.status(),
            Some(Status::LibraryNotFound | Status::OutOfMemory)
        )
    }
}

impl From<Status> for LatencyError {
    fn from(status: Status) -> Self {
        LatencyError::Driver(status)
    }
}

impl From<MarkerViolation> for LatencyError {
    fn from(violation: MarkerViolation) -> Self {
        LatencyError::MarkerOrder(violation)
    }
}

impl fmt::Display for LatencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatencyError::Driver(status) => write!(f, "{} ({})", status, status.as_raw()),
            LatencyError::UnknownStatus(code) => write!(f, "Unknown driver status {}", code),
            LatencyError::MarkerOrder(violation) => {
                write!(f, "Marker order violation: {}", violation)
            }
        }
    }
}

impl std::error::Error for LatencyError {}

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Null handle
            pub const NULL: Self = Self(0);

            /// Wrap a raw handle value
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw handle value
            pub const fn as_raw(self) -> u64 {
                self.0
            }

            /// Check for the null handle
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

opaque_handle!(
    /// Rendering device handle (a `VkDevice`), never dereferenced
    DeviceHandle
);

opaque_handle!(
    /// Wait primitive (a timeline `VkSemaphore`) signaled by the driver at sleep
    SemaphoreHandle
);

opaque_handle!(
    /// Command queue handle (a `VkQueue`), never dereferenced
    QueueHandle
);

/// Latency marker type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MarkerType {
    /// Simulation start
    SimulationStart = 0,
    /// Simulation end
    SimulationEnd = 1,
    /// Render submit start
    RenderSubmitStart = 2,
    /// Render submit end
    RenderSubmitEnd = 3,
    /// Present start
    PresentStart = 4,
    /// Present end
    PresentEnd = 5,
    /// Input sample
    InputSample = 6,
    /// Render the latency flash indicator on this frame
    TriggerFlash = 7,
    /// PC latency ping
    PcLatencyPing = 8,
    /// Out-of-band render submit start
    OutOfBandRenderSubmitStart = 9,
    /// Out-of-band render submit end
    OutOfBandRenderSubmitEnd = 10,
    /// Out-of-band present start
    OutOfBandPresentStart = 11,
    /// Out-of-band present end
    OutOfBandPresentEnd = 12,
}

impl MarkerType {
    /// All marker types in wire order
    pub const ALL: [MarkerType; 13] = [
        MarkerType::SimulationStart,
        MarkerType::SimulationEnd,
        MarkerType::RenderSubmitStart,
        MarkerType::RenderSubmitEnd,
        MarkerType::PresentStart,
        MarkerType::PresentEnd,
        MarkerType::InputSample,
        MarkerType::TriggerFlash,
        MarkerType::PcLatencyPing,
        MarkerType::OutOfBandRenderSubmitStart,
        MarkerType::OutOfBandRenderSubmitEnd,
        MarkerType::OutOfBandPresentStart,
        MarkerType::OutOfBandPresentEnd,
    ];

    /// Decode a raw wire value
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    /// Raw wire value
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Check if this marker belongs to an out-of-band queue
    pub fn is_out_of_band(self) -> bool {
        self.out_of_band_queue_type().is_some()
    }

    /// Queue type an out-of-band marker must be matched with
    pub fn out_of_band_queue_type(self) -> Option<OutOfBandQueueType> {
        match self {
            MarkerType::OutOfBandRenderSubmitStart | MarkerType::OutOfBandRenderSubmitEnd => {
                Some(OutOfBandQueueType::Render)
            }
            MarkerType::OutOfBandPresentStart | MarkerType::OutOfBandPresentEnd => {
                Some(OutOfBandQueueType::Present)
            }
            _ => None,
        }
    }
}

/// Out-of-band queue type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum OutOfBandQueueType {
    /// Render submissions run outside the frame cadence
    Render = 0,
    /// Presents run outside the frame cadence
    Present = 1,
}

impl OutOfBandQueueType {
    /// Decode a raw wire value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(OutOfBandQueueType::Render),
            1 => Some(OutOfBandQueueType::Present),
            _ => None,
        }
    }

    /// Raw wire value
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Latency statistics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Input-to-GPU-completion latency (milliseconds)
    pub input_latency_ms: f32,
    /// Simulation time (milliseconds)
    pub simulation_ms: f32,
    /// Render submit latency (milliseconds)
    pub render_latency_ms: f32,
    /// Present latency (milliseconds)
    pub present_latency_ms: f32,
    /// Driver latency (milliseconds)
    pub driver_latency_ms: f32,
    /// OS queue latency (milliseconds)
    pub os_queue_latency_ms: f32,
    /// GPU render time (milliseconds)
    pub gpu_render_ms: f32,
    /// Number of frames the averages were taken over
    pub frames: usize,
}

impl LatencyStats {
    /// Create new latency stats
    pub fn new() -> Self {
        Self {
            input_latency_ms: 0.0,
            simulation_ms: 0.0,
            render_latency_ms: 0.0,
            present_latency_ms: 0.0,
            driver_latency_ms: 0.0,
            os_queue_latency_ms: 0.0,
            gpu_render_ms: 0.0,
            frames: 0,
        }
    }

    /// Get PC latency (render + present + driver + OS)
    pub fn pc_latency_ms(&self) -> f32 {
        self.render_latency_ms
            + self.present_latency_ms
            + self.driver_latency_ms
            + self.os_queue_latency_ms
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_driver() {
        let expected = [
            (Status::Ok, 0),
            (Status::GenericError, -1),
            (Status::LibraryNotFound, -2),
            (Status::NotImplemented, -3),
            (Status::ApiNotInitialized, -4),
            (Status::InvalidArgument, -5),
            (Status::InvalidHandle, -8),
            (Status::IncompatibleStructVersion, -9),
            (Status::InvalidPointer, -14),
            (Status::OutOfMemory, -130),
            (Status::ApiInUse, -209),
            (Status::NoVulkanSupport, -229),
        ];

        for (status, code) in expected {
            assert_eq!(status.as_raw(), code);
            assert_eq!(Status::from_raw(code), Some(status));
        }
        assert_eq!(Status::from_raw(-6), None);
    }

    #[test]
    fn test_check_classifies_codes() {
        assert_eq!(LatencyError::check(0), Ok(()));
        assert_eq!(
            LatencyError::check(-8),
            Err(LatencyError::Driver(Status::InvalidHandle))
        );
        assert_eq!(LatencyError::check(-77), Err(LatencyError::UnknownStatus(-77)));

        assert!(LatencyError::Driver(Status::ApiInUse).is_retryable());
        assert!(LatencyError::Driver(Status::NoVulkanSupport).is_feature_absent());
        assert!(LatencyError::Driver(Status::NotImplemented).is_feature_absent());
        assert!(LatencyError::Driver(Status::LibraryNotFound).is_fatal());
        assert!(!LatencyError::Driver(Status::InvalidHandle).is_fatal());
        assert!(!LatencyError::UnknownStatus(-77).is_retryable());
    }

    #[test]
    fn test_marker_type_wire_order() {
        for (index, marker) in MarkerType::ALL.iter().enumerate() {
            assert_eq!(marker.as_raw(), index as u32);
            assert_eq!(MarkerType::from_raw(index as u32), Some(*marker));
        }
        assert_eq!(MarkerType::from_raw(13), None);

        assert!(!MarkerType::PresentEnd.is_out_of_band());
        assert_eq!(
            MarkerType::OutOfBandPresentStart.out_of_band_queue_type(),
            Some(OutOfBandQueueType::Present)
        );
        assert_eq!(
            MarkerType::OutOfBandRenderSubmitEnd.out_of_band_queue_type(),
            Some(OutOfBandQueueType::Render)
        );
    }

    #[test]
    fn test_pc_latency_sum() {
        let stats = LatencyStats {
            render_latency_ms: 1.0,
            present_latency_ms: 0.5,
            driver_latency_ms: 0.25,
            os_queue_latency_ms: 0.25,
            ..LatencyStats::new()
        };
        assert_eq!(stats.pc_latency_ms(), 2.0);
    }
}
