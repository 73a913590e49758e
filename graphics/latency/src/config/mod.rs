//! Coordination layer configuration

/// How the marker sequencer treats the per-frame ordering contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerValidation {
    /// Forward markers untouched (no tracking)
    Off,
    /// Track ordering and log violations, but forward anyway
    Warn,
    /// Track ordering and reject violating markers without forwarding them
    Strict,
}

impl Default for MarkerValidation {
    fn default() -> Self {
        if cfg!(feature = "strict-markers") {
            MarkerValidation::Strict
        } else {
            MarkerValidation::Off
        }
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyConfig {
    /// Marker ordering validation mode
    pub marker_validation: MarkerValidation,
    /// Warn when the sleep policy changes again within this many frames (0 = never)
    pub policy_churn_frames: u64,
    /// Maximum in-flight frames tracked per device by the marker validator
    pub max_tracked_frames: usize,
}

impl LatencyConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self {
            marker_validation: MarkerValidation::default(),
            policy_churn_frames: 60,
            max_tracked_frames: 16,
        }
    }

    /// Set the marker validation mode
    pub fn with_marker_validation(mut self, mode: MarkerValidation) -> Self {
        self.marker_validation = mode;
        self
    }

    /// Set the policy churn warning threshold
    pub fn with_policy_churn_frames(mut self, frames: u64) -> Self {
        self.policy_churn_frames = frames;
        self
    }

    /// Set the in-flight frame tracking bound (at least 1)
    pub fn with_max_tracked_frames(mut self, frames: usize) -> Self {
        self.max_tracked_frames = frames.max(1);
        self
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let config = LatencyConfig::new()
            .with_marker_validation(MarkerValidation::Warn)
            .with_policy_churn_frames(0)
            .with_max_tracked_frames(0);

        assert_eq!(config.marker_validation, MarkerValidation::Warn);
        assert_eq!(config.policy_churn_frames, 0);
        assert_eq!(config.max_tracked_frames, 1);
    }

    #[cfg(not(feature = "strict-markers"))]
    #[test]
    fn test_default_is_passthrough() {
        assert_eq!(LatencyConfig::default().marker_validation, MarkerValidation::Off);
    }
}
