//! Latency markers
//!
//! Markers stamp pipeline stage boundaries of a frame. The driver accepts
//! them in any order, but the latency report is only meaningful when every
//! frame follows this sequence:
//!
//! 1. `SimulationStart` opens the frame, after that frame's sleep call. Once a
//!    device uses sleep at all, every frame gets exactly one.
//! 2. `InputSample` falls between `SimulationStart` and `SimulationEnd`.
//! 3. `RenderSubmitStart`/`RenderSubmitEnd` wrap all render submissions.
//! 4. `PresentStart`/`PresentEnd` wrap the present call, before or after
//!    `RenderSubmitEnd`.
//! 5. `TriggerFlash` and `PcLatencyPing` may come at any time.
//! 6. Frame IDs strictly increase from frame to frame.
//!
//! Out-of-band markers wrap work on queues flagged with
//! [`OutOfBandQueues`](crate::OutOfBandQueues) and are tracked apart from the
//! main frame sequence.
//!
//! With [`MarkerValidation::Off`] markers are forwarded untouched. `Warn` and
//! `Strict` run every marker through a [`MarkerTracker`] first.

use std::collections::BTreeMap;
use std::fmt;

use crate::abi::LatencyMarkerParams;
use crate::common::{
    DeviceHandle, LatencyError, MarkerType, OutOfBandQueueType, Result, Status,
};
use crate::config::MarkerValidation;
use crate::session::Session;

/// A broken ordering rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerViolation {
    /// A frame stage marker arrived before the frame's `SimulationStart`
    MissingSimulationStart { frame_id: u64, marker: MarkerType },
    /// A marker arrived for a frame that already completed or was evicted
    StaleFrame { frame_id: u64, marker: MarkerType },
    /// `SimulationStart` with a frame ID not above the previous frame's
    NonIncreasingFrameId { frame_id: u64, previous: u64 },
    /// The same stage marker was sent twice for a frame
    DuplicateMarker { frame_id: u64, marker: MarkerType },
    /// `InputSample` after the frame's `SimulationEnd`
    InputOutsideSimulation { frame_id: u64 },
    /// An end marker without its start marker
    EndWithoutStart { frame_id: u64, marker: MarkerType },
    /// An out-of-band marker with no queue of that type registered
    NoOutOfBandQueue {
        frame_id: u64,
        marker: MarkerType,
        queue_type: OutOfBandQueueType,
    },
    /// A second sleep before the armed frame's `SimulationStart`
    RepeatedSleep { signal_value: u64 },
    /// `SimulationStart` without a sleep since the previous frame on a device
    /// that uses sleep
    SimulationStartWithoutSleep { frame_id: u64 },
}

impl fmt::Display for MarkerViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerViolation::MissingSimulationStart { frame_id, marker } => {
                write!(f, "{:?} for frame {} before SimulationStart", marker, frame_id)
            }
            MarkerViolation::StaleFrame { frame_id, marker } => {
                write!(f, "{:?} for frame {} which is no longer in flight", marker, frame_id)
            }
            MarkerViolation::NonIncreasingFrameId { frame_id, previous } => {
                write!(f, "frame ID {} does not increase past {}", frame_id, previous)
            }
            MarkerViolation::DuplicateMarker { frame_id, marker } => {
                write!(f, "duplicate {:?} for frame {}", marker, frame_id)
            }
            MarkerViolation::InputOutsideSimulation { frame_id } => {
                write!(f, "InputSample for frame {} after SimulationEnd", frame_id)
            }
            MarkerViolation::EndWithoutStart { frame_id, marker } => {
                write!(f, "{:?} for frame {} without matching start", marker, frame_id)
            }
            MarkerViolation::NoOutOfBandQueue { frame_id, marker, queue_type } => write!(
                f,
                "{:?} for frame {} but no {:?} out-of-band queue is registered",
                marker, frame_id, queue_type
            ),
            MarkerViolation::RepeatedSleep { signal_value } => write!(
                f,
                "sleep with signal value {} before the previous sleep's SimulationStart",
                signal_value
            ),
            MarkerViolation::SimulationStartWithoutSleep { frame_id } => {
                write!(f, "SimulationStart for frame {} without a preceding sleep", frame_id)
            }
        }
    }
}

/// Progress of a start/end marker pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Bracket {
    #[default]
    Pending,
    Open,
    Closed,
}

impl Bracket {
    fn check_start(
        self,
        frame_id: u64,
        marker: MarkerType,
    ) -> core::result::Result<(), MarkerViolation> {
        match self {
            Bracket::Pending => Ok(()),
            Bracket::Open | Bracket::Closed => {
                Err(MarkerViolation::DuplicateMarker { frame_id, marker })
            }
        }
    }

    fn check_end(
        self,
        frame_id: u64,
        marker: MarkerType,
    ) -> core::result::Result<(), MarkerViolation> {
        match self {
            Bracket::Open => Ok(()),
            Bracket::Pending => Err(MarkerViolation::EndWithoutStart { frame_id, marker }),
            Bracket::Closed => Err(MarkerViolation::DuplicateMarker { frame_id, marker }),
        }
    }

    fn is_open(self) -> bool {
        self == Bracket::Open
    }
}

/// Stage progress of one in-flight frame
#[derive(Debug, Clone, Copy, Default)]
struct FrameProgress {
    simulation: Bracket,
    render_submit: Bracket,
    present: Bracket,
    input_sampled: bool,
}

impl FrameProgress {
    fn is_complete(&self) -> bool {
        self.render_submit == Bracket::Closed && self.present == Bracket::Closed
    }
}

/// Progress of out-of-band work tagged with one frame ID
#[derive(Debug, Clone, Copy, Default)]
struct OutOfBandProgress {
    render_submit: Bracket,
    present: Bracket,
}

impl OutOfBandProgress {
    fn is_settled(&self) -> bool {
        !self.render_submit.is_open() && !self.present.is_open()
    }
}

/// Per-device marker ordering state machine
#[derive(Debug)]
pub struct MarkerTracker {
    frames: BTreeMap<u64, FrameProgress>,
    out_of_band: BTreeMap<u64, OutOfBandProgress>,
    last_started: Option<u64>,
    max_tracked_frames: usize,
    /// Sleep has been called at least once on the device
    sleep_in_use: bool,
    /// A sleep is waiting for its frame's `SimulationStart`
    sleep_armed: bool,
}

impl MarkerTracker {
    /// Create a tracker keeping at most `max_tracked_frames` frames in flight
    pub fn new(max_tracked_frames: usize) -> Self {
        Self {
            frames: BTreeMap::new(),
            out_of_band: BTreeMap::new(),
            last_started: None,
            max_tracked_frames: max_tracked_frames.max(1),
            sleep_in_use: false,
            sleep_armed: false,
        }
    }

    /// Frame IDs opened by `SimulationStart` and not yet completed
    pub fn in_flight(&self) -> Vec<u64> {
        self.frames.keys().copied().collect()
    }

    /// Frame ID of the most recent `SimulationStart`
    pub fn last_started(&self) -> Option<u64> {
        self.last_started
    }

    /// Check a sleep call without recording it
    pub fn check_sleep(&self, signal_value: u64) -> core::result::Result<(), MarkerViolation> {
        if self.sleep_armed {
            return Err(MarkerViolation::RepeatedSleep { signal_value });
        }
        Ok(())
    }

    /// Record a sleep call forwarded to the driver
    pub fn record_sleep(&mut self) {
        self.sleep_in_use = true;
        self.sleep_armed = true;
    }

    /// Check a marker against the ordering rules without recording it
    ///
    /// `bound_queues` lists the out-of-band queue types registered for the device.
    pub fn check(
        &self,
        frame_id: u64,
        marker: MarkerType,
        bound_queues: &[OutOfBandQueueType],
    ) -> core::result::Result<(), MarkerViolation> {
        if let Some(queue_type) = marker.out_of_band_queue_type() {
            if !bound_queues.contains(&queue_type) {
                return Err(MarkerViolation::NoOutOfBandQueue {
                    frame_id,
                    marker,
                    queue_type,
                });
            }
            let progress = self
                .out_of_band
                .get(&frame_id)
                .copied()
                .unwrap_or_default();
            return match marker {
                MarkerType::OutOfBandRenderSubmitStart => {
                    progress.render_submit.check_start(frame_id, marker)
                }
                MarkerType::OutOfBandRenderSubmitEnd => {
                    progress.render_submit.check_end(frame_id, marker)
                }
                MarkerType::OutOfBandPresentStart => {
                    progress.present.check_start(frame_id, marker)
                }
                _ => progress.present.check_end(frame_id, marker),
            };
        }

        match marker {
            MarkerType::TriggerFlash | MarkerType::PcLatencyPing => return Ok(()),
            MarkerType::SimulationStart => {
                if self.frames.contains_key(&frame_id) {
                    return Err(MarkerViolation::DuplicateMarker { frame_id, marker });
                }
                if let Some(previous) = self.last_started {
                    if frame_id <= previous {
                        return Err(MarkerViolation::NonIncreasingFrameId { frame_id, previous });
                    }
                }
                if self.sleep_in_use && !self.sleep_armed {
                    return Err(MarkerViolation::SimulationStartWithoutSleep { frame_id });
                }
                return Ok(());
            }
            _ => {}
        }

        let Some(progress) = self.frames.get(&frame_id) else {
            return match self.last_started {
                Some(previous) if frame_id <= previous => {
                    Err(MarkerViolation::StaleFrame { frame_id, marker })
                }
                _ => Err(MarkerViolation::MissingSimulationStart { frame_id, marker }),
            };
        };

        match marker {
            MarkerType::SimulationEnd => progress.simulation.check_end(frame_id, marker),
            MarkerType::InputSample => {
                if progress.simulation.is_open() {
                    Ok(())
                } else {
                    Err(MarkerViolation::InputOutsideSimulation { frame_id })
                }
            }
            MarkerType::RenderSubmitStart => progress.render_submit.check_start(frame_id, marker),
            MarkerType::RenderSubmitEnd => progress.render_submit.check_end(frame_id, marker),
            MarkerType::PresentStart => progress.present.check_start(frame_id, marker),
            MarkerType::PresentEnd => progress.present.check_end(frame_id, marker),
            _ => Ok(()),
        }
    }

    /// Record a marker that passed [`check`](Self::check)
    pub fn record(&mut self, frame_id: u64, marker: MarkerType) {
        if marker.is_out_of_band() {
            self.record_out_of_band(frame_id, marker);
            return;
        }

        if marker == MarkerType::SimulationStart {
            self.frames.insert(
                frame_id,
                FrameProgress {
                    simulation: Bracket::Open,
                    ..FrameProgress::default()
                },
            );
            self.last_started = Some(frame_id);
            self.sleep_armed = false;

            while self.frames.len() > self.max_tracked_frames {
                if let Some((abandoned, _)) = self.frames.pop_first() {
                    log::warn!("Frame {} abandoned before RenderSubmitEnd/PresentEnd", abandoned);
                }
            }
            return;
        }

        let Some(progress) = self.frames.get_mut(&frame_id) else {
            return;
        };

        match marker {
            MarkerType::SimulationEnd => progress.simulation = Bracket::Closed,
            MarkerType::InputSample => progress.input_sampled = true,
            MarkerType::RenderSubmitStart => progress.render_submit = Bracket::Open,
            MarkerType::RenderSubmitEnd => progress.render_submit = Bracket::Closed,
            MarkerType::PresentStart => progress.present = Bracket::Open,
            MarkerType::PresentEnd => progress.present = Bracket::Closed,
            _ => {}
        }

        if progress.is_complete() {
            log::trace!(
                "Frame {} complete (input sampled: {})",
                frame_id,
                progress.input_sampled
            );
            self.frames.remove(&frame_id);
        }
    }

    fn record_out_of_band(&mut self, frame_id: u64, marker: MarkerType) {
        let progress = self.out_of_band.entry(frame_id).or_default();
        match marker {
            MarkerType::OutOfBandRenderSubmitStart => progress.render_submit = Bracket::Open,
            MarkerType::OutOfBandRenderSubmitEnd => progress.render_submit = Bracket::Closed,
            MarkerType::OutOfBandPresentStart => progress.present = Bracket::Open,
            MarkerType::OutOfBandPresentEnd => progress.present = Bracket::Closed,
            _ => {}
        }

        if progress.is_settled() {
            self.out_of_band.remove(&frame_id);
        }

        while self.out_of_band.len() > self.max_tracked_frames {
            self.out_of_band.pop_first();
        }
    }
}

/// Marker sequencer
#[derive(Debug, Clone)]
pub struct MarkerSequencer {
    session: Session,
    validation: MarkerValidation,
}

impl MarkerSequencer {
    /// Create a sequencer using the session's validation mode
    pub fn new(session: &Session) -> Self {
        Self::with_validation(session, session.config().marker_validation)
    }

    /// Create a sequencer with an explicit validation mode
    ///
    /// [`FramePacer`](crate::FramePacer) checks sleeps against the session's
    /// mode, so an `Off` override under a validating session reports every
    /// second sleep as repeated.
    pub fn with_validation(session: &Session, validation: MarkerValidation) -> Self {
        Self {
            session: session.clone(),
            validation,
        }
    }

    /// Validation mode of this sequencer
    pub fn validation(&self) -> MarkerValidation {
        self.validation
    }

    /// Send a latency marker for a frame
    ///
    /// In strict mode a marker breaking the ordering rules is rejected with
    /// [`LatencyError::MarkerOrder`] and never reaches the driver.
    pub fn set_marker(
        &self,
        device: DeviceHandle,
        frame_id: u64,
        marker: MarkerType,
    ) -> Result<()> {
        let params = LatencyMarkerParams::new(frame_id, marker);

        self.session
            .with_device(device, "set_marker", Status::InvalidHandle, |ctx| {
                log::trace!("Marker {:?} frame {} on device {}", marker, frame_id, device);

                if self.validation == MarkerValidation::Off {
                    return LatencyError::check(
                        self.session.transport().set_latency_marker(device, &params),
                    );
                }

                let bound: Vec<OutOfBandQueueType> = ctx
                    .out_of_band
                    .iter()
                    .map(|binding| binding.queue_type)
                    .collect();
                let verdict = ctx.markers.check(frame_id, marker, &bound);

                if let Err(violation) = verdict {
                    log::warn!("Device {}: {}", device, violation);
                    if self.validation == MarkerValidation::Strict {
                        return Err(violation.into());
                    }
                }

                LatencyError::check(
                    self.session.transport().set_latency_marker(device, &params),
                )?;

                if verdict.is_ok() {
                    ctx.markers.record(frame_id, marker);
                }
                Ok(())
            })
    }

    /// Frames of a device opened but not yet completed
    ///
    /// Always empty when validation is off.
    pub fn in_flight(&self, device: DeviceHandle) -> Vec<u64> {
        self.session
            .with_device(device, "in_flight", Status::InvalidHandle, |ctx| {
                Ok(ctx.markers.in_flight())
            })
            .unwrap_or_default()
    }
}
