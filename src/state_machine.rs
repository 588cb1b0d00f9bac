//! Occlusion-aware tracking session.
//!
//! One `PhaseMachine` owns everything that lives for a session: the frame
//! source cursor, both tracker handles, the bridge feature set, the held box
//! and the session's track log. Frames are processed strictly one at a time by
//! `step`. At the two pause points `step` stops reading frames until the
//! caller supplies a box through `supply_pre_box` / `supply_post_box`.

use opencv::prelude::*;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{Result, TrackingError};
use crate::frame_source::FrameSource;
use crate::optical_flow::{BridgeEstimator, FeatureFlow, PyramidalLk};
use crate::phase::{Handler, Phase, PhaseBoundaries};
use crate::track::{BoundingBox, TrackMethod, TrackRecord};
use crate::track_log::TrackLog;
use crate::tracker::{CsrtFactory, TrackerFactory, TrackerHandle};
use crate::utils::to_gray;

/// Recoverable per-frame conditions surfaced to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    PreTrackerLost,
    PostTrackerLost,
    FeaturesExhausted,
    /// A box supplied before playback could not seed the pre-tracker.
    PreBoxRejected,
}

/// What happened on one processed frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame_index: usize,
    pub handler: Handler,
    /// Box and method to overlay, if a record was produced.
    pub record: Option<TrackRecord>,
    pub advisory: Option<Advisory>,
    /// Phase after this frame; a pause phase means input is needed now.
    pub phase: Phase,
    pub status: String,
}

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Frame(FrameReport),
    /// Waiting for a box; no frame was read.
    Paused { phase: Phase, frame_index: usize },
    Ended,
}

impl StepOutcome {
    pub fn is_ended(&self) -> bool {
        matches!(self, StepOutcome::Ended)
    }
}

pub struct PhaseMachine<S, F, P>
where
    S: FrameSource,
    F: TrackerFactory,
    P: FeatureFlow,
{
    source: S,
    factory: F,
    flow: P,
    boundaries: Option<PhaseBoundaries>,
    phase: Phase,
    pre: Option<TrackerHandle<F::Tracker>>,
    /// Set once the pre-tracker was seeded; survives its teardown.
    pre_seeded: bool,
    post: Option<TrackerHandle<F::Tracker>>,
    bridge: Option<BridgeEstimator>,
    pending_pre_box: Option<BoundingBox>,
    held_box: Option<BoundingBox>,
    current: Option<(usize, Mat)>,
    prev_gray: Option<Mat>,
    log: TrackLog,
    status: String,
}

/// CSRT before and after the occlusion, pyramidal LK during it.
pub type CsrtPhaseMachine<S> = PhaseMachine<S, CsrtFactory, PyramidalLk>;

impl<S: FrameSource> PhaseMachine<S, CsrtFactory, PyramidalLk> {
    pub fn with_opencv(source: S, bridge: BridgeConfig) -> Self {
        Self::new(source, CsrtFactory, PyramidalLk::new(bridge))
    }
}

impl<S, F, P> PhaseMachine<S, F, P>
where
    S: FrameSource,
    F: TrackerFactory,
    P: FeatureFlow,
{
    pub fn new(source: S, factory: F, flow: P) -> Self {
        Self {
            source,
            factory,
            flow,
            boundaries: None,
            phase: Phase::Idle,
            pre: None,
            pre_seeded: false,
            post: None,
            bridge: None,
            pending_pre_box: None,
            held_box: None,
            current: None,
            prev_gray: None,
            log: TrackLog::new(),
            status: "Status: Idle".to_string(),
        }
    }

    /// Validate the boundaries against the source and start playback from
    /// frame 0. A rejected configuration leaves the machine `Idle`.
    pub fn configure(&mut self, boundaries: PhaseBoundaries) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(self.invalid("configure a session"));
        }
        boundaries.validate(self.source.frame_count())?;
        self.source.rewind()?;

        self.boundaries = Some(boundaries);
        self.phase = Phase::PrePlay;
        self.status = format!(
            "Frames set: before={}, after={}. Playing...",
            boundaries.before_occlusion_stop, boundaries.after_occlusion_stop
        );
        info!(
            "Session configured: before={} after={} occluder={}..={} deadline={}",
            boundaries.before_occlusion_stop,
            boundaries.after_occlusion_stop,
            boundaries.occluder_enter,
            boundaries.occluder_settled,
            boundaries.subject_reappear_deadline
        );
        Ok(())
    }

    /// Supply the pre-occlusion box. During playback it is kept and seeded on
    /// the next frame; at the pause it seeds the pre-tracker on the paused frame.
    pub fn supply_pre_box(&mut self, bbox: BoundingBox) -> Result<()> {
        match self.phase {
            Phase::PrePlay => {
                self.pending_pre_box = Some(bbox);
                self.status = format!("Selected BEFORE bbox: {}. Seeding on next frame.", bbox);
                Ok(())
            }
            Phase::PausedForPreBox => {
                let (index, frame) = self
                    .current
                    .as_ref()
                    .ok_or_else(|| self.invalid("seed the pre-tracker without a frame"))?;
                let handle =
                    TrackerHandle::seed(&self.factory, TrackMethod::PreTrack, frame, *index, bbox)?;
                info!("Pre-tracker initialized at frame {} with {}", index, bbox);
                self.pre = Some(handle);
                self.pre_seeded = true;
                self.held_box = Some(bbox);
                self.phase = Phase::PreTracking;
                self.status = "Pre-tracker initialized. Resuming playback.".to_string();
                Ok(())
            }
            _ => Err(self.invalid("supply a pre-occlusion box")),
        }
    }

    /// Supply the post-occlusion box and seed a fresh post-tracker on the
    /// paused frame. Without a box the last held box is reused.
    pub fn supply_post_box(&mut self, bbox: Option<BoundingBox>) -> Result<()> {
        if self.phase != Phase::PausedForPostBox {
            return Err(self.invalid("supply a post-occlusion box"));
        }
        let seed = match bbox {
            Some(b) => b,
            None => {
                let fallback = self.held_box.ok_or_else(|| {
                    TrackingError::invalid_box("no post-occlusion box and no earlier box to reuse")
                })?;
                warn!("Post-occlusion box missing, reusing last known box {}", fallback);
                fallback
            }
        };
        let (index, frame) = self
            .current
            .as_ref()
            .ok_or_else(|| self.invalid("seed the post-tracker without a frame"))?;
        let handle = TrackerHandle::seed(&self.factory, TrackMethod::PostTrack, frame, *index, seed)?;
        info!("Post-tracker initialized at frame {} with {}", index, seed);

        self.post = Some(handle);
        self.held_box = Some(seed);
        self.phase = Phase::PostTracking;
        self.status = if bbox.is_some() {
            "Post-tracker initialized. Resuming playback.".to_string()
        } else {
            format!("Post box missing, reused {}. Resuming playback.", seed)
        };
        Ok(())
    }

    /// Process the next frame, or report why no frame was read.
    pub fn step(&mut self) -> Result<StepOutcome> {
        match self.phase {
            Phase::Idle => return Err(self.invalid("advance")),
            Phase::Ended => return Ok(StepOutcome::Ended),
            phase if phase.is_paused() => {
                return Ok(StepOutcome::Paused {
                    phase,
                    frame_index: self.current_index().unwrap_or(0),
                })
            }
            _ => {}
        }
        let Some(boundaries) = self.boundaries else {
            return Err(self.invalid("advance without boundaries"));
        };

        let Some((index, frame)) = self.source.next_frame()? else {
            self.finish();
            return Ok(StepOutcome::Ended);
        };
        let gray = to_gray(&frame)?;

        let mut advisory = None;
        if let Some(bbox) = self.pending_pre_box.take() {
            if !self.seed_pending_pre(&frame, index, bbox) {
                advisory = Some(Advisory::PreBoxRejected);
            }
        }

        let pre_tracking = self.phase == Phase::PreTracking && self.pre.is_some();
        let handler =
            boundaries.handler_for(index, pre_tracking, self.pre_seeded, self.post.is_some());
        if handler != Handler::Bridge && self.bridge.take().is_some() {
            debug!("Bridge exited at frame {}", index);
        }

        let mut record = None;
        match handler {
            Handler::PreTracker => {
                if let Some(pre) = self.pre.as_mut() {
                    match pre.update(&frame, index) {
                        Some(bbox) => record = Some(TrackRecord::new(index, bbox, TrackMethod::PreTrack)),
                        None => advisory = Some(Advisory::PreTrackerLost),
                    }
                }
            }
            Handler::Bridge => {
                if let Some(held) = self.held_box {
                    let prev = self.prev_gray.as_ref().unwrap_or(&gray);
                    let bridge = self.bridge.get_or_insert_with(|| {
                        info!("Occlusion bridge entered at frame {}", index);
                        BridgeEstimator::enter(&mut self.flow, prev, held)
                    });
                    let bridged = bridge.advance(&mut self.flow, prev, &gray);
                    if bridged.starved() {
                        advisory = Some(Advisory::FeaturesExhausted);
                    }
                    record = Some(TrackRecord::new(index, bridged.bbox, TrackMethod::OcclusionBridge));
                }
            }
            Handler::PostTracker => {
                if let Some(post) = self.post.as_mut() {
                    match post.update(&frame, index) {
                        Some(bbox) => record = Some(TrackRecord::new(index, bbox, TrackMethod::PostTrack)),
                        None => advisory = Some(Advisory::PostTrackerLost),
                    }
                }
            }
            Handler::None => {}
        }

        if let Some(r) = record {
            self.held_box = Some(r.bbox);
            self.log.append(r);
        }
        self.prev_gray = Some(gray);
        self.current = Some((index, frame));

        self.status = self.frame_status(handler, advisory);
        self.apply_pause_rules(&boundaries, index);

        Ok(StepOutcome::Frame(FrameReport {
            frame_index: index,
            handler,
            record,
            advisory,
            phase: self.phase,
            status: self.status.clone(),
        }))
    }

    /// Step until a pause point or the end of the source, handing every
    /// processed frame to `on_frame`.
    pub fn run_until_pause<C>(&mut self, mut on_frame: C) -> Result<StepOutcome>
    where
        C: FnMut(&FrameReport, &Mat) -> Result<()>,
    {
        loop {
            match self.step()? {
                StepOutcome::Frame(report) => {
                    if let Some((_, frame)) = &self.current {
                        on_frame(&report, frame)?;
                    }
                }
                other => return Ok(other),
            }
        }
    }

    /// Tear down the session and return to `Idle`. The session's log is handed
    /// back untouched; the next `configure` rewinds the source.
    pub fn reset(&mut self) -> TrackLog {
        self.pre = None;
        self.pre_seeded = false;
        self.post = None;
        self.bridge = None;
        self.pending_pre_box = None;
        self.held_box = None;
        self.current = None;
        self.prev_gray = None;
        self.boundaries = None;
        self.phase = Phase::Idle;
        self.status = "Reset. Set frames to replay.".to_string();
        info!("Session reset");
        std::mem::take(&mut self.log)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_bridging(&self) -> bool {
        self.bridge.is_some()
    }

    pub fn held_box(&self) -> Option<BoundingBox> {
        self.held_box
    }

    pub fn boundaries(&self) -> Option<&PhaseBoundaries> {
        self.boundaries.as_ref()
    }

    pub fn current_frame(&self) -> Option<&Mat> {
        self.current.as_ref().map(|(_, f)| f)
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current.as_ref().map(|(i, _)| *i)
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn has_pre_tracker(&self) -> bool {
        self.pre.is_some()
    }

    pub fn has_post_tracker(&self) -> bool {
        self.post.is_some()
    }

    pub fn log(&self) -> &TrackLog {
        &self.log
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Give the source back, e.g. to replay over it.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Seed the pre-tracker from a box supplied during playback. Returns
    /// false when the tracker refused the box.
    fn seed_pending_pre(&mut self, frame: &Mat, index: usize, bbox: BoundingBox) -> bool {
        if self.pre_seeded {
            return true;
        }
        match TrackerHandle::seed(&self.factory, TrackMethod::PreTrack, frame, index, bbox) {
            Ok(handle) => {
                info!("Pre-tracker initialized at frame {} with {}", index, bbox);
                self.pre = Some(handle);
                self.pre_seeded = true;
                self.held_box = Some(bbox);
                self.phase = Phase::PreTracking;
                true
            }
            Err(e) => {
                warn!("Could not seed pre-tracker with {}: {}", bbox, e);
                false
            }
        }
    }

    fn apply_pause_rules(&mut self, boundaries: &PhaseBoundaries, index: usize) {
        if index >= boundaries.before_occlusion_stop && !self.pre_seeded && self.post.is_none() {
            self.phase = Phase::PausedForPreBox;
            self.status = format!(
                "Paused at before_frame {}. Supply bbox to init pre-tracker.",
                boundaries.before_occlusion_stop
            );
            info!("Paused for pre-occlusion box at frame {}", index);
        } else if index >= boundaries.after_occlusion_stop && self.pre_seeded && self.post.is_none() {
            if self.pre.take().is_some() {
                debug!("Pre-tracker retired at frame {}", index);
            }
            self.phase = Phase::PausedForPostBox;
            self.status = format!(
                "Paused at after_frame {}. Supply bbox to init post-tracker.",
                boundaries.after_occlusion_stop
            );
            info!("Paused for post-occlusion box at frame {}", index);
        }
    }

    fn frame_status(&self, handler: Handler, advisory: Option<Advisory>) -> String {
        match (handler, advisory) {
            (_, Some(Advisory::PreTrackerLost)) => "Pre-tracker lost".to_string(),
            (_, Some(Advisory::PostTrackerLost)) => "Post-tracker lost".to_string(),
            (_, Some(Advisory::FeaturesExhausted)) => {
                "OpticalFlow: no features, holding position".to_string()
            }
            (_, Some(Advisory::PreBoxRejected)) => {
                "Pre box rejected by tracker. Will pause for a new one.".to_string()
            }
            (Handler::PreTracker, None) => "Pre-tracking".to_string(),
            (Handler::Bridge, None) => format!(
                "OpticalFlow tracking ({} features)",
                self.bridge.as_ref().map_or(0, |b| b.features().len())
            ),
            (Handler::PostTracker, None) => "Post-tracking".to_string(),
            (Handler::None, None) => "Playing".to_string(),
        }
    }

    fn finish(&mut self) {
        self.bridge = None;
        self.phase = Phase::Ended;
        self.status = "Status: Video ended".to_string();
        info!("Source exhausted after {} records", self.log.len());
    }

    fn invalid(&self, operation: &'static str) -> TrackingError {
        TrackingError::InvalidPhase {
            phase: self.phase,
            operation,
        }
    }
}
