use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Externally supplied frame indices that drive one tracking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoundaries {
    /// Pause here for the pre-occlusion box if none was supplied yet.
    pub before_occlusion_stop: usize,
    /// Pause here for the post-occlusion box.
    pub after_occlusion_stop: usize,
    /// First frame bridged by optical flow.
    pub occluder_enter: usize,
    /// Last frame bridged by optical flow.
    pub occluder_settled: usize,
    /// Last frame the post-occlusion tracker runs on.
    pub subject_reappear_deadline: usize,
}

impl PhaseBoundaries {
    /// Check ordering and, when the video length is known, that every index
    /// names an existing frame.
    pub fn validate(&self, frame_count: Option<usize>) -> Result<()> {
        if self.before_occlusion_stop >= self.after_occlusion_stop {
            return Err(TrackingError::config(format!(
                "before-occlusion stop frame {} must be less than after-occlusion stop frame {}",
                self.before_occlusion_stop, self.after_occlusion_stop
            )));
        }
        if self.occluder_enter > self.occluder_settled {
            return Err(TrackingError::config(format!(
                "occluder enter frame {} is after occluder settled frame {}",
                self.occluder_enter, self.occluder_settled
            )));
        }
        if self.occluder_settled > self.subject_reappear_deadline {
            return Err(TrackingError::config(format!(
                "occluder settled frame {} is after subject reappear deadline {}",
                self.occluder_settled, self.subject_reappear_deadline
            )));
        }
        if let Some(total) = frame_count {
            let named = [
                ("before-occlusion stop", self.before_occlusion_stop),
                ("after-occlusion stop", self.after_occlusion_stop),
                ("occluder enter", self.occluder_enter),
                ("occluder settled", self.occluder_settled),
                ("subject reappear deadline", self.subject_reappear_deadline),
            ];
            for (name, idx) in named {
                if idx >= total {
                    return Err(TrackingError::config(format!(
                        "{} frame {} is outside the video ({} frames)",
                        name, idx, total
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn in_bridge_window(&self, frame_index: usize) -> bool {
        (self.occluder_enter..=self.occluder_settled).contains(&frame_index)
    }

    /// Pick the per-frame handler. Earlier arms win when windows overlap.
    ///
    /// `pre_tracking` is true only while the pre-tracker is live in
    /// `PreTracking`; `pre_seeded` stays true for the rest of the session and
    /// arms the bridge.
    pub fn handler_for(
        &self,
        frame_index: usize,
        pre_tracking: bool,
        pre_seeded: bool,
        post_active: bool,
    ) -> Handler {
        if pre_tracking && frame_index < self.occluder_enter {
            Handler::PreTracker
        } else if pre_seeded && self.in_bridge_window(frame_index) {
            Handler::Bridge
        } else if post_active
            && frame_index > self.occluder_settled
            && frame_index <= self.subject_reappear_deadline
        {
            Handler::PostTracker
        } else {
            Handler::None
        }
    }
}

/// Session phase. Bridging is a sub-phase of `PreTracking`/`PostTracking`,
/// reported separately by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    PrePlay,
    PausedForPreBox,
    PreTracking,
    PausedForPostBox,
    PostTracking,
    Ended,
}

impl Phase {
    pub fn is_paused(self) -> bool {
        matches!(self, Phase::PausedForPreBox | Phase::PausedForPostBox)
    }
}

/// The algorithm that handles the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    PreTracker,
    Bridge,
    PostTracker,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boundaries() -> PhaseBoundaries {
        PhaseBoundaries {
            before_occlusion_stop: 20,
            after_occlusion_stop: 50,
            occluder_enter: 20,
            occluder_settled: 30,
            subject_reappear_deadline: 80,
        }
    }

    #[test]
    fn test_valid_boundaries() {
        assert!(boundaries().validate(None).is_ok());
        assert!(boundaries().validate(Some(100)).is_ok());
    }

    #[test]
    fn test_rejects_out_of_order() {
        let mut b = boundaries();
        b.after_occlusion_stop = 20;
        assert!(matches!(b.validate(None), Err(TrackingError::Config(_))));

        let mut b = boundaries();
        b.occluder_enter = 31;
        assert!(b.validate(None).is_err());

        let mut b = boundaries();
        b.subject_reappear_deadline = 29;
        assert!(b.validate(None).is_err());
    }

    #[test]
    fn test_rejects_frames_outside_video() {
        let err = boundaries().validate(Some(60)).unwrap_err();
        assert!(err.is_fatal_to_session());
        assert!(err.to_string().contains("subject reappear deadline"));
    }

    #[test]
    fn test_handler_selection() {
        let b = boundaries();
        assert_eq!(b.handler_for(5, true, true, false), Handler::PreTracker);
        assert_eq!(b.handler_for(5, false, false, false), Handler::None);
        assert_eq!(b.handler_for(20, true, true, false), Handler::Bridge);
        assert_eq!(b.handler_for(30, false, true, true), Handler::Bridge);
        assert_eq!(b.handler_for(31, true, true, false), Handler::None);
        assert_eq!(b.handler_for(55, false, true, true), Handler::PostTracker);
        assert_eq!(b.handler_for(81, false, true, true), Handler::None);
    }

    #[test]
    fn test_retired_pre_tracker_gets_no_frames() {
        // Post pause lands before the occluder enters
        let b = PhaseBoundaries {
            before_occlusion_stop: 2,
            after_occlusion_stop: 5,
            occluder_enter: 10,
            occluder_settled: 12,
            subject_reappear_deadline: 20,
        };
        assert!(b.validate(Some(30)).is_ok());
        assert_eq!(b.handler_for(6, false, true, true), Handler::None);
        assert_eq!(b.handler_for(10, false, true, true), Handler::Bridge);
        assert_eq!(b.handler_for(13, false, true, true), Handler::PostTracker);
        assert_eq!(b.handler_for(10, false, false, false), Handler::None);
    }
}
