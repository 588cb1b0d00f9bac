pub mod config;
pub mod error;
pub mod frame_source;
pub mod optical_flow;
pub mod phase;
pub mod replay;
pub mod state_machine;
pub mod track;
pub mod track_log;
pub mod tracker;
pub mod utils;
pub mod visualization;

// Re-export main types
pub use crate::config::Config;
pub use crate::error::{Result, TrackingError};
pub use crate::frame_source::{FrameSource, MemoryFrameSource, VideoFrameSource};
pub use crate::phase::{Phase, PhaseBoundaries};
pub use crate::state_machine::{Advisory, CsrtPhaseMachine, FrameReport, PhaseMachine, StepOutcome};
pub use crate::track::{BoundingBox, TrackMethod, TrackRecord};
pub use crate::track_log::{ReplayMap, TrackLog};
