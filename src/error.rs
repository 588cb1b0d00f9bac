//! Error types for the occlusion-aware tracker.

use std::path::PathBuf;

use thiserror::Error;

use crate::phase::Phase;

/// Result type alias for the tracking library
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Errors that can occur while configuring, running or replaying a session.
///
/// Tracker loss and feature starvation are not errors; they are reported as
/// advisories on the frame report and the session keeps advancing.
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid bounding box: {0}")]
    InvalidBox(String),

    #[error("Cannot {operation} while in phase {phase:?}")]
    InvalidPhase {
        phase: Phase,
        operation: &'static str,
    },

    #[error("Tracker initialization failed: {0}")]
    TrackerInit(String),

    #[error("Track log not found: {0}")]
    LogNotFound(PathBuf),

    #[error("Track log references frame {logged} but the video has only {available} frames")]
    OutOfRange { logged: usize, available: usize },

    #[error("No tracking data to save")]
    EmptyLog,

    #[error("Video source error: {0}")]
    Video(String),

    #[error("OpenCV error: {0}")]
    OpenCv(#[from] opencv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl TrackingError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_box<S: Into<String>>(msg: S) -> Self {
        Self::InvalidBox(msg.into())
    }

    pub fn video<S: Into<String>>(msg: S) -> Self {
        Self::Video(msg.into())
    }

    /// Configuration errors end the session; everything else leaves it continuable.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
