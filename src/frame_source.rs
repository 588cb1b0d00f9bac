//! Sequential, seekable access to decoded frames.

use std::path::{Path, PathBuf};

use num_traits::ToPrimitive;
use opencv::{
    prelude::*,
    videoio::{self, VideoCapture},
};
use tracing::info;

use crate::error::{Result, TrackingError};

/// Frames are yielded in index order starting at the current cursor.
pub trait FrameSource {
    /// Read the frame under the cursor and advance. `None` once exhausted.
    fn next_frame(&mut self) -> Result<Option<(usize, Mat)>>;

    /// Move the cursor so the next read returns frame `index`.
    fn seek(&mut self, index: usize) -> Result<()>;

    fn rewind(&mut self) -> Result<()> {
        self.seek(0)
    }

    /// Total frames, when the container reports it.
    fn frame_count(&self) -> Option<usize>;

    fn fps(&self) -> Option<f64>;
}

/// A video file decoded through OpenCV.
pub struct VideoFrameSource {
    cap: VideoCapture,
    path: PathBuf,
    next_index: usize,
    frame_count: Option<usize>,
    fps: Option<f64>,
    pub width: i32,
    pub height: i32,
}

impl VideoFrameSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TrackingError::video(format!("{} does not exist", path.display())));
        }
        let cap = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            return Err(TrackingError::video(format!("cannot open {}", path.display())));
        }

        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let frame_count = cap
            .get(videoio::CAP_PROP_FRAME_COUNT)?
            .to_usize()
            .filter(|n| *n > 0);
        let fps = Some(cap.get(videoio::CAP_PROP_FPS)?).filter(|f| *f > 0.0);

        info!(
            "Opened {}: {}x{}, {} frames, {:.2} fps",
            path.display(),
            width,
            height,
            frame_count.map_or_else(|| "unknown".to_string(), |n| n.to_string()),
            fps.unwrap_or(0.0)
        );

        Ok(Self {
            cap,
            path: path.to_path_buf(),
            next_index: 0,
            frame_count,
            fps,
            width,
            height,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for VideoFrameSource {
    fn next_frame(&mut self) -> Result<Option<(usize, Mat)>> {
        let mut frame = Mat::default();
        if !self.cap.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        Ok(Some((index, frame)))
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if !self.cap.set(videoio::CAP_PROP_POS_FRAMES, index as f64)? {
            return Err(TrackingError::video(format!(
                "cannot seek {} to frame {}",
                self.path.display(),
                index
            )));
        }
        self.next_index = index;
        Ok(())
    }

    fn frame_count(&self) -> Option<usize> {
        self.frame_count
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}

/// Frames held in memory, e.g. a pre-extracted clip.
#[derive(Default)]
pub struct MemoryFrameSource {
    frames: Vec<Mat>,
    cursor: usize,
    fps: Option<f64>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Mat>) -> Self {
        Self {
            frames,
            cursor: 0,
            fps: None,
        }
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl FrameSource for MemoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<(usize, Mat)>> {
        match self.frames.get(self.cursor) {
            Some(frame) => {
                let index = self.cursor;
                self.cursor += 1;
                Ok(Some((index, frame.clone())))
            }
            None => Ok(None),
        }
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if index > self.frames.len() {
            return Err(TrackingError::video(format!(
                "cannot seek to frame {} of {}",
                index,
                self.frames.len()
            )));
        }
        self.cursor = index;
        Ok(())
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.frames.len())
    }

    fn fps(&self) -> Option<f64> {
        self.fps
    }
}
