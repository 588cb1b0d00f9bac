use opencv::{
    core::{Ptr, Rect},
    prelude::*,
    tracking::{TrackerCSRT, TrackerCSRT_Params},
};
use tracing::{debug, warn};

use crate::error::{Result, TrackingError};
use crate::track::{BoundingBox, TrackMethod};

/// A single-subject appearance tracker seeded with one box.
pub trait DiscriminativeTracker {
    /// Seed the tracker. Must precede any `update`.
    fn init(&mut self, frame: &Mat, seed: BoundingBox) -> Result<()>;

    /// Advance one frame. `Ok(None)` means the tracker lost the subject.
    fn update(&mut self, frame: &Mat) -> Result<Option<BoundingBox>>;
}

/// Builds fresh, unseeded tracker instances.
pub trait TrackerFactory {
    type Tracker: DiscriminativeTracker;

    fn create(&self) -> Result<Self::Tracker>;
}

/// Channel and spatial reliability tracker from opencv_contrib.
pub struct CsrtTracker {
    inner: Ptr<TrackerCSRT>,
}

impl CsrtTracker {
    pub fn new() -> Result<Self> {
        let params = TrackerCSRT_Params::default()?;
        let inner = TrackerCSRT::create(&params)?;
        Ok(Self { inner })
    }
}

impl DiscriminativeTracker for CsrtTracker {
    fn init(&mut self, frame: &Mat, seed: BoundingBox) -> Result<()> {
        self.inner
            .init(frame, seed.to_rect())
            .map_err(|e| TrackingError::TrackerInit(e.message))
    }

    fn update(&mut self, frame: &Mat) -> Result<Option<BoundingBox>> {
        let mut rect = Rect::default();
        let found = self.inner.update(frame, &mut rect)?;
        Ok(found.then(|| BoundingBox::from_rect(rect)))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CsrtFactory;

impl TrackerFactory for CsrtFactory {
    type Tracker = CsrtTracker;

    fn create(&self) -> Result<CsrtTracker> {
        CsrtTracker::new()
    }
}

/// Owns one seeded tracker for a single phase of a session.
pub struct TrackerHandle<T: DiscriminativeTracker> {
    tracker: T,
    method: TrackMethod,
    seed: BoundingBox,
    seed_frame: usize,
    lost_frames: usize,
}

impl<T: DiscriminativeTracker> TrackerHandle<T> {
    /// Create and seed a tracker. On failure nothing is kept.
    pub fn seed<F>(
        factory: &F,
        method: TrackMethod,
        frame: &Mat,
        frame_index: usize,
        seed: BoundingBox,
    ) -> Result<Self>
    where
        F: TrackerFactory<Tracker = T>,
    {
        let mut tracker = factory.create()?;
        tracker.init(frame, seed)?;
        debug!("{} tracker seeded at frame {} with {}", method, frame_index, seed);
        Ok(Self {
            tracker,
            method,
            seed,
            seed_frame: frame_index,
            lost_frames: 0,
        })
    }

    /// Advance one frame. Tracker failures of any kind count as a lost frame.
    pub fn update(&mut self, frame: &Mat, frame_index: usize) -> Option<BoundingBox> {
        match self.tracker.update(frame) {
            Ok(Some(bbox)) => Some(bbox),
            Ok(None) => {
                self.lost_frames += 1;
                warn!("{} tracker lost the subject at frame {}", self.method, frame_index);
                None
            }
            Err(e) => {
                self.lost_frames += 1;
                warn!("{} tracker failed at frame {}: {}", self.method, frame_index, e);
                None
            }
        }
    }

    pub fn method(&self) -> TrackMethod {
        self.method
    }

    pub fn seed_box(&self) -> BoundingBox {
        self.seed
    }

    pub fn seed_frame(&self) -> usize {
        self.seed_frame
    }

    pub fn lost_frames(&self) -> usize {
        self.lost_frames
    }
}
