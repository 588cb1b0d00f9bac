//! Motion bridge across a full occlusion.
//!
//! While no appearance tracker can see the subject, the held box is moved by the
//! mean displacement of sparse corner features sampled from its last known
//! region and followed with pyramidal Lucas-Kanade flow. Only the position
//! changes; the box size is frozen for the whole bridge.

use nalgebra::Vector2;
use opencv::{
    core::{self, Point2f, Scalar, Size, TermCriteria, Vector, CV_8UC1},
    imgproc,
    prelude::*,
    video,
};
use tracing::{debug, warn};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::track::BoundingBox;
use crate::utils::clip_to_frame;

/// Sparse point sampling and frame-to-frame point motion.
pub trait FeatureFlow {
    /// Salient points inside `region` of a grayscale frame.
    fn sample(&mut self, gray: &Mat, region: BoundingBox) -> Result<Vec<Point2f>>;

    /// Follow `points` from `prev` into `next`. One entry per input point,
    /// `None` where the point was not found.
    fn track(&mut self, prev: &Mat, next: &Mat, points: &[Point2f]) -> Result<Vec<Option<Point2f>>>;
}

/// Shi-Tomasi corners + pyramidal Lucas-Kanade.
pub struct PyramidalLk {
    config: BridgeConfig,
}

impl PyramidalLk {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl Default for PyramidalLk {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl FeatureFlow for PyramidalLk {
    fn sample(&mut self, gray: &Mat, region: BoundingBox) -> Result<Vec<Point2f>> {
        let Some(roi) = clip_to_frame(region, gray.cols(), gray.rows()) else {
            return Ok(Vec::new());
        };

        let mut mask =
            Mat::new_rows_cols_with_default(gray.rows(), gray.cols(), CV_8UC1, Scalar::all(0.0))?;
        imgproc::rectangle(&mut mask, roi, Scalar::all(255.0), -1, imgproc::LINE_8, 0)?;

        let mut corners = Vector::<Point2f>::new();
        imgproc::good_features_to_track(
            gray,
            &mut corners,
            self.config.max_corners,
            self.config.quality_level,
            self.config.min_distance,
            &mask,
            3,
            false,
            0.04,
        )?;
        Ok(corners.to_vec())
    }

    fn track(&mut self, prev: &Mat, next: &Mat, points: &[Point2f]) -> Result<Vec<Option<Point2f>>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }
        let prev_pts = Vector::<Point2f>::from_slice(points);
        let mut next_pts = Vector::<Point2f>::new();
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        let criteria = TermCriteria::new(
            core::TermCriteria_COUNT + core::TermCriteria_EPS,
            self.config.max_iterations,
            self.config.epsilon,
        )?;

        video::calc_optical_flow_pyr_lk(
            prev,
            next,
            &prev_pts,
            &mut next_pts,
            &mut status,
            &mut err,
            Size::new(self.config.window_size, self.config.window_size),
            self.config.max_level,
            criteria,
            0,
            1e-4,
        )?;

        Ok(next_pts
            .iter()
            .zip(status.iter())
            .map(|(p, s)| (s == 1).then_some(p))
            .collect())
    }
}

/// Points followed through the bridge. Replaced wholesale every frame.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    points: Vec<Point2f>,
}

impl FeatureSet {
    pub fn new(points: Vec<Point2f>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point2f] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    fn replace(&mut self, points: Vec<Point2f>) {
        self.points = points;
    }
}

/// Mean (dx, dy) over matched point pairs; `None` when there are no pairs.
pub fn mean_displacement(old: &[Point2f], new: &[Point2f]) -> Option<Vector2<f32>> {
    let n = old.len().min(new.len());
    if n == 0 {
        return None;
    }
    let sum = old
        .iter()
        .zip(new)
        .fold(Vector2::zeros(), |acc: Vector2<f32>, (o, p)| {
            acc + Vector2::new(p.x - o.x, p.y - o.y)
        });
    Some(sum / n as f32)
}

/// Result of bridging one frame.
#[derive(Debug, Clone, Copy)]
pub struct BridgeStep {
    pub bbox: BoundingBox,
    pub survivors: usize,
    pub displacement: Option<Vector2<f32>>,
}

impl BridgeStep {
    /// No point survived, the box was held in place.
    pub fn starved(&self) -> bool {
        self.survivors == 0
    }
}

/// Bridge state for one occlusion window.
#[derive(Debug)]
pub struct BridgeEstimator {
    features: FeatureSet,
    bbox: BoundingBox,
    frames_bridged: usize,
    starved_frames: usize,
}

impl BridgeEstimator {
    /// Sample features from the last known box on the frame before the
    /// occlusion. A failed or empty sampling degrades to holding the box.
    pub fn enter<P: FeatureFlow>(flow: &mut P, prev_gray: &Mat, last_box: BoundingBox) -> Self {
        let points = match flow.sample(prev_gray, last_box) {
            Ok(points) => points,
            Err(e) => {
                warn!("Feature sampling failed, holding box {}: {}", last_box, e);
                Vec::new()
            }
        };
        if points.is_empty() {
            warn!("No features in {}, box will be held for the whole occlusion", last_box);
        } else {
            debug!("Bridge entered with {} features in {}", points.len(), last_box);
        }
        Self {
            features: FeatureSet::new(points),
            bbox: last_box,
            frames_bridged: 0,
            starved_frames: 0,
        }
    }

    /// Move the held box by the mean flow of surviving features from
    /// `prev_gray` to `gray`.
    pub fn advance<P: FeatureFlow>(&mut self, flow: &mut P, prev_gray: &Mat, gray: &Mat) -> BridgeStep {
        self.frames_bridged += 1;

        let tracked = if self.features.is_empty() {
            Vec::new()
        } else {
            flow.track(prev_gray, gray, self.features.points())
                .unwrap_or_else(|e| {
                    warn!("Optical flow failed, holding box {}: {}", self.bbox, e);
                    Vec::new()
                })
        };

        let (old, new): (Vec<Point2f>, Vec<Point2f>) = self
            .features
            .points()
            .iter()
            .zip(&tracked)
            .filter_map(|(o, t)| t.map(|p| (*o, p)))
            .unzip();

        let displacement = mean_displacement(&old, &new);
        if let Some(d) = displacement {
            self.bbox = self.bbox.translate(d.x, d.y);
        } else {
            self.starved_frames += 1;
        }
        let survivors = new.len();
        self.features.replace(new);

        BridgeStep {
            bbox: self.bbox,
            survivors,
            displacement,
        }
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn frames_bridged(&self) -> usize {
        self.frames_bridged
    }

    pub fn starved_frames(&self) -> usize {
        self.starved_frames
    }
}
