use std::time::Duration;

use opencv::{
    core::{Rect, Scalar},
    imgproc,
    prelude::*,
};

use crate::track::BoundingBox;

pub fn draw_box(img: &mut Mat, bbox: BoundingBox, color: Scalar, thickness: i32) -> opencv::Result<()> {
    imgproc::rectangle(img, bbox.to_rect(), color, thickness, imgproc::LINE_8, 0)
}

/// Single-channel copy of a frame. Already-gray frames are cloned.
pub fn to_gray(frame: &Mat) -> opencv::Result<Mat> {
    if frame.channels() == 1 {
        return Ok(frame.clone());
    }
    let mut gray = Mat::default();
    let code = if frame.channels() == 4 {
        imgproc::COLOR_BGRA2GRAY
    } else {
        imgproc::COLOR_BGR2GRAY
    };
    imgproc::cvt_color(frame, &mut gray, code, 0)?;
    Ok(gray)
}

/// Intersect a box with the frame area. `None` when nothing is left.
pub fn clip_to_frame(bbox: BoundingBox, cols: i32, rows: i32) -> Option<Rect> {
    let x1 = bbox.x.max(0);
    let y1 = bbox.y.max(0);
    let x2 = (bbox.x + bbox.width).min(cols);
    let y2 = (bbox.y + bbox.height).min(rows);
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::new(x1, y1, x2 - x1, y2 - y1))
}

/// Delay between frames for best-effort real-time playback.
pub fn pacing_delay(fps: Option<f64>, fallback_fps: f64) -> Duration {
    let fps = fps
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(fallback_fps)
        .max(1.0);
    Duration::from_millis((1000.0 / fps) as u64)
}
