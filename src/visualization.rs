use opencv::{
    core::{Point, Scalar},
    imgproc,
    prelude::*,
};

use crate::state_machine::Advisory;
use crate::track::{BoundingBox, TrackMethod};
use crate::utils::draw_box;

/// BGR overlay colour per method.
pub fn method_color(method: TrackMethod) -> Scalar {
    match method {
        TrackMethod::PreTrack => Scalar::new(0.0, 255.0, 0.0, 0.0),
        TrackMethod::OcclusionBridge => Scalar::new(0.0, 200.0, 255.0, 0.0),
        TrackMethod::PostTrack => Scalar::new(255.0, 0.0, 0.0, 0.0),
    }
}

/// One line of Hershey text anchored at its baseline origin.
struct Caption<'a> {
    text: &'a str,
    origin: Point,
    scale: f64,
    color: Scalar,
}

impl<'a> Caption<'a> {
    fn new(text: &'a str, x: i32, y: i32, scale: f64, color: Scalar) -> Self {
        Self {
            text,
            origin: Point::new(x, y),
            scale,
            color,
        }
    }

    fn stroke(&self, frame: &mut Mat, color: Scalar, weight: i32) -> opencv::Result<()> {
        imgproc::put_text(
            frame,
            self.text,
            self.origin,
            imgproc::FONT_HERSHEY_SIMPLEX,
            self.scale,
            color,
            weight,
            imgproc::LINE_AA,
            false,
        )
    }

    fn draw(&self, frame: &mut Mat) -> opencv::Result<()> {
        self.stroke(frame, self.color, 2)
    }

    /// Thin text over a dark halo, readable on any background.
    fn draw_outlined(&self, frame: &mut Mat) -> opencv::Result<()> {
        self.stroke(frame, Scalar::all(0.0), 3)?;
        self.stroke(frame, self.color, 1)
    }
}

/// Logged box plus its method label above the top-left corner.
pub fn draw_overlay(frame: &mut Mat, bbox: BoundingBox, method: TrackMethod) -> opencv::Result<()> {
    let color = method_color(method);
    draw_box(frame, bbox, color, 2)?;
    Caption::new(method.label(), bbox.x, (bbox.y - 5).max(12), 0.6, color).draw(frame)
}

/// Banner for conditions the operator should notice.
pub fn draw_advisory(frame: &mut Mat, advisory: Advisory) -> opencv::Result<()> {
    let red = Scalar::new(0.0, 0.0, 255.0, 0.0);
    let (text, row, color) = match advisory {
        Advisory::PreTrackerLost => ("Pre-tracker lost", 40, red),
        Advisory::PostTrackerLost => ("Post-tracker lost", 70, red),
        Advisory::FeaturesExhausted => (
            "OpticalFlow holding position",
            40,
            Scalar::new(0.0, 165.0, 255.0, 0.0),
        ),
        Advisory::PreBoxRejected => ("Pre box rejected", 40, red),
    };
    Caption::new(text, 20, row, 1.0, color).draw(frame)
}

pub fn draw_bridge_banner(frame: &mut Mat) -> opencv::Result<()> {
    Caption::new("OpticalFlow tracking", 20, 40, 1.0, Scalar::new(0.0, 255.0, 255.0, 0.0)).draw(frame)
}

/// Operator status line along the bottom edge.
pub fn draw_status(frame: &mut Mat, status: &str) -> opencv::Result<()> {
    let y = (frame.rows() - 12).max(20);
    Caption::new(status, 10, y, 0.5, Scalar::all(255.0)).draw_outlined(frame)
}

pub fn draw_frame_info(frame: &mut Mat, frame_id: usize, total: Option<usize>) -> opencv::Result<()> {
    let text = match total {
        Some(total) => format!("Frame: {}/{}", frame_id, total),
        None => format!("Frame: {}", frame_id),
    };
    let x = (frame.cols() - 180).max(10);
    Caption::new(&text, x, 30, 0.6, Scalar::all(255.0)).draw(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC3};

    fn canvas() -> Mat {
        Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_overlay_uses_method_color() {
        let mut frame = canvas();
        let bbox = BoundingBox::new(40, 40, 30, 30).unwrap();
        draw_overlay(&mut frame, bbox, TrackMethod::OcclusionBridge).unwrap();

        // Left edge of the rectangle, well below the label
        let px = *frame.at_2d::<Vec3b>(60, 40).unwrap();
        assert_eq!(px, Vec3b::from([0, 200, 255]));

        // Interior untouched
        let inside = *frame.at_2d::<Vec3b>(55, 55).unwrap();
        assert_eq!(inside, Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn test_banners_draw() {
        let mut frame = canvas();
        draw_advisory(&mut frame, Advisory::PreTrackerLost).unwrap();
        draw_advisory(&mut frame, Advisory::PreBoxRejected).unwrap();
        draw_bridge_banner(&mut frame).unwrap();
        draw_status(&mut frame, "Paused").unwrap();
        draw_frame_info(&mut frame, 3, Some(10)).unwrap();
        assert!(opencv::core::count_non_zero(&crate::utils::to_gray(&frame).unwrap()).unwrap() > 0);
    }
}
