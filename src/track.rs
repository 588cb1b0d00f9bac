use std::fmt;
use std::str::FromStr;

use num_traits::ToPrimitive;
use opencv::core::Rect;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Subject rectangle in video pixel coordinates. Width and height are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Result<Self> {
        if width < 1 || height < 1 {
            return Err(TrackingError::invalid_box(format!(
                "{}x{} at ({}, {}) is smaller than 1x1",
                width, height, x, y
            )));
        }
        Ok(Self { x, y, width, height })
    }

    /// Convert a tracker output rectangle, clamping a collapsed side to 1 pixel.
    pub fn from_rect(rect: Rect) -> Self {
        Self {
            x: rect.x,
            y: rect.y,
            width: rect.width.max(1),
            height: rect.height.max(1),
        }
    }

    pub fn to_rect(self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Shift the box by a sub-pixel displacement. The new corner is truncated
    /// toward zero and the size never changes.
    pub fn translate(self, dx: f32, dy: f32) -> Self {
        let x = (self.x as f32 + dx).trunc().to_i32().unwrap_or(self.x);
        let y = (self.y as f32 + dy).trunc().to_i32().unwrap_or(self.y);
        Self { x, y, ..self }
    }

    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

impl TryFrom<[i32; 4]> for BoundingBox {
    type Error = TrackingError;

    fn try_from(v: [i32; 4]) -> Result<Self> {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [i32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

impl From<BoundingBox> for Rect {
    fn from(b: BoundingBox) -> Self {
        b.to_rect()
    }
}

/// Parses `x,y,w,h` (commas or whitespace).
impl FromStr for BoundingBox {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() != 4 {
            return Err(TrackingError::invalid_box(format!(
                "expected 4 integers (x,y,w,h), got {:?}",
                s
            )));
        }
        let mut v = [0i32; 4];
        for (slot, part) in v.iter_mut().zip(&parts) {
            *slot = part
                .parse()
                .map_err(|_| TrackingError::invalid_box(format!("{:?} is not an integer", part)))?;
        }
        Self::try_from(v)
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x, self.y, self.width, self.height)
    }
}

/// Which algorithm produced a record. Serialized with the track log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackMethod {
    #[serde(rename = "CSRT-pre")]
    PreTrack,
    #[serde(rename = "OpticalFlow")]
    OcclusionBridge,
    #[serde(rename = "CSRT-post")]
    PostTrack,
}

impl TrackMethod {
    pub fn label(self) -> &'static str {
        match self {
            TrackMethod::PreTrack => "CSRT-pre",
            TrackMethod::OcclusionBridge => "OpticalFlow",
            TrackMethod::PostTrack => "CSRT-post",
        }
    }
}

impl fmt::Display for TrackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One logged frame of the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackRecord {
    pub frame_index: usize,
    pub bbox: BoundingBox,
    pub method: TrackMethod,
}

impl TrackRecord {
    pub fn new(frame_index: usize, bbox: BoundingBox, method: TrackMethod) -> Self {
        Self {
            frame_index,
            bbox,
            method,
        }
    }
}
