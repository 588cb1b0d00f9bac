use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::phase::PhaseBoundaries;
use crate::track::BoundingBox;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub video_path: Option<String>,
    pub boundaries: Option<PhaseBoundaries>,
    /// Operator box for the pre-occlusion pause, if known up front.
    pub pre_box: Option<BoundingBox>,
    /// Operator box for the post-occlusion pause, if known up front.
    pub post_box: Option<BoundingBox>,
    pub bridge: BridgeConfig,
    pub playback: PlaybackConfig,
    /// Track log path; defaults to `tracker_<video-stem>.csv`.
    pub log_path: Option<String>,
}

/// Feature sampling and pyramidal Lucas-Kanade parameters for the occlusion bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub max_corners: i32,
    pub quality_level: f64,
    pub min_distance: f64,
    pub window_size: i32,
    pub max_level: i32,
    pub max_iterations: i32,
    pub epsilon: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_corners: 50,
            quality_level: 0.3,
            min_distance: 5.0,
            window_size: 15,
            max_level: 2,
            max_iterations: 30,
            epsilon: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Used for pacing when the container reports no frame rate.
    pub fallback_fps: f64,
    /// Sleep between frames to approximate the source frame rate.
    pub realtime: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            fallback_fps: 24.0,
            realtime: false,
        }
    }
}

impl Config {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        if let Some(b) = &cfg.boundaries {
            b.validate(None)
                .with_context(|| format!("Invalid boundaries in {}", path.display()))?;
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let cfg: Config = serde_json::from_str(r#"{"video_path": "road.mp4"}"#).unwrap();
        assert_eq!(cfg.video_path.as_deref(), Some("road.mp4"));
        assert!(cfg.boundaries.is_none());
        assert_eq!(cfg.bridge.max_corners, 50);
        assert_eq!(cfg.bridge.window_size, 15);
        assert_eq!(cfg.playback.fallback_fps, 24.0);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "video_path": "road.mp4",
                "boundaries": {{
                    "before_occlusion_stop": 1,
                    "after_occlusion_stop": 50,
                    "occluder_enter": 19,
                    "occluder_settled": 26,
                    "subject_reappear_deadline": 90
                }},
                "pre_box": [100, 120, 40, 90],
                "bridge": {{ "max_corners": 80 }}
            }}"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path()).unwrap();
        let b = cfg.boundaries.unwrap();
        assert_eq!(b.occluder_enter, 19);
        assert_eq!(cfg.pre_box, Some(BoundingBox::new(100, 120, 40, 90).unwrap()));
        assert_eq!(cfg.bridge.max_corners, 80);
        assert_eq!(cfg.bridge.quality_level, 0.3);
    }

    #[test]
    fn test_from_file_rejects_bad_boundaries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "boundaries": {{
                "before_occlusion_stop": 50,
                "after_occlusion_stop": 10,
                "occluder_enter": 19,
                "occluder_settled": 26,
                "subject_reappear_deadline": 90
            }} }}"#
        )
        .unwrap();

        assert!(Config::from_file(file.path()).is_err());
    }
}
