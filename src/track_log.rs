//! Append-only trajectory log and its CSV form.
//!
//! File layout: header `frame_idx,x,y,w,h,method`, one row per record in
//! ascending frame order. Readers treat the file as a sparse mapping from
//! frame index to box; missing frames are gaps.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, TrackingError};
use crate::track::{BoundingBox, TrackMethod, TrackRecord};

#[derive(Debug, Serialize, Deserialize)]
struct TrackRow {
    frame_idx: usize,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    method: TrackMethod,
}

impl From<&TrackRecord> for TrackRow {
    fn from(r: &TrackRecord) -> Self {
        Self {
            frame_idx: r.frame_index,
            x: r.bbox.x,
            y: r.bbox.y,
            w: r.bbox.width,
            h: r.bbox.height,
            method: r.method,
        }
    }
}

/// `tracker_<video-stem>.csv` in the working directory.
pub fn default_log_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    PathBuf::from(format!("tracker_{}.csv", stem))
}

/// Records of one session in production order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackLog {
    records: Vec<TrackRecord>,
}

impl TrackLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames arrive strictly in order, so a repeated or earlier index is a
    /// caller bug.
    pub fn append(&mut self, record: TrackRecord) {
        debug_assert!(
            self.last_frame_index()
                .map_or(true, |last| record.frame_index > last),
            "frame {} appended out of order",
            record.frame_index
        );
        self.records.push(record);
    }

    pub fn records(&self) -> &[TrackRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last_frame_index(&self) -> Option<usize> {
        self.records.last().map(|r| r.frame_index)
    }

    pub fn count_by_method(&self, method: TrackMethod) -> usize {
        self.records.iter().filter(|r| r.method == method).count()
    }

    pub fn to_map(&self) -> ReplayMap {
        ReplayMap {
            boxes: self
                .records
                .iter()
                .map(|r| (r.frame_index, (r.bbox, r.method)))
                .collect(),
        }
    }

    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        if self.records.is_empty() {
            wtr.write_record(["frame_idx", "x", "y", "w", "h", "method"])?;
        }
        for record in &self.records {
            wtr.serialize(TrackRow::from(record))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the whole log, replacing any existing file.
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        if self.records.is_empty() {
            return Err(TrackingError::EmptyLog);
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.write_csv(File::create(path)?)?;
        info!("Saved {} track records to {}", self.records.len(), path.display());
        Ok(())
    }
}

/// Frame index to logged box, as read back for replay.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayMap {
    boxes: BTreeMap<usize, (BoundingBox, TrackMethod)>,
}

impl ReplayMap {
    pub fn load_csv(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(TrackingError::LogNotFound(path.to_path_buf()));
        }
        let map = Self::read_csv(File::open(path)?)?;
        info!("Loaded {} track records from {}", map.len(), path.display());
        Ok(map)
    }

    /// A repeated frame index keeps the last row.
    pub fn read_csv<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut boxes = BTreeMap::new();
        for row in rdr.deserialize() {
            let row: TrackRow = row?;
            let bbox = BoundingBox::new(row.x, row.y, row.w, row.h)?;
            boxes.insert(row.frame_idx, (bbox, row.method));
        }
        Ok(Self { boxes })
    }

    pub fn get(&self, frame_index: usize) -> Option<(BoundingBox, TrackMethod)> {
        self.boxes.get(&frame_index).copied()
    }

    pub fn max_frame(&self) -> Option<usize> {
        self.boxes.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, BoundingBox, TrackMethod)> + '_ {
        self.boxes.iter().map(|(i, (b, m))| (*i, *b, *m))
    }
}
