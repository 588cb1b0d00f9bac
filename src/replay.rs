//! Deterministic playback of a saved track log over its video.

use opencv::prelude::*;
use tracing::info;

use crate::error::{Result, TrackingError};
use crate::frame_source::FrameSource;
use crate::track::{BoundingBox, TrackMethod};
use crate::track_log::ReplayMap;
use crate::visualization::draw_overlay;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaySummary {
    pub frames: usize,
    pub overlays: usize,
}

/// Play `source` from frame 0, drawing the logged box (if any) onto each frame
/// before handing it to `sink`. Frames without a logged box pass through bare.
///
/// A log that references frames past the end of the source is rejected before
/// the source is touched when the frame count is known, and after playback
/// otherwise.
pub fn replay<S, K>(source: &mut S, map: &ReplayMap, mut sink: K) -> Result<ReplaySummary>
where
    S: FrameSource,
    K: FnMut(usize, &Mat, Option<(BoundingBox, TrackMethod)>) -> Result<()>,
{
    if let (Some(logged), Some(available)) = (map.max_frame(), source.frame_count()) {
        if logged >= available {
            return Err(TrackingError::OutOfRange { logged, available });
        }
    }
    source.rewind()?;

    let mut summary = ReplaySummary::default();
    while let Some((index, mut frame)) = source.next_frame()? {
        let overlay = map.get(index);
        if let Some((bbox, method)) = overlay {
            draw_overlay(&mut frame, bbox, method)?;
            summary.overlays += 1;
        }
        sink(index, &frame, overlay)?;
        summary.frames += 1;
    }

    // Container frame counts can be missing or wrong; the read count is not
    if let Some(logged) = map.max_frame() {
        if logged >= summary.frames {
            return Err(TrackingError::OutOfRange {
                logged,
                available: summary.frames,
            });
        }
    }

    info!(
        "Replay complete: {} frames, {} with overlay",
        summary.frames, summary.overlays
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, Vec3b, CV_8UC3};

    use crate::frame_source::MemoryFrameSource;
    use crate::track::TrackRecord;
    use crate::track_log::TrackLog;

    fn source(n: usize) -> MemoryFrameSource {
        MemoryFrameSource::new(
            (0..n)
                .map(|_| Mat::new_rows_cols_with_default(64, 64, CV_8UC3, Scalar::all(0.0)).unwrap())
                .collect(),
        )
    }

    fn log_with_gap() -> TrackLog {
        let mut log = TrackLog::new();
        for i in (10..15).chain(18..22) {
            let bbox = BoundingBox::new(20 + i as i32 % 3, 25, 12, 20).unwrap();
            log.append(TrackRecord::new(i, bbox, TrackMethod::PreTrack));
        }
        log
    }

    #[test]
    fn test_gap_renders_no_overlay() {
        let mut src = source(25);
        let log = log_with_gap();
        let map = log.to_map();

        let mut seen = Vec::new();
        let summary = replay(&mut src, &map, |i, frame, overlay| {
            seen.push((i, overlay, frame.clone()));
            Ok(())
        })
        .unwrap();

        assert_eq!(summary, ReplaySummary { frames: 25, overlays: 9 });
        for i in 15..=17 {
            assert!(seen[i].1.is_none());
        }
        let (bbox, method) = seen[18].1.unwrap();
        assert_eq!(Some((bbox, method)), map.get(18));

        // The box was drawn on the frame handed out
        let edge = *seen[18].2.at_2d::<Vec3b>(bbox.y + 10, bbox.x).unwrap();
        assert_eq!(edge, Vec3b::from([0, 255, 0]));
        let untouched = *seen[16].2.at_2d::<Vec3b>(bbox.y + 10, bbox.x).unwrap();
        assert_eq!(untouched, Vec3b::from([0, 0, 0]));
    }

    #[test]
    fn test_log_longer_than_video() {
        let mut src = source(20);
        src.seek(3).unwrap();
        let map = log_with_gap().to_map();

        let err = replay(&mut src, &map, |_, _, _| Ok(())).unwrap_err();
        assert!(matches!(err, TrackingError::OutOfRange { logged: 21, available: 20 }));
        assert_eq!(src.position(), 3);
    }

    /// A container that does not report its length.
    struct UnknownLength(MemoryFrameSource);

    impl FrameSource for UnknownLength {
        fn next_frame(&mut self) -> Result<Option<(usize, Mat)>> {
            self.0.next_frame()
        }

        fn seek(&mut self, index: usize) -> Result<()> {
            self.0.seek(index)
        }

        fn frame_count(&self) -> Option<usize> {
            None
        }

        fn fps(&self) -> Option<f64> {
            self.0.fps()
        }
    }

    #[test]
    fn test_log_longer_than_video_of_unknown_length() {
        let mut src = UnknownLength(source(20));
        let map = log_with_gap().to_map();

        let mut frames = 0;
        let err = replay(&mut src, &map, |_, _, _| {
            frames += 1;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, TrackingError::OutOfRange { logged: 21, available: 20 }));
        assert_eq!(frames, 20);

        // A log that fits still plays through
        let mut src = UnknownLength(source(22));
        let summary = replay(&mut src, &map, |_, _, _| Ok(())).unwrap();
        assert_eq!(summary, ReplaySummary { frames: 22, overlays: 9 });
    }

    #[test]
    fn test_replay_is_repeatable() {
        let mut src = source(25);
        let map = log_with_gap().to_map();

        let mut first = Vec::new();
        replay(&mut src, &map, |i, _, o| {
            first.push((i, o));
            Ok(())
        })
        .unwrap();
        let mut second = Vec::new();
        replay(&mut src, &map, |i, _, o| {
            second.push((i, o));
            Ok(())
        })
        .unwrap();
        assert_eq!(first, second);
    }
}
