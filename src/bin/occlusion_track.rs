use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use opencv::{
    core::Size,
    prelude::*,
    videoio::VideoWriter,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use occlusion_track::{
    phase::Handler,
    replay::replay,
    track_log::default_log_path,
    utils::pacing_delay,
    visualization, BoundingBox, Config, CsrtPhaseMachine, FrameSource, Phase, PhaseBoundaries,
    ReplayMap, StepOutcome, TrackingError, VideoFrameSource,
};

#[derive(Parser)]
#[command(
    name = "occlusion_track",
    about = "Track one subject through a fixed-camera video across a full occlusion",
    version = "0.1.0"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a live tracking session, asking for boxes at the pause points
    Track(TrackArgs),
    /// Overlay a saved track log onto its video
    Replay(ReplayArgs),
}

#[derive(Args)]
struct TrackArgs {
    /// Input video
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Pause for the pre-occlusion box at this frame
    #[arg(long)]
    before: Option<usize>,

    /// Pause for the post-occlusion box at this frame
    #[arg(long)]
    after: Option<usize>,

    /// First frame bridged by optical flow
    #[arg(long)]
    enter: Option<usize>,

    /// Last frame bridged by optical flow
    #[arg(long)]
    settled: Option<usize>,

    /// Last frame tracked after the occlusion
    #[arg(long)]
    deadline: Option<usize>,

    /// Pre-occlusion box as x,y,w,h (skips the first pause)
    #[arg(long)]
    pre_box: Option<BoundingBox>,

    /// Post-occlusion box as x,y,w,h (answers the second pause)
    #[arg(long)]
    post_box: Option<BoundingBox>,

    /// Track log output (default tracker_<video>.csv)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Write an overlaid video here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pace playback to the video frame rate
    #[arg(long)]
    realtime: bool,
}

#[derive(Args)]
struct ReplayArgs {
    /// Input video
    #[arg(short, long)]
    video: Option<PathBuf>,

    /// Track log to replay (default tracker_<video>.csv)
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Write an overlaid video here
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Pace playback to the video frame rate
    #[arg(long)]
    realtime: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("occlusion_track=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Track(args) => run_track(config, args),
        Command::Replay(args) => run_replay(config, args),
    }
}

fn video_path(cli: Option<&PathBuf>, config: &Config) -> anyhow::Result<PathBuf> {
    cli.cloned()
        .or_else(|| config.video_path.as_ref().map(PathBuf::from))
        .context("No video given (use --video or video_path in the config)")
}

/// CLI values override the config file field by field.
fn resolve_boundaries(config: Option<PhaseBoundaries>, args: &TrackArgs) -> anyhow::Result<PhaseBoundaries> {
    let pick = |cli: Option<usize>, cfg: Option<usize>, name: &str| {
        cli.or(cfg)
            .with_context(|| format!("Missing {} frame (flag --{} or config boundaries)", name, name))
    };
    Ok(PhaseBoundaries {
        before_occlusion_stop: pick(args.before, config.map(|b| b.before_occlusion_stop), "before")?,
        after_occlusion_stop: pick(args.after, config.map(|b| b.after_occlusion_stop), "after")?,
        occluder_enter: pick(args.enter, config.map(|b| b.occluder_enter), "enter")?,
        occluder_settled: pick(args.settled, config.map(|b| b.occluder_settled), "settled")?,
        subject_reappear_deadline: pick(
            args.deadline,
            config.map(|b| b.subject_reappear_deadline),
            "deadline",
        )?,
    })
}

fn open_writer(path: &Path, fps: f64, width: i32, height: i32) -> anyhow::Result<VideoWriter> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(
        &path.to_string_lossy(),
        fourcc,
        fps,
        Size::new(width, height),
        true,
    )?;
    if !writer.is_opened()? {
        bail!("Failed to open video writer {}", path.display());
    }
    info!("Writing overlay video to {}", path.display());
    Ok(writer)
}

/// Ask on stdin until a valid box arrives. Empty input returns `None` when
/// `allow_empty` is set.
fn prompt_box(prompt: &str, allow_empty: bool) -> anyhow::Result<Option<BoundingBox>> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("{}", prompt);
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            bail!("Input closed while waiting for a bounding box");
        };
        let line = line?;
        let line = line.trim();
        if line.is_empty() && allow_empty {
            return Ok(None);
        }
        match line.parse::<BoundingBox>() {
            Ok(b) => return Ok(Some(b)),
            Err(e) => println!("{}", e),
        }
    }
}

fn run_track(config: Config, args: TrackArgs) -> anyhow::Result<()> {
    let video = video_path(args.video.as_ref(), &config)?;
    let boundaries = resolve_boundaries(config.boundaries, &args)?;
    let log_path = args
        .log
        .clone()
        .or_else(|| config.log_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| default_log_path(&video));
    let pre_box = args.pre_box.or(config.pre_box);
    let mut post_box = args.post_box.or(config.post_box);
    let realtime = args.realtime || config.playback.realtime;

    let source = VideoFrameSource::open(&video)?;
    let fps = source.fps();
    let total = source.frame_count();
    let delay = pacing_delay(fps, config.playback.fallback_fps);
    let mut writer = match &args.output {
        Some(path) => Some(open_writer(
            path,
            fps.unwrap_or(config.playback.fallback_fps),
            source.width,
            source.height,
        )?),
        None => None,
    };

    let mut machine = CsrtPhaseMachine::with_opencv(source, config.bridge.clone());
    machine.configure(boundaries)?;
    if let Some(b) = pre_box {
        machine.supply_pre_box(b)?;
    }
    info!("{}", machine.status());

    loop {
        let outcome = machine.run_until_pause(|report, frame| {
            let mut canvas = frame.clone();
            if report.handler == Handler::Bridge {
                visualization::draw_bridge_banner(&mut canvas)?;
            }
            if let Some(r) = report.record {
                visualization::draw_overlay(&mut canvas, r.bbox, r.method)?;
            }
            if let Some(a) = report.advisory {
                visualization::draw_advisory(&mut canvas, a)?;
            }
            visualization::draw_status(&mut canvas, &report.status)?;
            visualization::draw_frame_info(&mut canvas, report.frame_index, total)?;
            if let Some(w) = writer.as_mut() {
                w.write(&canvas)?;
            }
            if realtime {
                thread::sleep(delay);
            }
            Ok(())
        })?;

        match outcome {
            StepOutcome::Paused { phase: Phase::PausedForPreBox, frame_index } => {
                info!("{}", machine.status());
                let Some(b) = prompt_box(
                    &format!("Pre-occlusion box at frame {} (x,y,w,h): ", frame_index),
                    false,
                )?
                else {
                    continue;
                };
                if let Err(e) = machine.supply_pre_box(b) {
                    warn!("{}", e);
                }
            }
            StepOutcome::Paused { phase: Phase::PausedForPostBox, frame_index } => {
                info!("{}", machine.status());
                let b = match post_box.take() {
                    Some(b) => Some(b),
                    None => prompt_box(
                        &format!(
                            "Post-occlusion box at frame {} (x,y,w,h, empty reuses last box): ",
                            frame_index
                        ),
                        true,
                    )?,
                };
                if let Err(e) = machine.supply_post_box(b) {
                    warn!("{}", e);
                }
            }
            StepOutcome::Paused { phase, .. } => bail!("Unexpected pause in phase {:?}", phase),
            StepOutcome::Ended => break,
            StepOutcome::Frame(_) => {}
        }
    }

    info!("{}", machine.status());
    match machine.log().save_csv(&log_path) {
        Ok(()) => info!("Tracking data saved to {}", log_path.display()),
        Err(TrackingError::EmptyLog) => warn!("No tracking data to save"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn run_replay(config: Config, args: ReplayArgs) -> anyhow::Result<()> {
    let video = video_path(args.video.as_ref(), &config)?;
    let log_path = args
        .log
        .clone()
        .or_else(|| config.log_path.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| default_log_path(&video));

    let map = ReplayMap::load_csv(&log_path)?;
    let mut source = VideoFrameSource::open(&video)?;
    let fps = source.fps();
    let delay: Duration = pacing_delay(fps, config.playback.fallback_fps);
    let realtime = args.realtime || config.playback.realtime;
    let mut writer = match &args.output {
        Some(path) => Some(open_writer(
            path,
            fps.unwrap_or(config.playback.fallback_fps),
            source.width,
            source.height,
        )?),
        None => None,
    };

    info!("Replaying {} over {}", log_path.display(), video.display());
    let summary = replay(&mut source, &map, |_, frame, _| {
        if let Some(w) = writer.as_mut() {
            w.write(frame)?;
        }
        if realtime {
            thread::sleep(delay);
        }
        Ok(())
    })?;
    info!(
        "Replay complete: {} frames, {} overlays",
        summary.frames, summary.overlays
    );
    Ok(())
}
