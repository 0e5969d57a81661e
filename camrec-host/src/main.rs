use anyhow::{Context, Result};
use camrec_host::{CaptureOptions, FrameSource, StopTrigger};
use camrec_shared::RecorderSettings;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Record JPEG frames into an MJPEG AVI file", long_about = None)]
struct Args {
    /// Directory of JPEG frames to record (played in a loop)
    #[arg(short, long)]
    frames: PathBuf,

    /// Prefix for output file names, e.g. "./clips/" gives ./clips/vid_000.avi
    #[arg(short, long)]
    output: Option<String>,

    /// JSON file with recorder settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    width: Option<u16>,

    #[arg(long)]
    height: Option<u16>,

    #[arg(long)]
    fps: Option<u8>,

    /// Frame index capacity (recording stops when full)
    #[arg(long)]
    max_frames: Option<u32>,

    /// Patch the AVI header every N frames
    #[arg(long)]
    sync_every: Option<u32>,

    /// Press the record button after this many seconds
    #[arg(short, long, conflicts_with = "count")]
    duration: Option<f64>,

    /// Stop after this many frames
    #[arg(short = 'n', long)]
    count: Option<u32>,

    /// Feed frames as fast as possible instead of at the configured rate
    #[arg(long)]
    no_pace: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn settings(&self) -> Result<RecorderSettings> {
        let mut settings = match &self.config {
            Some(path) => load_settings(path)?,
            None => RecorderSettings {
                save_path: String::from("./"),
                ..Default::default()
            },
        };
        if let Some(output) = &self.output {
            settings.save_path = output.clone();
        }
        if let Some(width) = self.width {
            settings.width = width;
        }
        if let Some(height) = self.height {
            settings.height = height;
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if let Some(max_frames) = self.max_frames {
            settings.max_frames = max_frames;
        }
        if let Some(interval) = self.sync_every {
            settings.header_sync_interval = interval;
        }
        Ok(settings)
    }

    fn stop_trigger(&self) -> Result<StopTrigger> {
        Ok(match (self.duration, self.count) {
            (Some(secs), _) => {
                let delay = Duration::try_from_secs_f64(secs.max(0.0))
                    .with_context(|| format!("Invalid duration {secs}"))?;
                StopTrigger::After(delay)
            }
            (None, Some(count)) => StopTrigger::Frames(count),
            (None, None) => StopTrigger::Enter,
        })
    }
}

fn load_settings(path: &Path) -> Result<RecorderSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    if args.debug {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    let settings = args.settings()?;
    let options = CaptureOptions {
        stop: args.stop_trigger()?,
        pace: !args.no_pace,
    };

    log::info!("Recorder starting...");
    log::info!("Frames: {}", args.frames.display());
    log::info!("Output: {}", settings.save_path);
    if options.stop == StopTrigger::Enter {
        log::info!("Press Enter to stop recording");
    }

    let mut source = FrameSource::from_dir(&args.frames)?;
    let report = camrec_host::run(settings, &mut source, &options).context("Recorder error")?;

    println!("{}", serde_json::to_string_pretty(&report.status)?);
    Ok(())
}
