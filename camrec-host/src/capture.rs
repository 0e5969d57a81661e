use anyhow::{Context, Result};
use camrec_core::{RecorderSettings, RecorderStatus, RecordingSession, RecordingSummary, StopHandle};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::frames::FrameSource;

/// What presses the "button" that ends the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTrigger {
    /// Press after a fixed time, from a separate thread
    After(Duration),
    /// Press when a line is read from stdin
    Enter,
    /// Request the stop from the capture loop after this many frames
    Frames(u32),
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub stop: StopTrigger,
    /// Sleep between frames to match the configured frame rate
    pub pace: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            stop: StopTrigger::After(Duration::from_secs(10)),
            pace: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub summary: Option<RecordingSummary>,
    pub status: RecorderStatus,
}

/// Background thread that requests the stop, standing in for the button task
struct Button {
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Button {
    fn spawn(trigger: StopTrigger, handle: StopHandle) -> Self {
        match trigger {
            StopTrigger::After(delay) => {
                let (cancel, cancelled) = mpsc::channel::<()>();
                let thread = thread::spawn(move || {
                    if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(delay) {
                        log::info!("Button pressed after {:.1} s", delay.as_secs_f32());
                        handle.request_stop();
                    }
                });
                Self {
                    cancel: Some(cancel),
                    thread: Some(thread),
                }
            }
            StopTrigger::Enter => {
                // Blocks on stdin for as long as it likes, so it is never joined
                thread::spawn(move || {
                    let mut line = String::new();
                    if std::io::stdin().read_line(&mut line).is_ok() {
                        log::info!("Button pressed");
                        handle.request_stop();
                    }
                });
                Self {
                    cancel: None,
                    thread: None,
                }
            }
            StopTrigger::Frames(_) => Self {
                cancel: None,
                thread: None,
            },
        }
    }

    fn release(mut self) {
        drop(self.cancel.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("Button thread panicked");
            }
        }
    }
}

/// Record one file from `source`.
///
/// The calling thread owns the session, exactly as the firmware's capture
/// task does: it adds frames and polls for a stop request, which may come
/// from the button thread or from the session itself when the file is full.
pub fn run(
    settings: RecorderSettings,
    source: &mut FrameSource,
    options: &CaptureOptions,
) -> Result<CaptureReport> {
    let mut session: RecordingSession = RecordingSession::default();
    session
        .init(settings)
        .context("Failed to initialise video recorder")?;
    let fps = session.settings().map(|s| s.fps).unwrap_or(1);
    let interval = Duration::from_secs_f64(1.0 / f64::from(fps));

    session.start().context("Failed to start recording")?;
    let button = Button::spawn(options.stop, session.stop_handle());

    let mut submitted = 0u32;
    let result = loop {
        if session.stop_requested() {
            break session
                .execute_stop()
                .context("Failed to finish recording");
        }

        let tick = Instant::now();
        match session.add_frame(source.next_frame()) {
            Ok(()) => submitted += 1,
            Err(err) if err.is_capacity_exceeded() => {
                log::warn!("{}, stopping", err);
            }
            Err(err) => {
                if let Err(stop_err) = session.execute_stop() {
                    log::error!("Failed to close recording: {}", stop_err);
                }
                break Err(anyhow::Error::new(err).context("Recording aborted"));
            }
        }

        if let StopTrigger::Frames(limit) = options.stop {
            if submitted >= limit {
                session.request_stop();
            }
        }
        if options.pace {
            thread::sleep(interval.saturating_sub(tick.elapsed()));
        }
    };

    button.release();
    let summary = result?;
    if let Some(summary) = &summary {
        log::info!(
            "Saved {} ({} frames, {:.1} s)",
            summary.path,
            summary.frames,
            summary.duration.as_secs_f32()
        );
    }

    Ok(CaptureReport {
        summary,
        status: session.status(),
    })
}
