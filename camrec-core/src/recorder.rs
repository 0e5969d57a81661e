//! Record-while-streaming session controller.
//!
//! One task owns the [`RecordingSession`] and is the only caller of `start`,
//! `add_frame` and `execute_stop`. Other contexts (a button callback, a
//! network handler) hold a [`StopHandle`] and may only ask for a stop, which
//! the owner acts on at its next poll.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use camrec_shared::{RecorderPhase, RecorderSettings, RecorderStatus};
use log::{debug, error, info, warn};

use crate::avi::{AviWriter, VideoFormat};
use crate::error::{AviError, RecorderError, SessionOp};
use crate::storage::{FsStorage, Storage};

/// Frames between progress log lines
const PROGRESS_LOG_INTERVAL: u32 = 10;

#[derive(Debug, Default)]
struct Signals {
    recording: AtomicBool,
    stop_requested: AtomicBool,
    frame_count: AtomicU32,
}

impl Signals {
    fn request_stop(&self) -> bool {
        if !self.recording.load(Ordering::Acquire) {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        // The recording may have ended between the check and the store
        if !self.recording.load(Ordering::SeqCst) {
            self.stop_requested.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Stop flag is cleared only after `recording` drops, so a racing
    /// `request_stop` sees the end and withdraws its flag
    fn finish(&self) {
        self.recording.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    fn phase(&self) -> RecorderPhase {
        if !self.recording.load(Ordering::Acquire) {
            RecorderPhase::Idle
        } else if self.stop_requested.load(Ordering::Acquire) {
            RecorderPhase::StopRequested
        } else {
            RecorderPhase::Recording
        }
    }
}

/// Cross-context view of a session: request a stop and read status counters
#[derive(Debug, Clone)]
pub struct StopHandle {
    signals: Arc<Signals>,
}

impl StopHandle {
    /// Never blocks. Returns false (and does nothing) when not recording.
    pub fn request_stop(&self) -> bool {
        self.signals.request_stop()
    }

    pub fn is_recording(&self) -> bool {
        self.signals.recording.load(Ordering::Acquire)
    }

    pub fn stop_requested(&self) -> bool {
        self.signals.stop_requested.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u32 {
        self.signals.frame_count.load(Ordering::Acquire)
    }
}

/// Outcome of a completed recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingSummary {
    pub path: String,
    pub frames: u32,
    pub duration: Duration,
}

pub struct RecordingSession<S: Storage = FsStorage> {
    storage: S,
    settings: Option<RecorderSettings>,
    writer: Option<AviWriter<S::Sink>>,
    signals: Arc<Signals>,
    started_at: Option<Instant>,
    current_path: Option<String>,
    file_index: u32,
}

impl Default for RecordingSession<FsStorage> {
    fn default() -> Self {
        Self::new(FsStorage)
    }
}

impl<S: Storage> RecordingSession<S> {
    /// An unconfigured, idle session. `init` must run before `start`.
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            settings: None,
            writer: None,
            signals: Arc::new(Signals::default()),
            started_at: None,
            current_path: None,
            file_index: 0,
        }
    }

    /// Validate and store the configuration. Only allowed while idle.
    pub fn init(&mut self, mut settings: RecorderSettings) -> Result<(), RecorderError> {
        if self.writer.is_some() {
            return Err(RecorderError::InvalidState(
                "cannot reconfigure while recording",
            ));
        }
        VideoFormat::new(settings.width, settings.height, settings.fps)
            .validate()
            .map_err(|err| match err {
                AviError::InvalidArgument(msg) => RecorderError::InvalidArgument(msg),
                _ => RecorderError::InvalidArgument("invalid video format"),
            })?;
        if settings.file_prefix.is_empty() {
            return Err(RecorderError::InvalidArgument("file prefix is empty"));
        }
        settings.max_frames = settings.effective_max_frames();

        info!(
            "Video recorder initialised: {}x{} @ {}fps, max {} frames",
            settings.width, settings.height, settings.fps, settings.max_frames
        );
        self.settings = Some(settings);
        Ok(())
    }

    /// Open the next file and begin accepting frames. Does nothing if a
    /// recording is already open.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        let Some(settings) = self.settings.as_ref() else {
            error!("Video recorder not initialised");
            return Err(RecorderError::NotConfigured);
        };
        if self.writer.is_some() {
            warn!("Already recording");
            return Ok(());
        }

        self.signals.stop_requested.store(false, Ordering::Release);

        let path = settings.file_name(self.file_index);
        let format = VideoFormat::new(settings.width, settings.height, settings.fps);
        let start_failed = |source: AviError| {
            error!("Failed to create AVI file {}: {}", path, source);
            RecorderError::Writer {
                op: SessionOp::Start,
                phase: RecorderPhase::Idle,
                source,
            }
        };
        let storage = &mut self.storage;
        let writer = AviWriter::open_with(format, settings.max_frames, || storage.create(&path))
            .map_err(start_failed)?;

        info!("Recording started (AVI + MJPEG): {}", path);
        self.writer = Some(writer);
        self.current_path = Some(path);
        self.started_at = Some(Instant::now());
        self.signals.frame_count.store(0, Ordering::Release);
        self.signals.recording.store(true, Ordering::Release);
        Ok(())
    }

    /// Flag the recording for stopping. The writer is untouched and frames
    /// keep being accepted until the owner calls `execute_stop`.
    pub fn request_stop(&self) {
        if self.signals.request_stop() {
            info!("Stop requested");
        }
    }

    /// Handle for other contexts to request a stop and read status
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            signals: Arc::clone(&self.signals),
        }
    }

    /// Close the open recording and return to idle.
    ///
    /// The file index advances even when closing fails, so a damaged file is
    /// never reused. Returns `None` when nothing was recording.
    pub fn execute_stop(&mut self) -> Result<Option<RecordingSummary>, RecorderError> {
        let phase = self.phase();
        let Some(mut writer) = self.writer.take() else {
            debug!("Stop executed while idle");
            self.signals.finish();
            return Ok(None);
        };
        self.signals.recording.store(false, Ordering::SeqCst);

        info!("Closing AVI file...");
        let closed = writer.close();
        let frames = writer.frame_count();
        let duration = self
            .started_at
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let path = self.current_path.take().unwrap_or_default();

        self.file_index = self.file_index.wrapping_add(1);
        self.signals.finish();

        match closed {
            Ok(sink) => {
                drop(sink);
                info!(
                    "Recording stopped: {} frames, {:.1} s",
                    frames,
                    duration.as_secs_f32()
                );
                Ok(Some(RecordingSummary {
                    path,
                    frames,
                    duration,
                }))
            }
            Err(source) => {
                error!("Failed to close {}: {}", path, source);
                Err(RecorderError::Writer {
                    op: SessionOp::Stop,
                    phase,
                    source,
                })
            }
        }
    }

    /// Append a frame to the open recording. Frames arriving while idle are
    /// dropped.
    ///
    /// When the recording is full a stop is requested before the error is
    /// returned.
    pub fn add_frame(&mut self, frame: &[u8]) -> Result<(), RecorderError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if frame.is_empty() {
            return Err(RecorderError::InvalidArgument("frame is empty"));
        }

        if let Err(source) = writer.add_frame(frame) {
            if source.is_capacity_exceeded() {
                warn!("Recording full after {} frames: {}", writer.frame_count(), source);
                self.signals.request_stop();
                return Err(RecorderError::CapacityExceeded {
                    op: SessionOp::AddFrame,
                    source,
                });
            }
            error!("Failed to add video frame: {}", source);
            return Err(RecorderError::Writer {
                op: SessionOp::AddFrame,
                phase: self.signals.phase(),
                source,
            });
        }

        let count = writer.frame_count();
        self.signals.frame_count.store(count, Ordering::Release);

        if count == 1 {
            info!("First frame added, size={}", frame.len());
        }
        if count % PROGRESS_LOG_INTERVAL == 0 {
            let elapsed = self
                .started_at
                .map(|started| started.elapsed().as_secs_f32())
                .unwrap_or_default();
            let fps = if elapsed > 0.0 {
                count as f32 / elapsed
            } else {
                0.0
            };
            info!(
                "Recording: {} frames, {:.1} s, FPS: {:.1}",
                count, elapsed, fps
            );
        }

        let sync_interval = self
            .settings
            .as_ref()
            .map(|settings| settings.header_sync_interval)
            .unwrap_or(0);
        if sync_interval > 0 && count % sync_interval == 0 {
            writer
                .sync_header()
                .map_err(|source| RecorderError::Writer {
                    op: SessionOp::SyncHeader,
                    phase: self.signals.phase(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn phase(&self) -> RecorderPhase {
        if self.writer.is_none() {
            RecorderPhase::Idle
        } else {
            self.signals.phase()
        }
    }

    pub fn is_recording(&self) -> bool {
        self.signals.recording.load(Ordering::Acquire)
    }

    pub fn stop_requested(&self) -> bool {
        self.signals.stop_requested.load(Ordering::Acquire)
    }

    pub fn frame_count(&self) -> u32 {
        self.signals.frame_count.load(Ordering::Acquire)
    }

    /// Index the next recording will be named after
    pub fn file_index(&self) -> u32 {
        self.file_index
    }

    pub fn settings(&self) -> Option<&RecorderSettings> {
        self.settings.as_ref()
    }

    /// Path of the open recording
    pub fn current_path(&self) -> Option<&str> {
        self.current_path.as_deref()
    }

    pub fn status(&self) -> RecorderStatus {
        let elapsed_ms = self
            .started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        RecorderStatus {
            phase: self.phase(),
            recording: self.is_recording(),
            stop_requested: self.stop_requested(),
            frame_count: self.frame_count(),
            elapsed_ms,
            file_index: self.file_index,
        }
    }
}

impl<S: Storage> Drop for RecordingSession<S> {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!("Recording session dropped while recording, finalising file");
            if let Err(err) = self.execute_stop() {
                error!("Failed to finalise recording: {}", err);
            }
        }
    }
}
