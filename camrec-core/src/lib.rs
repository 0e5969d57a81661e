//! MJPEG-in-AVI recording for camera firmware.
//!
//! [`avi::AviWriter`] produces a single-stream motion-JPEG AVI file with a
//! bounded in-memory frame index. [`recorder::RecordingSession`] layers the
//! idle / recording / stop-requested lifecycle on top of it, with a
//! [`recorder::StopHandle`] that other contexts use to ask for a stop.

pub mod avi;
pub mod error;
pub mod recorder;
pub mod storage;

pub use avi::{AviWriter, VideoFormat, DEFAULT_MAX_FRAMES};
pub use camrec_shared::{RecorderPhase, RecorderSettings, RecorderStatus};
pub use error::{AviError, RecorderError, SessionOp};
pub use recorder::{RecordingSession, RecordingSummary, StopHandle};
pub use storage::{FsStorage, Storage};
