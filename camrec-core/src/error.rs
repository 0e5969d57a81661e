//! Error types for the container writer and the recording session

use std::fmt;
use std::io;

use camrec_shared::RecorderPhase;
use thiserror::Error;

/// Errors raised by [`crate::avi::AviWriter`]
#[derive(Error, Debug)]
pub enum AviError {
    /// The frame index could not be reserved
    #[error("Failed to allocate index for {frames} frames")]
    Allocation { frames: u32 },

    /// Opening, writing or seeking the sink failed
    #[error("Storage error: {0}")]
    Storage(#[from] io::Error),

    /// Every index slot is used; the recording has to be stopped
    #[error("Frame index full ({max_frames} frames)")]
    CapacityExceeded { max_frames: u32 },

    /// Accepting the frame would push the RIFF size past 32 bits
    #[error("AVI file would exceed 4 GiB ({bytes} bytes)")]
    FileTooLarge { bytes: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

impl AviError {
    /// True for the conditions that call for a clean stop rather than an abort
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(
            self,
            AviError::CapacityExceeded { .. } | AviError::FileTooLarge { .. }
        )
    }
}

/// Session operation in progress when an error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOp {
    Start,
    AddFrame,
    SyncHeader,
    Stop,
}

impl fmt::Display for SessionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionOp::Start => "start",
            SessionOp::AddFrame => "add_frame",
            SessionOp::SyncHeader => "sync_header",
            SessionOp::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Errors raised by [`crate::recorder::RecordingSession`]
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Recorder has not been initialised")]
    NotConfigured,

    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The recording is full. A stop has already been requested.
    #[error("Recording full during {op}: {source}")]
    CapacityExceeded {
        op: SessionOp,
        #[source]
        source: AviError,
    },

    #[error("Writer failed during {op} while {phase}: {source}")]
    Writer {
        op: SessionOp,
        phase: RecorderPhase,
        #[source]
        source: AviError,
    },
}

impl RecorderError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, RecorderError::CapacityExceeded { .. })
    }
}
