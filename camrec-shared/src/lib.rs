#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::string::String;
use core::fmt;
use serde::{Deserialize, Serialize};

/// Number of index slots reserved when the settings leave `max_frames` at 0.
/// Five minutes at 10 fps.
pub const DEFAULT_MAX_FRAMES: u32 = 3000;

/// Lifecycle phase of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderPhase {
    Idle,
    Recording,
    StopRequested,
}

impl fmt::Display for RecorderPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderPhase::Idle => "idle",
            RecorderPhase::Recording => "recording",
            RecorderPhase::StopRequested => "stop requested",
        };
        f.write_str(name)
    }
}

/// Video recorder configuration, fixed once the recorder is initialised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    pub width: u16,
    pub height: u16,
    pub fps: u8,
    /// Capacity of the frame index; 0 selects [`DEFAULT_MAX_FRAMES`]
    pub max_frames: u32,
    /// Prepended verbatim to every file name (e.g. a mount point like "/0:/")
    pub save_path: String,
    pub file_prefix: String,
    /// Patch the AVI header every N frames so an interrupted recording stays
    /// readable. 0 disables it.
    pub header_sync_interval: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            width: 240,
            height: 240,
            fps: 10,
            max_frames: DEFAULT_MAX_FRAMES,
            save_path: String::from("/0:/"),
            file_prefix: String::from("vid"),
            header_sync_interval: 0,
        }
    }
}

impl RecorderSettings {
    pub fn effective_max_frames(&self) -> u32 {
        if self.max_frames == 0 {
            DEFAULT_MAX_FRAMES
        } else {
            self.max_frames
        }
    }

    /// File name for the recording with the given index, e.g. `/0:/vid_007.avi`
    pub fn file_name(&self, index: u32) -> String {
        alloc::format!("{}{}_{:03}.avi", self.save_path, self.file_prefix, index)
    }
}

/// Status snapshot reported by the recorder
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecorderStatus {
    pub phase: RecorderPhase,
    pub recording: bool,
    pub stop_requested: bool,
    pub frame_count: u32,
    pub elapsed_ms: u64,
    /// Index the next (or current) recording file is named after
    pub file_index: u32,
}

impl RecorderStatus {
    /// Achieved frame rate over the current recording
    pub fn achieved_fps(&self) -> f32 {
        if self.elapsed_ms == 0 {
            0.0
        } else {
            self.frame_count as f32 / (self.elapsed_ms as f32 / 1000.0)
        }
    }
}
