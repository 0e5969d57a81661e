//! Host-side harness for the recorder: plays the part of the firmware's
//! capture task and record button against files on the local disk.

pub mod capture;
pub mod frames;

pub use capture::{run, CaptureOptions, CaptureReport, StopTrigger};
pub use frames::FrameSource;
