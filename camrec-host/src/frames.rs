use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Stand-in for the camera capture pipeline: JPEG files from a directory,
/// served round-robin
pub struct FrameSource {
    frames: Vec<Vec<u8>>,
    next: usize,
}

impl FrameSource {
    /// Load every `*.jpg` / `*.jpeg` in `dir`, in file name order
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let data =
                fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            if data.is_empty() {
                log::warn!("Skipping empty frame file {}", path.display());
                continue;
            }
            if !data.starts_with(&JPEG_SOI) {
                log::warn!("{} does not start with a JPEG marker", path.display());
            }
            frames.push(data);
        }

        Self::from_frames(frames)
            .with_context(|| format!("No JPEG frames found in {}", dir.display()))
    }

    pub fn from_frames(mut frames: Vec<Vec<u8>>) -> Result<Self> {
        frames.retain(|frame| !frame.is_empty());
        if frames.is_empty() {
            bail!("frame source is empty");
        }
        log::info!("Loaded {} frames", frames.len());
        Ok(Self { frames, next: 0 })
    }

    /// Next frame, wrapping around at the end
    pub fn next_frame(&mut self) -> &[u8] {
        let index = self.next;
        self.next = (self.next + 1) % self.frames.len();
        &self.frames[index]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
