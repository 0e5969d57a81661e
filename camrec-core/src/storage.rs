use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};

/// Factory for the seekable sinks recordings are written to
pub trait Storage {
    type Sink: Write + Seek;

    /// Create (or truncate) the file at `path` for binary writing
    fn create(&mut self, path: &str) -> io::Result<Self::Sink>;
}

/// Files on the local filesystem (or a mounted SD card)
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    type Sink = BufWriter<File>;

    fn create(&mut self, path: &str) -> io::Result<Self::Sink> {
        File::create(path).map(BufWriter::new)
    }
}
