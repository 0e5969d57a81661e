//! Streaming MJPEG-in-AVI (RIFF) writer.
//!
//! The header is written up front with placeholder totals, frames are appended
//! as `00dc` chunks while their (offset, size) pairs are kept in a fixed
//! capacity index, and `close` appends the `idx1` chunk and patches the
//! placeholders. A writer that is never closed leaves a file whose total frame
//! count is zero and which has no index.
//!
//! Layout produced (offsets relative to the `RIFF` tag):
//!
//! ```text
//!   0 RIFF <size> AVI
//!  12 LIST 192 hdrl
//!  24   avih 56 { usec/frame, 0, 0, HASINDEX, total_frames@48, 0, 1, 0, w, h, 0 x4 }
//!  88   LIST 116 strl
//! 100     strh 56 { vids MJPG, 0, 0, 0, 0, 1, fps, 0, length@140, 0, 10000, 0, rect }
//! 164     strf 40 { BITMAPINFOHEADER, 24 bpp, MJPG, w*h*3 }
//! 212 LIST <size> movi
//! 224   00dc <size> <jpeg> [pad] ...
//!     idx1 <n*16> { 00dc, KEYFRAME, offset, size } ...
//! ```

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use log::{debug, info, warn};

use crate::error::AviError;

pub use camrec_shared::DEFAULT_MAX_FRAMES;

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const STREAM_QUALITY: u32 = 10_000;

const AVIH_SIZE: u32 = 56;
const STRH_SIZE: u32 = 56;
const STRF_SIZE: u32 = 40;
const STRL_LIST_SIZE: u32 = 4 + (8 + STRH_SIZE) + (8 + STRF_SIZE);
const HDRL_LIST_SIZE: u32 = 4 + (8 + AVIH_SIZE) + (8 + STRL_LIST_SIZE);

/// Bytes from the `RIFF` tag to the first frame chunk
pub const HEADER_SIZE: u64 = 12 + 8 + HDRL_LIST_SIZE as u64 + 12;

const RIFF_SIZE_OFFSET: u64 = 4;
const TOTAL_FRAMES_OFFSET: u64 = 48;
const STREAM_LENGTH_OFFSET: u64 = 140;

const CHUNK_HEADER_SIZE: u64 = 8;
const INDEX_ENTRY_SIZE: u64 = 16;
const FRAME_CHUNK_TAG: &[u8; 4] = b"00dc";

/// Geometry and rate of the single video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoFormat {
    pub width: u16,
    pub height: u16,
    pub fps: u8,
}

impl VideoFormat {
    pub fn new(width: u16, height: u16, fps: u8) -> Self {
        Self { width, height, fps }
    }

    pub fn validate(&self) -> Result<(), AviError> {
        if self.width == 0 || self.height == 0 {
            return Err(AviError::InvalidArgument("frame dimensions must be non-zero"));
        }
        if self.fps == 0 {
            return Err(AviError::InvalidArgument("frame rate must be non-zero"));
        }
        Ok(())
    }

    pub fn frame_interval_us(&self) -> u32 {
        1_000_000 / u32::from(self.fps)
    }
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    /// Relative to the first byte after the `movi` tag
    offset: u32,
    size: u32,
}

/// Single-owner writer for one MJPEG AVI file
pub struct AviWriter<W: Write + Seek> {
    sink: Option<W>,
    format: VideoFormat,
    base: u64,
    position: u64,
    movi_start: u64,
    index: Vec<IndexEntry>,
    frame_count: u32,
    max_frames: u32,
    total_bytes: u64,
}

impl AviWriter<BufWriter<File>> {
    /// Create `path` and write a provisional header, with room for
    /// [`DEFAULT_MAX_FRAMES`] frames
    pub fn create(
        path: impl AsRef<Path>,
        width: u16,
        height: u16,
        fps: u8,
    ) -> Result<Self, AviError> {
        Self::create_with_capacity(path, VideoFormat::new(width, height, fps), DEFAULT_MAX_FRAMES)
    }

    pub fn create_with_capacity(
        path: impl AsRef<Path>,
        format: VideoFormat,
        max_frames: u32,
    ) -> Result<Self, AviError> {
        let path = path.as_ref();
        let writer = Self::open_with(format, max_frames, || {
            File::create(path).map(BufWriter::new)
        })?;
        info!("AVI file created: {}", path.display());
        Ok(writer)
    }
}

impl<W: Write + Seek> AviWriter<W> {
    /// Reserve the frame index and write the provisional header at the sink's
    /// current position
    pub fn new(sink: W, format: VideoFormat, max_frames: u32) -> Result<Self, AviError> {
        Self::open_with(format, max_frames, || Ok(sink))
    }

    /// Like [`AviWriter::new`], but the sink is only opened once the format
    /// is valid and the index is reserved, so a rejected writer never touches
    /// storage
    pub fn open_with<F>(format: VideoFormat, max_frames: u32, open: F) -> Result<Self, AviError>
    where
        F: FnOnce() -> io::Result<W>,
    {
        format.validate()?;
        if max_frames == 0 {
            return Err(AviError::InvalidArgument("frame capacity must be non-zero"));
        }

        let mut index = Vec::new();
        index
            .try_reserve_exact(max_frames as usize)
            .map_err(|_| AviError::Allocation { frames: max_frames })?;

        let mut sink = open()?;
        let base = sink.stream_position()?;
        write_header(&mut sink, &format)?;
        let movi_start = base + HEADER_SIZE;

        debug!(
            "AVI header written: {}x{} @ {} fps, capacity {} frames",
            format.width, format.height, format.fps, max_frames
        );

        Ok(Self {
            sink: Some(sink),
            format,
            base,
            position: movi_start,
            movi_start,
            index,
            frame_count: 0,
            max_frames,
            total_bytes: 0,
        })
    }

    /// Append one JPEG frame as a `00dc` chunk.
    ///
    /// Nothing is written when the frame is rejected. If the sink fails
    /// part-way through, the writer rewinds to the start of the chunk so the
    /// next frame overwrites it.
    pub fn add_frame(&mut self, data: &[u8]) -> Result<(), AviError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(AviError::InvalidState("frame added to a closed writer"));
        };
        if data.is_empty() {
            return Err(AviError::InvalidArgument("frame is empty"));
        }
        let size = u32::try_from(data.len())
            .map_err(|_| AviError::InvalidArgument("frame larger than 4 GiB"))?;
        if self.frame_count >= self.max_frames {
            return Err(AviError::CapacityExceeded {
                max_frames: self.max_frames,
            });
        }

        let padded = u64::from(size) + u64::from(size & 1);
        let end = self.position + CHUNK_HEADER_SIZE + padded;
        // RIFF payload once this frame and the whole index are written
        let projected = end - self.base + CHUNK_HEADER_SIZE
            + INDEX_ENTRY_SIZE * u64::from(self.frame_count + 1)
            - 8;
        if projected > u64::from(u32::MAX) {
            return Err(AviError::FileTooLarge {
                bytes: projected + 8,
            });
        }
        let offset = (self.position - self.movi_start) as u32;

        if let Err(err) = write_chunk(sink, FRAME_CHUNK_TAG, data) {
            if let Err(seek_err) = sink.seek(SeekFrom::Start(self.position)) {
                warn!("Failed to rewind after partial frame: {}", seek_err);
            }
            return Err(err.into());
        }

        self.position = end;
        self.index.push(IndexEntry { offset, size });
        self.frame_count += 1;
        self.total_bytes += CHUNK_HEADER_SIZE + padded;
        Ok(())
    }

    /// Patch the header totals to describe the frames written so far, then
    /// return to the end of the data.
    ///
    /// No index is present until `close`, so an interrupted file is only
    /// readable by players that scan `movi`.
    pub fn sync_header(&mut self) -> Result<(), AviError> {
        let Some(sink) = self.sink.as_mut() else {
            return Err(AviError::InvalidState("header sync on a closed writer"));
        };

        let riff_size = (self.position - self.base - 8) as u32;
        let movi_size = (self.position - self.movi_start + 4) as u32;
        let patched = patch_totals(
            sink,
            self.base,
            self.movi_start,
            riff_size,
            self.frame_count,
            movi_size,
        );
        let rewound = sink.seek(SeekFrom::Start(self.position)).map(|_| ());
        patched.and(rewound).and_then(|_| sink.flush())?;

        debug!("AVI header synced at {} frames", self.frame_count);
        Ok(())
    }

    /// Append the `idx1` chunk, patch the header placeholders and flush.
    ///
    /// The sink is handed back for the caller to drop (which closes a file).
    /// The writer cannot be used again, whether or not this succeeds.
    pub fn close(&mut self) -> Result<W, AviError> {
        let Some(mut sink) = self.sink.take() else {
            return Err(AviError::InvalidState("writer already closed"));
        };

        let movi_size = (self.position - self.movi_start + 4) as u32;
        let index_bytes = INDEX_ENTRY_SIZE * u64::from(self.frame_count);
        let end = self.position + CHUNK_HEADER_SIZE + index_bytes;
        let riff_size = (end - self.base - 8) as u32;

        let index = std::mem::take(&mut self.index);
        write_index(&mut sink, &index)?;
        drop(index);
        patch_totals(
            &mut sink,
            self.base,
            self.movi_start,
            riff_size,
            self.frame_count,
            movi_size,
        )?;
        sink.flush()?;

        self.position = end;
        info!(
            "AVI file closed, frames: {}, bytes: {}",
            self.frame_count,
            end - self.base
        );
        Ok(sink)
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn max_frames(&self) -> u32 {
        self.max_frames
    }

    /// Chunk bytes written to `movi`, including chunk headers and padding
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }

    /// Absolute sink position of the first frame chunk
    pub fn movi_data_start(&self) -> u64 {
        self.movi_start
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_none()
    }
}

impl<W: Write + Seek> Drop for AviWriter<W> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            warn!(
                "AVI writer dropped without close after {} frames, file left unpatched",
                self.frame_count
            );
        }
    }
}

fn write_header<W: Write>(w: &mut W, format: &VideoFormat) -> io::Result<()> {
    let width = u32::from(format.width);
    let height = u32::from(format.height);

    w.write_all(b"RIFF")?;
    w.write_u32::<LittleEndian>(0)?; // file size, patched on close
    w.write_all(b"AVI ")?;

    w.write_all(b"LIST")?;
    w.write_u32::<LittleEndian>(HDRL_LIST_SIZE)?;
    w.write_all(b"hdrl")?;

    w.write_all(b"avih")?;
    w.write_u32::<LittleEndian>(AVIH_SIZE)?;
    w.write_u32::<LittleEndian>(format.frame_interval_us())?;
    w.write_u32::<LittleEndian>(0)?; // max bytes per second
    w.write_u32::<LittleEndian>(0)?; // padding granularity
    w.write_u32::<LittleEndian>(AVIF_HASINDEX)?;
    w.write_u32::<LittleEndian>(0)?; // total frames, patched on close
    w.write_u32::<LittleEndian>(0)?; // initial frames
    w.write_u32::<LittleEndian>(1)?; // streams
    w.write_u32::<LittleEndian>(0)?; // suggested buffer size
    w.write_u32::<LittleEndian>(width)?;
    w.write_u32::<LittleEndian>(height)?;
    for _ in 0..4 {
        w.write_u32::<LittleEndian>(0)?;
    }

    w.write_all(b"LIST")?;
    w.write_u32::<LittleEndian>(STRL_LIST_SIZE)?;
    w.write_all(b"strl")?;

    w.write_all(b"strh")?;
    w.write_u32::<LittleEndian>(STRH_SIZE)?;
    w.write_all(b"vids")?;
    w.write_all(b"MJPG")?;
    w.write_u32::<LittleEndian>(0)?; // flags
    w.write_u16::<LittleEndian>(0)?; // priority
    w.write_u16::<LittleEndian>(0)?; // language
    w.write_u32::<LittleEndian>(0)?; // initial frames
    w.write_u32::<LittleEndian>(1)?; // scale
    w.write_u32::<LittleEndian>(u32::from(format.fps))?; // rate
    w.write_u32::<LittleEndian>(0)?; // start
    w.write_u32::<LittleEndian>(0)?; // length, patched on close
    w.write_u32::<LittleEndian>(0)?; // suggested buffer size
    w.write_u32::<LittleEndian>(STREAM_QUALITY)?;
    w.write_u32::<LittleEndian>(0)?; // sample size
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(format.width)?;
    w.write_u16::<LittleEndian>(format.height)?;

    w.write_all(b"strf")?;
    w.write_u32::<LittleEndian>(STRF_SIZE)?;
    w.write_u32::<LittleEndian>(STRF_SIZE)?; // biSize
    w.write_u32::<LittleEndian>(width)?;
    w.write_u32::<LittleEndian>(height)?;
    w.write_u16::<LittleEndian>(1)?; // planes
    w.write_u16::<LittleEndian>(24)?; // bit count
    w.write_all(b"MJPG")?;
    // Nominal size only, wraps for very large frames
    w.write_u32::<LittleEndian>(width.wrapping_mul(height).wrapping_mul(3))?;
    for _ in 0..4 {
        w.write_u32::<LittleEndian>(0)?;
    }

    w.write_all(b"LIST")?;
    w.write_u32::<LittleEndian>(0)?; // movi size, patched on close
    w.write_all(b"movi")
}

fn write_chunk<W: Write>(w: &mut W, tag: &[u8; 4], data: &[u8]) -> io::Result<()> {
    let mut header = [0u8; CHUNK_HEADER_SIZE as usize];
    header[..4].copy_from_slice(tag);
    LittleEndian::write_u32(&mut header[4..], data.len() as u32);
    w.write_all(&header)?;
    w.write_all(data)?;
    if data.len() & 1 == 1 {
        w.write_all(&[0])?;
    }
    Ok(())
}

fn write_index<W: Write>(w: &mut W, index: &[IndexEntry]) -> io::Result<()> {
    w.write_all(b"idx1")?;
    w.write_u32::<LittleEndian>((index.len() as u64 * INDEX_ENTRY_SIZE) as u32)?;
    let mut record = [0u8; INDEX_ENTRY_SIZE as usize];
    record[..4].copy_from_slice(FRAME_CHUNK_TAG);
    LittleEndian::write_u32(&mut record[4..8], AVIIF_KEYFRAME);
    for entry in index {
        LittleEndian::write_u32(&mut record[8..12], entry.offset);
        LittleEndian::write_u32(&mut record[12..16], entry.size);
        w.write_all(&record)?;
    }
    Ok(())
}

fn patch_u32<W: Write + Seek>(w: &mut W, at: u64, value: u32) -> io::Result<()> {
    w.seek(SeekFrom::Start(at))?;
    w.write_u32::<LittleEndian>(value)
}

/// Patch order: RIFF size, total frames, stream length, movi size
fn patch_totals<W: Write + Seek>(
    w: &mut W,
    base: u64,
    movi_start: u64,
    riff_size: u32,
    frames: u32,
    movi_size: u32,
) -> io::Result<()> {
    patch_u32(w, base + RIFF_SIZE_OFFSET, riff_size)?;
    patch_u32(w, base + TOTAL_FRAMES_OFFSET, frames)?;
    patch_u32(w, base + STREAM_LENGTH_OFFSET, frames)?;
    patch_u32(w, movi_start - 8, movi_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        LittleEndian::read_u32(&buf[offset..offset + 4])
    }

    fn u16_at(buf: &[u8], offset: usize) -> u16 {
        LittleEndian::read_u16(&buf[offset..offset + 2])
    }

    fn writer(max_frames: u32) -> AviWriter<Cursor<Vec<u8>>> {
        AviWriter::new(Cursor::new(Vec::new()), VideoFormat::new(320, 240, 10), max_frames)
            .unwrap()
    }

    fn frame(len: usize, fill: u8) -> Vec<u8> {
        vec![fill; len]
    }

    #[test]
    fn test_header_constants() {
        assert_eq!(STRL_LIST_SIZE, 116);
        assert_eq!(HDRL_LIST_SIZE, 192);
        assert_eq!(HEADER_SIZE, 224);
    }

    #[test]
    fn test_header_layout() {
        let mut avi = writer(10);
        assert_eq!(avi.movi_data_start(), 224);
        let buf = avi.close().unwrap().into_inner();

        assert_eq!(&buf[0..4], b"RIFF");
        assert_eq!(&buf[8..12], b"AVI ");
        assert_eq!(&buf[12..16], b"LIST");
        assert_eq!(u32_at(&buf, 16), 192);
        assert_eq!(&buf[20..24], b"hdrl");
        assert_eq!(&buf[24..28], b"avih");
        assert_eq!(u32_at(&buf, 28), 56);
        assert_eq!(u32_at(&buf, 32), 100_000);
        assert_eq!(u32_at(&buf, 44), AVIF_HASINDEX);
        assert_eq!(u32_at(&buf, 56), 1);
        assert_eq!(u32_at(&buf, 64), 320);
        assert_eq!(u32_at(&buf, 68), 240);
        assert_eq!(&buf[88..92], b"LIST");
        assert_eq!(u32_at(&buf, 92), 116);
        assert_eq!(&buf[96..100], b"strl");
        assert_eq!(&buf[100..104], b"strh");
        assert_eq!(&buf[108..112], b"vids");
        assert_eq!(&buf[112..116], b"MJPG");
        assert_eq!(u32_at(&buf, 128), 1);
        assert_eq!(u32_at(&buf, 132), 10);
        assert_eq!(u32_at(&buf, 148), STREAM_QUALITY);
        assert_eq!(u16_at(&buf, 160), 320);
        assert_eq!(u16_at(&buf, 162), 240);
        assert_eq!(&buf[164..168], b"strf");
        assert_eq!(u32_at(&buf, 176), 320);
        assert_eq!(u32_at(&buf, 180), 240);
        assert_eq!(u16_at(&buf, 186), 24);
        assert_eq!(&buf[188..192], b"MJPG");
        assert_eq!(u32_at(&buf, 192), 320 * 240 * 3);
        assert_eq!(&buf[212..216], b"LIST");
        assert_eq!(&buf[220..224], b"movi");
    }

    #[test]
    fn test_oversize_geometry_wraps_image_size() {
        let mut avi =
            AviWriter::new(Cursor::new(Vec::new()), VideoFormat::new(40000, 40000, 10), 4)
                .unwrap();
        let buf = avi.close().unwrap().into_inner();

        assert_eq!(u32_at(&buf, 64), 40000);
        assert_eq!(u32_at(&buf, 68), 40000);
        assert_eq!(u32_at(&buf, 192), 40000u32.wrapping_mul(40000).wrapping_mul(3));
        assert_eq!(u32_at(&buf, 4) as usize, buf.len() - 8);
    }

    #[test]
    fn test_rejected_writer_never_opens_sink() {
        let opened = std::cell::Cell::new(0);
        let mut open = || {
            opened.set(opened.get() + 1);
            Ok::<_, io::Error>(Cursor::new(Vec::new()))
        };

        let invalid = AviWriter::open_with(VideoFormat::new(0, 240, 10), 4, &mut open);
        assert!(matches!(invalid, Err(AviError::InvalidArgument(_))));
        let unbounded = AviWriter::open_with(VideoFormat::new(320, 240, 10), 0, &mut open);
        assert!(matches!(unbounded, Err(AviError::InvalidArgument(_))));
        let huge = AviWriter::open_with(VideoFormat::new(320, 240, 10), u32::MAX, &mut open);
        assert!(matches!(huge, Err(AviError::Allocation { frames: u32::MAX })));
        assert_eq!(opened.get(), 0);

        let avi = AviWriter::open_with(VideoFormat::new(320, 240, 10), 4, &mut open).unwrap();
        assert_eq!(avi.movi_data_start(), 224);
        drop(open);
        assert_eq!(opened.get(), 1);
    }

    #[test]
    fn test_empty_recording_totals() {
        for (width, height, fps) in [(1, 1, 1), (240, 240, 10), (1600, 1200, 30)] {
            let mut avi =
                AviWriter::new(Cursor::new(Vec::new()), VideoFormat::new(width, height, fps), 4)
                    .unwrap();
            let buf = avi.close().unwrap().into_inner();

            assert_eq!(buf.len(), 232);
            assert_eq!(u32_at(&buf, 4) as usize, buf.len() - 8);
            assert_eq!(u32_at(&buf, 48), 0);
            assert_eq!(u32_at(&buf, 140), 0);
            assert_eq!(u32_at(&buf, 216), 4);
            assert_eq!(&buf[224..228], b"idx1");
            assert_eq!(u32_at(&buf, 228), 0);
        }
    }

    #[test]
    fn test_index_matches_frames() {
        let sizes = [1000usize, 7, 2, 513, 64];
        let mut avi = writer(10);
        for (i, &size) in sizes.iter().enumerate() {
            avi.add_frame(&frame(size, i as u8 + 1)).unwrap();
        }
        assert_eq!(avi.frame_count(), 5);
        let buf = avi.close().unwrap().into_inner();

        let movi_end = 224 + sizes.iter().map(|s| 8 + s + (s & 1)).sum::<usize>();
        assert_eq!(u32_at(&buf, 216) as usize, movi_end - 224 + 4);
        assert_eq!(&buf[movi_end..movi_end + 4], b"idx1");
        assert_eq!(u32_at(&buf, movi_end + 4), 5 * 16);

        let mut expected_offset = 0u32;
        for (i, &size) in sizes.iter().enumerate() {
            let record = movi_end + 8 + i * 16;
            assert_eq!(&buf[record..record + 4], b"00dc");
            assert_eq!(u32_at(&buf, record + 4), AVIIF_KEYFRAME);
            assert_eq!(u32_at(&buf, record + 8), expected_offset);
            assert_eq!(u32_at(&buf, record + 12) as usize, size);

            let chunk = 224 + expected_offset as usize;
            assert_eq!(&buf[chunk..chunk + 4], b"00dc");
            assert_eq!(u32_at(&buf, chunk + 4) as usize, size);
            assert_eq!(buf[chunk + 8], i as u8 + 1);

            expected_offset += 8 + size as u32 + (size as u32 & 1);
        }
        assert_eq!(u32_at(&buf, 48), 5);
        assert_eq!(u32_at(&buf, 140), 5);
        assert_eq!(u32_at(&buf, 4) as usize, buf.len() - 8);
    }

    #[test]
    fn test_odd_frame_is_padded() {
        let mut avi = writer(4);
        avi.add_frame(&frame(3, 0xAB)).unwrap();
        assert_eq!(avi.total_bytes(), 8 + 4);
        let buf = avi.close().unwrap().into_inner();

        assert_eq!(u32_at(&buf, 228), 3);
        assert_eq!(&buf[232..235], &[0xAB; 3]);
        assert_eq!(buf[235], 0);
        assert_eq!(&buf[236..240], b"idx1");
        assert_eq!(u32_at(&buf, 236 + 8 + 12), 3);
    }

    #[test]
    fn test_capacity_boundary() {
        let mut avi = writer(3);
        for _ in 0..3 {
            avi.add_frame(&frame(10, 1)).unwrap();
        }
        let err = avi.add_frame(&frame(10, 1)).unwrap_err();
        assert!(matches!(err, AviError::CapacityExceeded { max_frames: 3 }));
        assert_eq!(avi.frame_count(), 3);

        let buf = avi.close().unwrap().into_inner();
        assert_eq!(u32_at(&buf, 48), 3);
    }

    #[test]
    fn test_empty_frame_rejected() {
        let mut avi = writer(3);
        let err = avi.add_frame(&[]).unwrap_err();
        assert!(matches!(err, AviError::InvalidArgument(_)));
        assert_eq!(avi.frame_count(), 0);
        avi.close().unwrap();
    }

    #[test]
    fn test_invalid_format_rejected() {
        for format in [
            VideoFormat::new(0, 240, 10),
            VideoFormat::new(240, 0, 10),
            VideoFormat::new(240, 240, 0),
        ] {
            let result = AviWriter::new(Cursor::new(Vec::new()), format, 10);
            assert!(matches!(result, Err(AviError::InvalidArgument(_))));
        }
        let result = AviWriter::new(Cursor::new(Vec::new()), VideoFormat::new(1, 1, 1), 0);
        assert!(matches!(result, Err(AviError::InvalidArgument(_))));
    }

    #[test]
    fn test_double_close_rejected() {
        let mut avi = writer(3);
        avi.add_frame(&frame(4, 1)).unwrap();
        avi.close().unwrap();
        assert!(avi.is_closed());

        assert!(matches!(avi.close(), Err(AviError::InvalidState(_))));
        assert!(matches!(
            avi.add_frame(&frame(4, 1)),
            Err(AviError::InvalidState(_))
        ));
        assert!(matches!(avi.sync_header(), Err(AviError::InvalidState(_))));
        assert_eq!(avi.frame_count(), 1);
    }

    #[test]
    fn test_patches_are_relative_to_start_position() {
        let mut sink = Cursor::new(vec![0xEE; 100]);
        sink.seek(SeekFrom::End(0)).unwrap();
        let mut avi = AviWriter::new(sink, VideoFormat::new(64, 48, 5), 4).unwrap();
        assert_eq!(avi.movi_data_start(), 324);
        avi.add_frame(&frame(6, 2)).unwrap();
        let buf = avi.close().unwrap().into_inner();

        assert_eq!(&buf[..100], &[0xEE; 100][..]);
        let avi_bytes = &buf[100..];
        assert_eq!(&avi_bytes[0..4], b"RIFF");
        assert_eq!(u32_at(avi_bytes, 4) as usize, avi_bytes.len() - 8);
        assert_eq!(u32_at(avi_bytes, 48), 1);
        assert_eq!(u32_at(avi_bytes, 216), 4 + 8 + 6);
    }

    #[test]
    fn test_sync_header_reflects_progress() {
        let mut avi = writer(10);
        avi.add_frame(&frame(10, 1)).unwrap();
        avi.add_frame(&frame(11, 2)).unwrap();
        avi.sync_header().unwrap();

        {
            let buf = avi.sink.as_ref().unwrap().get_ref();
            let data_end = 224 + 18 + 20;
            assert_eq!(buf.len(), data_end);
            assert_eq!(u32_at(buf, 4) as usize, data_end - 8);
            assert_eq!(u32_at(buf, 48), 2);
            assert_eq!(u32_at(buf, 140), 2);
            assert_eq!(u32_at(buf, 216) as usize, data_end - 224 + 4);
        }

        avi.add_frame(&frame(4, 3)).unwrap();
        let buf = avi.close().unwrap().into_inner();
        assert_eq!(u32_at(&buf, 48), 3);
        assert_eq!(u32_at(&buf, 4) as usize, buf.len() - 8);
        assert_eq!(&buf[224 + 18 + 20..224 + 18 + 20 + 4], b"00dc");
    }

    /// Rejects any single write longer than `max_write` once armed
    struct FlakySink {
        inner: Cursor<Vec<u8>>,
        max_write: Option<usize>,
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(max) = self.max_write {
                if buf.len() > max {
                    return Err(io::Error::new(io::ErrorKind::Other, "card removed"));
                }
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakySink {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn test_failed_frame_is_rolled_back() {
        let sink = FlakySink {
            inner: Cursor::new(Vec::new()),
            max_write: None,
        };
        let mut avi = AviWriter::new(sink, VideoFormat::new(8, 8, 1), 4).unwrap();
        avi.add_frame(&frame(10, 1)).unwrap();

        avi.sink.as_mut().unwrap().max_write = Some(100);
        let err = avi.add_frame(&frame(500, 2)).unwrap_err();
        assert!(matches!(err, AviError::Storage(_)));
        assert_eq!(avi.frame_count(), 1);

        avi.add_frame(&frame(20, 3)).unwrap();
        let buf = avi.close().unwrap().inner.into_inner();

        assert_eq!(u32_at(&buf, 48), 2);
        let second = 224 + 18;
        assert_eq!(&buf[second..second + 4], b"00dc");
        assert_eq!(u32_at(&buf, second + 4), 20);
        assert_eq!(buf[second + 8], 3);
        let idx = second + 28;
        assert_eq!(&buf[idx..idx + 4], b"idx1");
        assert_eq!(u32_at(&buf, idx + 8 + 16 + 8), 18);
    }
}
