//! Sequential frame scanning and tail repair.
//!
//! A store file can end in a torn frame when a process dies halfway through
//! a flush. The scanner walks complete frames from the start of the file and
//! stops at the first one that does not fit, reporting where valid data ends.

use crate::error::StoreError;
use crate::frame::{self, Frame, LEN_WIDTH};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::Path;

/// Iterates the frames of a store file in offset order.
///
/// The file length is sampled once when the scanner is created; bytes
/// appended afterwards are not visited.
pub struct FrameScanner {
    reader: BufReader<File>,
    position: u64,
    file_len: u64,
    failed: bool,
}

impl FrameScanner {
    /// Opens a scanner over the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
            failed: false,
        })
    }

    /// Returns the offset of the next frame to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the file length seen when the scanner was opened.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Reads the length prefix at the current position.
    ///
    /// Returns `Ok(None)` at a clean end of file and `CorruptFrame` when the
    /// remaining bytes cannot hold the prefix or the payload it declares.
    fn read_header(&mut self) -> Result<Option<u64>, StoreError> {
        let remaining = self.file_len.saturating_sub(self.position);
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < LEN_WIDTH as u64 {
            return Err(StoreError::CorruptFrame {
                offset: self.position,
                declared: LEN_WIDTH as u64,
                available: remaining,
            });
        }

        let mut header = [0u8; LEN_WIDTH];
        self.reader.read_exact(&mut header)?;
        let declared = frame::decode_len(header);

        let available = remaining - LEN_WIDTH as u64;
        if declared > available {
            return Err(StoreError::CorruptFrame {
                offset: self.position,
                declared,
                available,
            });
        }
        Ok(Some(declared))
    }

    /// Returns the offset and payload length of the next frame, skipping
    /// over the payload bytes.
    pub fn next_header(&mut self) -> Result<Option<(u64, u64)>, StoreError> {
        let offset = self.position;
        let Some(len) = self.read_header()? else {
            return Ok(None);
        };
        self.reader.seek_relative(len as i64)?;
        self.position += LEN_WIDTH as u64 + len;
        Ok(Some((offset, len)))
    }

    /// Returns the next complete frame.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StoreError> {
        let offset = self.position;
        let Some(len) = self.read_header()? else {
            return Ok(None);
        };
        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;
        self.position += LEN_WIDTH as u64 + len;
        Ok(Some(Frame { offset, payload }))
    }
}

impl Iterator for FrameScanner {
    type Item = Result<Frame, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Frame boundaries of a store file.
#[derive(Debug)]
pub(crate) struct FrameLayout {
    /// Start offset of every complete frame.
    pub starts: Vec<u64>,
    /// End of the last complete frame.
    pub valid_len: u64,
    /// Length of the file on disk.
    pub file_len: u64,
    /// The error that stopped the scan, if the file ends in a torn frame.
    pub torn: Option<StoreError>,
}

/// Collects the frame boundaries of the file at `path` without reading payloads.
pub(crate) fn frame_layout(path: &Path) -> Result<FrameLayout, StoreError> {
    let mut scanner = FrameScanner::open(path)?;
    let mut starts = Vec::new();

    let torn = loop {
        match scanner.next_header() {
            Ok(Some((offset, _))) => starts.push(offset),
            Ok(None) => break None,
            Err(e @ StoreError::CorruptFrame { .. }) => break Some(e),
            Err(e) => return Err(e),
        }
    };

    Ok(FrameLayout {
        starts,
        valid_len: scanner.position(),
        file_len: scanner.file_len(),
        torn,
    })
}

/// Result of scanning a store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Number of complete frames.
    pub frames: u64,
    /// Sum of payload lengths of complete frames.
    pub payload_bytes: u64,
    /// End of the last complete frame.
    pub valid_len: u64,
    /// File length before any repair.
    pub file_len: u64,
    /// Bytes past the last complete frame.
    pub bytes_truncated: u64,
    /// Whether the torn tail was cut off.
    pub repaired: bool,
}

impl ScanReport {
    /// Returns whether the file consists of complete frames only.
    pub fn is_clean(&self) -> bool {
        self.bytes_truncated == 0
    }
}

/// Scans the store file at `path`, optionally truncating a torn tail.
pub fn scan_report(path: impl AsRef<Path>, repair: bool) -> Result<ScanReport, StoreError> {
    let path = path.as_ref();
    let layout = frame_layout(path)?;

    let frames = layout.starts.len() as u64;
    let bytes_truncated = layout.file_len - layout.valid_len;
    let mut report = ScanReport {
        frames,
        payload_bytes: layout.valid_len - frames * LEN_WIDTH as u64,
        valid_len: layout.valid_len,
        file_len: layout.file_len,
        bytes_truncated,
        repaired: false,
    };

    if repair && bytes_truncated > 0 {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(layout.valid_len)?;
        file.sync_all()?;
        report.repaired = true;
        tracing::warn!(
            "Truncated store {} at offset {} (removed {} bytes)",
            path.display(),
            layout.valid_len,
            bytes_truncated
        );
    }

    Ok(report)
}

/// Verifies store integrity without modifying anything.
pub fn verify_store(path: impl AsRef<Path>) -> Result<ScanReport, StoreError> {
    scan_report(path, false)
}

/// Repairs a store file by truncating a torn tail.
pub fn repair_store(path: impl AsRef<Path>) -> Result<ScanReport, StoreError> {
    scan_report(path, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_frames(path: &Path, payloads: &[&[u8]]) {
        let mut buf = BytesMut::new();
        for payload in payloads {
            frame::encode_into(&mut buf, payload);
        }
        std::fs::write(path, &buf).unwrap();
    }

    fn append_raw(path: &Path, bytes: &[u8]) {
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        file.write_all(bytes).unwrap();
    }

    #[test]
    fn test_scan_frames_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        write_frames(&path, &[b"hello", b"", b"!"]);

        let frames: Vec<Frame> = FrameScanner::open(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].offset, 0);
        assert_eq!(frames[0].payload, b"hello");
        assert_eq!(frames[1].offset, 13);
        assert!(frames[1].payload.is_empty());
        assert_eq!(frames[2].offset, 21);
        assert_eq!(frames[2].payload, b"!");
    }

    #[test]
    fn test_scan_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        std::fs::write(&path, b"").unwrap();

        assert_eq!(FrameScanner::open(&path).unwrap().count(), 0);
        let report = verify_store(&path).unwrap();
        assert_eq!(report.frames, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_scan_stops_at_torn_payload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        write_frames(&path, &[b"hello"]);
        // Prefix promises 100 bytes, only 3 follow.
        append_raw(&path, &100u64.to_be_bytes());
        append_raw(&path, b"abc");

        let mut scanner = FrameScanner::open(&path).unwrap();
        assert_eq!(scanner.next().unwrap().unwrap().payload, b"hello");
        match scanner.next() {
            Some(Err(StoreError::CorruptFrame {
                offset,
                declared,
                available,
            })) => {
                assert_eq!(offset, 13);
                assert_eq!(declared, 100);
                assert_eq!(available, 3);
            }
            other => panic!("expected corrupt frame, got {:?}", other),
        }
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_layout_with_torn_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        write_frames(&path, &[b"a", b"bc"]);
        append_raw(&path, &[0, 0, 0]);

        let layout = frame_layout(&path).unwrap();
        assert_eq!(layout.starts, vec![0, 9]);
        assert_eq!(layout.valid_len, 19);
        assert_eq!(layout.file_len, 22);
        assert!(matches!(
            layout.torn,
            Some(StoreError::CorruptFrame { offset: 19, .. })
        ));
    }

    #[test]
    fn test_verify_then_repair() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        write_frames(&path, &[b"one", b"two", b"three"]);
        append_raw(&path, &[0, 0, 0, 0, 0, 0, 0, 9, b'x']);

        let report = verify_store(&path).unwrap();
        assert_eq!(report.frames, 3);
        assert_eq!(report.payload_bytes, 11);
        assert_eq!(report.valid_len, 35);
        assert_eq!(report.bytes_truncated, 9);
        assert!(!report.repaired);
        // Verify does not touch the file.
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 44);

        let report = repair_store(&path).unwrap();
        assert!(report.repaired);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 35);

        let report = verify_store(&path).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.frames, 3);
    }

    #[test]
    fn test_next_header_skips_payloads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store");
        write_frames(&path, &[&[7u8; 1000], b"x"]);

        let mut scanner = FrameScanner::open(&path).unwrap();
        assert_eq!(scanner.next_header().unwrap(), Some((0, 1000)));
        assert_eq!(scanner.next_header().unwrap(), Some((1008, 1)));
        assert_eq!(scanner.next_header().unwrap(), None);
        assert_eq!(scanner.position(), 1017);
    }
}
