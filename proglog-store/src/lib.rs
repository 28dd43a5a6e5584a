//! # proglog-store
//!
//! Record store for proglog.
//!
//! This crate provides the storage primitive under a commit log:
//! - Length-prefixed framing of opaque records
//! - Buffered appends with a configurable flush policy
//! - Byte-offset addressed reads with frame boundary validation
//! - Recovery from torn writes at the tail of the file

pub mod config;
pub mod error;
pub mod frame;
pub mod scan;
pub mod store;

pub use config::{FlushPolicy, StoreConfig, TailRecovery};
pub use error::StoreError;
pub use frame::{Frame, LEN_WIDTH};
pub use scan::{repair_store, scan_report, verify_store, FrameScanner, ScanReport};
pub use store::{Store, StoreStats};

/// Default write buffer threshold (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
