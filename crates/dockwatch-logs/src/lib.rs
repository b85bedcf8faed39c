//! Log processing for dockwatch
//!
//! This crate provides stream demultiplexing, error fingerprinting,
//! deduplication, per-source context and stream supervision.

mod buffer;
mod config;
mod dedup;
mod demux;
mod fingerprint;
mod pipeline;
mod stream;
mod watcher;

#[cfg(test)]
mod testing;

pub use buffer::{ContextRing, DEFAULT_CONTEXT_LINES};
pub use config::WatchConfig;
pub use dedup::{DEFAULT_DEDUP_WINDOW, DedupWindow};
pub use demux::{DEFAULT_MAX_FRAME_BYTES, FrameDemuxer, FramingError, HEADER_LEN, encode_frame};
pub use fingerprint::{Fingerprinter, HASH_LEN, SIGNATURES};
pub use pipeline::{LineOutcome, LinePipeline};
pub use stream::{RefreshReport, StreamError, StreamSupervisor};
pub use watcher::LogWatcher;

// Re-export types used in our public API
pub use dockwatch_types::{
    Channel, DedupRecord, ErrorCategory, ErrorEvent, Fingerprint, Frame, LineEvent, LogLine,
    SubscriptionInfo, SubscriptionState, WatchEvent,
};
