//! Docker client for dockwatch
//!
//! This crate provides the container inventory and the raw multiplexed log
//! streams that the watcher consumes.

mod client;
mod transport;

pub use client::{DEFAULT_SOCKET, DockerClient};
pub use transport::{ByteStream, LogOptions, LogTransport, TransportError};

// Re-export types that are used in our public API
pub use dockwatch_types::{SourceInfo, SourceState};
