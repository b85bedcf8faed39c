//! Shared types for dockwatch
//!
//! This crate contains data structures used across multiple dockwatch crates.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Source Types
// ============================================================================

/// Service-type suffixes stripped from a container name to find its group
pub const KNOWN_SUFFIXES: &[&str] = &["api", "front", "landing", "db", "redis", "worker", "nginx"];

/// A log-producing container as reported by the inventory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceInfo {
    /// Short container id (12 chars)
    pub id: String,
    /// Unique container name, without the leading '/'
    pub name: String,
    pub image: String,
    pub state: SourceState,
    /// Human readable status from the runtime ("Up 3 hours")
    pub status: String,
    /// Creation time as a unix timestamp
    pub created_at: i64,
}

impl SourceInfo {
    pub fn new(id: String, name: String) -> Self {
        Self {
            id,
            name,
            image: String::new(),
            state: SourceState::Running,
            status: String::new(),
            created_at: 0,
        }
    }

    /// Group (project) this source belongs to
    pub fn group(&self) -> String {
        derive_group(&self.name)
    }
}

/// Derive the owning group from a container name.
///
/// `ticket-api` and `ticket-front` both belong to `ticket`; a name without a
/// known suffix is its own group.
pub fn derive_group(name: &str) -> String {
    if let Some((prefix, suffix)) = name.rsplit_once('-') {
        if !prefix.is_empty() && KNOWN_SUFFIXES.contains(&suffix) {
            return prefix.to_string();
        }
    }
    name.to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SourceState {
    Created,
    #[default]
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Unknown,
}

impl From<&str> for SourceState {
    fn from(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            _ => Self::Unknown,
        }
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Output channel of a multiplexed frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Stdout,
    Stderr,
}

impl Channel {
    /// Map a frame header selector byte to a channel.
    /// Anything other than 2 is treated as stdout.
    pub fn from_selector(selector: u8) -> Self {
        match selector {
            2 => Self::Stderr,
            _ => Self::Stdout,
        }
    }

    pub fn is_stderr(&self) -> bool {
        matches!(self, Self::Stderr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// One demultiplexed protocol unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: Channel, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// Split the payload into lines, trimming trailing whitespace and
    /// dropping lines that end up empty
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.payload)
            .split('\n')
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// A single line of output attributed to a source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub text: String,
    pub channel: Channel,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

impl LogLine {
    pub fn new(source: impl Into<String>, channel: Channel, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            channel,
            source: source.into(),
            observed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Error Detection Types
// ============================================================================

/// Category assigned by the first matching error signature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[serde(rename = "http_5xx")]
    Http5xx,
    Panic,
    Fatal,
    Oom,
    Signal,
    UnhandledRejection,
    ConnectionRefused,
    TypedException,
    StackTrace,
    ErrorLog,
    Error,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http5xx => "http_5xx",
            Self::Panic => "panic",
            Self::Fatal => "fatal",
            Self::Oom => "oom",
            Self::Signal => "signal",
            Self::UnhandledRejection => "unhandled_rejection",
            Self::ConnectionRefused => "connection_refused",
            Self::TypedException => "typed_exception",
            Self::StackTrace => "stack_trace",
            Self::ErrorLog => "error_log",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of "the same error" independent of volatile details
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Truncated content hash of the normalized text
    pub hash: String,
    pub category: ErrorCategory,
    pub normalized: String,
}

/// Dedup bookkeeping for one fingerprint hash
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DedupRecord {
    pub hash: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ============================================================================
// Incident Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Detected,
    Dismissed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Dismissed => "dismissed",
        }
    }
}

/// A durable record of one newly detected, non-duplicate error
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Incident {
    /// `docker-error-<hash>-<YYYY-MM-DD>`, stable for the day
    pub id: String,
    pub title: String,
    pub category: ErrorCategory,
    pub hash: String,
    pub source: String,
    pub group: String,
    pub status: IncidentStatus,
    /// The line that triggered detection
    pub line: String,
    /// Context ring snapshot at detection time, oldest first
    pub context_lines: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Subscription Types
// ============================================================================

/// Lifecycle of a per-source stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    #[default]
    Unwatched,
    Starting,
    Streaming,
    Ended,
    Errored,
}

impl SubscriptionState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unwatched => "unwatched",
            Self::Starting => "starting",
            Self::Streaming => "streaming",
            Self::Ended => "ended",
            Self::Errored => "errored",
        }
    }
}

/// Snapshot of one subscription for the control surface
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub source: String,
    pub group: String,
    pub state: SubscriptionState,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Event Types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LineEvent {
    pub source: String,
    pub group: String,
    pub text: String,
    pub channel: Channel,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ErrorEvent {
    pub source: String,
    pub group: String,
    pub fingerprint: Fingerprint,
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
}

/// Events broadcast to listeners of the watcher
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Line(LineEvent),
    ErrorDetected(ErrorEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_group_strips_known_suffix() {
        assert_eq!(derive_group("ticket-api"), "ticket");
        assert_eq!(derive_group("byewait-landing"), "byewait");
        assert_eq!(derive_group("my-shop-worker"), "my-shop");
    }

    #[test]
    fn test_derive_group_keeps_unknown_names() {
        assert_eq!(derive_group("projects-dashboard"), "projects-dashboard");
        assert_eq!(derive_group("postgres"), "postgres");
        assert_eq!(derive_group("-api"), "-api");
    }

    #[test]
    fn test_channel_selector_is_permissive() {
        assert_eq!(Channel::from_selector(1), Channel::Stdout);
        assert_eq!(Channel::from_selector(2), Channel::Stderr);
        assert_eq!(Channel::from_selector(0), Channel::Stdout);
        assert_eq!(Channel::from_selector(7), Channel::Stdout);
    }

    #[test]
    fn test_frame_lines_drop_blank() {
        let frame = Frame::new(Channel::Stdout, &b"first\r\n  \nsecond  \n\n"[..]);
        assert_eq!(frame.lines(), vec!["first", "second"]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WatchEvent::Line(LineEvent {
            source: "ticket-api".to_string(),
            group: "ticket".to_string(),
            text: "hello".to_string(),
            channel: Channel::Stderr,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "line");
        assert_eq!(json["channel"], "stderr");
    }

    #[test]
    fn test_category_names() {
        assert_eq!(ErrorCategory::Http5xx.as_str(), "http_5xx");
        assert_eq!(
            serde_json::to_value(ErrorCategory::ConnectionRefused).unwrap(),
            "connection_refused"
        );
        assert_eq!(
            serde_json::to_value(ErrorCategory::Http5xx).unwrap(),
            "http_5xx"
        );
    }
}
