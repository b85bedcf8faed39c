use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer::DEFAULT_CONTEXT_LINES;
use crate::demux::DEFAULT_MAX_FRAME_BYTES;
use dockwatch_docker::LogOptions;

/// Watcher tuning. Every field has a default, so a partial config file is valid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Inventory refresh period
    pub refresh_interval_secs: u64,

    /// Dedup table cleanup period
    pub cleanup_interval_secs: u64,

    /// Suppression window for a repeated fingerprint
    pub dedup_window_secs: u64,

    /// Lines kept per source for incident context
    pub context_lines: usize,

    /// Historical lines replayed when a stream opens
    pub tail_lines: u32,

    /// Largest accepted frame payload
    pub max_frame_bytes: usize,

    /// Broadcast channel capacity
    pub event_capacity: usize,

    /// Our own container, never watched
    pub self_name: String,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 30,
            cleanup_interval_secs: 30 * 60,
            dedup_window_secs: 60 * 60,
            context_lines: DEFAULT_CONTEXT_LINES,
            tail_lines: 50,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            event_capacity: 1024,
            self_name: "dockwatch".to_string(),
        }
    }
}

impl WatchConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }

    pub fn event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    /// Stream request options: both channels, timestamps, tail then follow
    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            tail: Some(self.tail_lines),
            ..LogOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: WatchConfig = toml::from_str(
            r#"
            tail_lines = 200
            self_name = "projects-dashboard"
            "#,
        )
        .unwrap();

        assert_eq!(config.tail_lines, 200);
        assert_eq!(config.self_name, "projects-dashboard");
        assert_eq!(config.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.dedup_window(), Duration::from_secs(3600));
        assert_eq!(config.context_lines, 10);
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let config = WatchConfig {
            refresh_interval_secs: 0,
            cleanup_interval_secs: 0,
            event_capacity: 0,
            ..WatchConfig::default()
        };
        assert_eq!(config.refresh_interval(), Duration::from_secs(1));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(1));
        assert_eq!(config.event_capacity(), 1);
    }

    #[test]
    fn test_log_options_use_tail() {
        let options = WatchConfig::default().log_options();
        assert_eq!(options.tail, Some(50));
        assert!(options.follow && options.stdout && options.stderr && options.timestamps);
    }
}
