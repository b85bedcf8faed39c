use std::path::Path;

use anyhow::{Context, Result};

use dockwatch_logs::WatchConfig;

/// Load the watcher config from a TOML file, or defaults when no file is given
pub fn load(path: Option<&Path>) -> Result<WatchConfig> {
    let Some(path) = path else {
        return Ok(WatchConfig::default());
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

/// Command-line flags take precedence over the file
pub fn apply_overrides(config: &mut WatchConfig, tail_lines: Option<u32>, self_name: Option<String>) {
    if let Some(tail_lines) = tail_lines {
        config.tail_lines = tail_lines;
    }
    if let Some(self_name) = self_name {
        config.self_name = self_name;
    }
}
