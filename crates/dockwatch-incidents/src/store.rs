//! Filesystem incident store.
//!
//! ## Layout
//!
//! ```text
//! {root}/{group}/.workflows/active/docker-error-{hash}-{YYYY-MM-DD}/
//!   metadata.json   incident record, status owned downstream after creation
//!   error-log.txt   triggering line plus context ring snapshot
//! ```
//!
//! Creating the incident directory is the create-if-absent guard.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::sink::{IncidentError, IncidentSink};
use dockwatch_types::{ErrorCategory, Fingerprint, Incident, IncidentStatus, LogLine};

const METADATA_FILE: &str = "metadata.json";
const ERROR_LOG_FILE: &str = "error-log.txt";
const TITLE_MAX_CHARS: usize = 80;
const PHASES: &[&str] = &[
    "analysis",
    "plan",
    "validation",
    "dev",
    "tests",
    "review",
    "commit",
];

#[derive(Serialize)]
struct PhaseState {
    status: &'static str,
}

#[derive(Serialize)]
struct IncidentMetadata<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'a str,
    description: String,
    status: IncidentStatus,
    source: &'static str,
    current_phase: &'static str,
    phases: BTreeMap<&'static str, PhaseState>,
    error_hash: &'a str,
    error_type: ErrorCategory,
    container: &'a str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> IncidentMetadata<'a> {
    fn from_incident(incident: &'a Incident) -> Self {
        Self {
            id: &incident.id,
            kind: "bug",
            title: &incident.title,
            description: format!(
                "Error detected automatically in container logs.\nType: {}\nHash: {}",
                incident.category, incident.hash
            ),
            status: incident.status,
            source: "log-watcher",
            current_phase: "analysis",
            phases: PHASES
                .iter()
                .map(|phase| (*phase, PhaseState { status: "pending" }))
                .collect(),
            error_hash: &incident.hash,
            error_type: incident.category,
            container: &incident.source,
            created_at: incident.created_at,
            updated_at: incident.created_at,
        }
    }
}

/// Identifier of the incident for `hash` on `day`
pub fn incident_id(hash: &str, day: NaiveDate) -> String {
    format!("docker-error-{}-{}", hash, day)
}

/// Short human title: leading timestamp removed, truncated to 80 chars
pub fn incident_title(category: ErrorCategory, line: &str) -> String {
    let trimmed = line.trim();
    let message = match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) if DateTime::parse_from_rfc3339(first).is_ok() => rest.trim_start(),
        _ => trimmed,
    };

    let mut title = format!("[Auto] {}: ", category);
    if message.chars().count() > TITLE_MAX_CHARS {
        title.extend(message.chars().take(TITLE_MAX_CHARS));
        title.push_str("...");
    } else {
        title.push_str(message);
    }
    title
}

/// A path component that cannot escape its parent directory
fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains(['/', '\\', '\0'])
}

/// Filesystem-backed incident sink rooted at the projects directory.
pub struct IncidentStore {
    root: PathBuf,
}

impl IncidentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Base directory accessor.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the incident for `(group, hash, day)`.
    pub fn incident_dir(
        &self,
        group: &str,
        hash: &str,
        day: NaiveDate,
    ) -> Result<PathBuf, IncidentError> {
        if !is_safe_component(group) {
            return Err(IncidentError::InvalidGroup {
                group: group.to_string(),
            });
        }
        Ok(self
            .root
            .join(group)
            .join(".workflows")
            .join("active")
            .join(incident_id(hash, day)))
    }

    /// Write `data` to `path` via a `.tmp` sibling.
    async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), IncidentError> {
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Claim the incident directory. Returns `false` if a completed incident
    /// already holds it. A directory without metadata is a claim whose write
    /// never finished, and is taken over.
    async fn claim(dir: &Path) -> Result<bool, IncidentError> {
        match tokio::fs::create_dir(dir).await {
            Ok(()) => return Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        if tokio::fs::try_exists(dir.join(METADATA_FILE)).await? {
            return Ok(false);
        }

        warn!(dir = %dir.display(), "reclaiming incomplete incident directory");
        tokio::fs::remove_dir_all(dir).await?;
        match tokio::fs::create_dir(dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Write both incident files into a claimed directory.
    async fn write_incident(dir: &Path, incident: &Incident) -> Result<(), IncidentError> {
        let metadata = serde_json::to_string_pretty(&IncidentMetadata::from_incident(incident))?;
        Self::atomic_write(&dir.join(METADATA_FILE), metadata.as_bytes()).await?;
        tokio::fs::write(dir.join(ERROR_LOG_FILE), render_error_log(incident)).await?;
        Ok(())
    }

    /// Create the incident as of `now`. Returns `None` if the incident for
    /// that day already exists. On a failed write the claim is released, so
    /// a later attempt the same day can still record it.
    pub async fn create_at(
        &self,
        group: &str,
        fingerprint: &Fingerprint,
        line: &LogLine,
        context_lines: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<Incident>, IncidentError> {
        let day = now.date_naive();
        let dir = self.incident_dir(group, &fingerprint.hash, day)?;

        if let Some(parent) = dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !Self::claim(&dir).await? {
            debug!(group, hash = %fingerprint.hash, "incident already recorded today");
            return Ok(None);
        }

        let incident = Incident {
            id: incident_id(&fingerprint.hash, day),
            title: incident_title(fingerprint.category, &line.text),
            category: fingerprint.category,
            hash: fingerprint.hash.clone(),
            source: line.source.clone(),
            group: group.to_string(),
            status: IncidentStatus::Detected,
            line: line.text.clone(),
            context_lines: context_lines.to_vec(),
            created_at: now,
        };

        if let Err(e) = Self::write_incident(&dir, &incident).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %cleanup, "failed to release incident claim");
            }
            return Err(e);
        }

        info!(id = %incident.id, group, category = %incident.category, "created incident");
        Ok(Some(incident))
    }

    /// Dismiss the incident for `(group, hash, day)`, keeping every other
    /// field of its metadata intact.
    pub async fn dismiss_on(
        &self,
        group: &str,
        hash: &str,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<bool, IncidentError> {
        if !is_safe_component(hash) {
            return Ok(false);
        }
        let path = self.incident_dir(group, hash, day)?.join(METADATA_FILE);

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let mut metadata: serde_json::Value = serde_json::from_str(&content)?;
        if let Some(obj) = metadata.as_object_mut() {
            obj.insert(
                "status".to_string(),
                IncidentStatus::Dismissed.as_str().into(),
            );
            obj.insert("updated_at".to_string(), serde_json::to_value(now)?);
        }

        let json = serde_json::to_string_pretty(&metadata)?;
        Self::atomic_write(&path, json.as_bytes()).await?;
        info!(group, hash, "dismissed incident");
        Ok(true)
    }
}

fn render_error_log(incident: &Incident) -> String {
    let mut lines = vec![
        format!("Error detected at {}", incident.created_at.to_rfc3339()),
        format!("Type: {}", incident.category),
        format!("Hash: {}", incident.hash),
        format!("Container: {}", incident.source),
        String::new(),
        "--- Error Line ---".to_string(),
        incident.line.clone(),
        String::new(),
        "--- Context (surrounding lines) ---".to_string(),
    ];
    lines.extend(incident.context_lines.iter().cloned());
    lines.push(String::new());
    lines.join("\n")
}

#[async_trait]
impl IncidentSink for IncidentStore {
    async fn create_if_absent(
        &self,
        group: &str,
        fingerprint: &Fingerprint,
        line: &LogLine,
        context_lines: &[String],
    ) -> Result<Option<Incident>, IncidentError> {
        self.create_at(group, fingerprint, line, context_lines, Utc::now())
            .await
    }

    async fn dismiss(&self, group: &str, hash: &str) -> Result<bool, IncidentError> {
        let now = Utc::now();
        self.dismiss_on(group, hash, now.date_naive(), now).await
    }
}
