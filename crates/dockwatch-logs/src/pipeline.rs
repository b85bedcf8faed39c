use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::buffer::ContextRing;
use crate::dedup::DedupWindow;
use crate::fingerprint::Fingerprinter;
use dockwatch_incidents::{IncidentError, IncidentSink};
use dockwatch_types::{
    DedupRecord, ErrorEvent, Fingerprint, Incident, LineEvent, LogLine, WatchEvent,
};

/// What happened to one line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineOutcome {
    /// No error signature matched
    Plain,
    /// Matched, but the fingerprint was dismissed
    Dismissed(Fingerprint),
    /// Matched within the active dedup window
    Duplicate(Fingerprint),
    /// New error. `incident` is `None` when persistence already had one for
    /// today.
    Detected {
        fingerprint: Fingerprint,
        incident: Option<Incident>,
    },
    /// New error whose incident could not be written
    PersistFailed {
        fingerprint: Fingerprint,
        error: String,
    },
}

/// Shared per-line processing: context, publication, classification, dedup
/// and incident creation
pub struct LinePipeline {
    dedup: DedupWindow,

    /// Fingerprint hashes excluded for the lifetime of the process
    dismissed: RwLock<HashSet<String>>,

    /// Detected errors per group
    error_counts: RwLock<HashMap<String, u64>>,

    sink: Arc<dyn IncidentSink>,

    events: broadcast::Sender<WatchEvent>,
}

impl LinePipeline {
    pub fn new(sink: Arc<dyn IncidentSink>, dedup_window: Duration, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            dedup: DedupWindow::new(dedup_window),
            dismissed: RwLock::new(HashSet::new()),
            error_counts: RwLock::new(HashMap::new()),
            sink,
            events,
        }
    }

    /// Run one line of `group` through the pipeline
    pub async fn process(
        &self,
        group: &str,
        line: LogLine,
        context: &Mutex<ContextRing>,
    ) -> LineOutcome {
        context.lock().push(line.text.clone());

        self.publish(WatchEvent::Line(LineEvent {
            source: line.source.clone(),
            group: group.to_string(),
            text: line.text.clone(),
            channel: line.channel,
            timestamp: line.observed_at,
        }));

        let Some(fingerprint) = Fingerprinter::classify(&line.text) else {
            return LineOutcome::Plain;
        };

        if self.dismissed.read().contains(&fingerprint.hash) {
            return LineOutcome::Dismissed(fingerprint);
        }

        if self.dedup.observe(&fingerprint.hash) {
            debug!(source = %line.source, hash = %fingerprint.hash, "duplicate error suppressed");
            return LineOutcome::Duplicate(fingerprint);
        }

        let context_lines = context.lock().snapshot();
        let created = self
            .sink
            .create_if_absent(group, &fingerprint, &line, &context_lines)
            .await;

        *self.error_counts.write().entry(group.to_string()).or_insert(0) += 1;

        info!(
            source = %line.source,
            group,
            category = %fingerprint.category,
            hash = %fingerprint.hash,
            "error detected"
        );
        self.publish(WatchEvent::ErrorDetected(ErrorEvent {
            source: line.source.clone(),
            group: group.to_string(),
            fingerprint: fingerprint.clone(),
            category: fingerprint.category,
            timestamp: Utc::now(),
        }));

        match created {
            Ok(incident) => LineOutcome::Detected {
                fingerprint,
                incident,
            },
            Err(e) => {
                // The dedup entry stands; this error is not retried until it expires
                warn!(
                    source = %line.source,
                    hash = %fingerprint.hash,
                    error = %e,
                    "failed to persist incident"
                );
                LineOutcome::PersistFailed {
                    fingerprint,
                    error: e.to_string(),
                }
            }
        }
    }

    fn publish(&self, event: WatchEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Subscribe to line and error events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.events.subscribe()
    }

    /// Exclude `hash` from incident creation and dismiss today's incident
    pub async fn dismiss(&self, group: &str, hash: &str) -> Result<bool, IncidentError> {
        self.dismissed.write().insert(hash.to_string());
        self.sink.dismiss(group, hash).await
    }

    pub fn is_dismissed(&self, hash: &str) -> bool {
        self.dismissed.read().contains(hash)
    }

    pub fn error_count(&self, group: &str) -> u64 {
        self.error_counts.read().get(group).copied().unwrap_or(0)
    }

    pub fn recent_errors(&self) -> Vec<DedupRecord> {
        self.dedup.recent()
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dockwatch_incidents::IncidentStore;
    use dockwatch_types::{Channel, ErrorCategory};

    fn pipeline(root: &std::path::Path) -> LinePipeline {
        LinePipeline::new(
            Arc::new(IncidentStore::new(root)),
            Duration::from_secs(3600),
            64,
        )
    }

    fn stderr(text: &str) -> LogLine {
        LogLine::new("ticket-api", Channel::Stderr, text)
    }

    #[tokio::test]
    async fn test_connection_refused_creates_incident() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let context = Mutex::new(ContextRing::default());
        let mut events = pipeline.subscribe();

        let outcome = pipeline
            .process(
                "ticket",
                stderr("2024-01-01T00:00:00Z ECONNREFUSED 10.0.0.1:5432"),
                &context,
            )
            .await;

        let LineOutcome::Detected {
            fingerprint,
            incident,
        } = outcome
        else {
            panic!("expected detection, got {outcome:?}");
        };
        assert_eq!(fingerprint.category, ErrorCategory::ConnectionRefused);
        let incident = incident.expect("incident created");
        assert_eq!(incident.category, ErrorCategory::ConnectionRefused);
        assert_eq!(incident.source, "ticket-api");
        assert_eq!(
            incident.context_lines,
            vec!["2024-01-01T00:00:00Z ECONNREFUSED 10.0.0.1:5432"]
        );

        match events.recv().await.unwrap() {
            WatchEvent::Line(line) => {
                assert_eq!(line.channel, Channel::Stderr);
                assert_eq!(line.group, "ticket");
            }
            other => panic!("expected line event, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            WatchEvent::ErrorDetected(err) => {
                assert_eq!(err.category, ErrorCategory::ConnectionRefused);
                assert_eq!(err.source, "ticket-api");
            }
            other => panic!("expected error event, got {other:?}"),
        }
        assert_eq!(pipeline.error_count("ticket"), 1);
    }

    #[tokio::test]
    async fn test_repeat_within_window_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let context = Mutex::new(ContextRing::default());

        let first = pipeline
            .process(
                "ticket",
                stderr("2024-01-01T00:00:00Z ECONNREFUSED 10.0.0.1:5432"),
                &context,
            )
            .await;
        let second = pipeline
            .process(
                "ticket",
                stderr("2024-01-01T00:05:13Z ECONNREFUSED 10.0.0.9:5432"),
                &context,
            )
            .await;

        let LineOutcome::Detected { fingerprint, .. } = first else {
            panic!("expected detection");
        };
        assert_eq!(second, LineOutcome::Duplicate(fingerprint.clone()));
        assert_eq!(pipeline.dedup().stats(&fingerprint.hash).unwrap().count, 2);
        assert_eq!(pipeline.error_count("ticket"), 1);

        let recent = pipeline.recent_errors();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].hash, fingerprint.hash);
    }

    #[tokio::test]
    async fn test_context_snapshot_precedes_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let context = Mutex::new(ContextRing::new(3));

        for text in ["booting", "loading config", "connecting"] {
            assert_eq!(
                pipeline.process("ticket", stderr(text), &context).await,
                LineOutcome::Plain
            );
        }
        let outcome = pipeline
            .process("ticket", stderr("FATAL: config invalid"), &context)
            .await;

        let LineOutcome::Detected { incident, .. } = outcome else {
            panic!("expected detection");
        };
        assert_eq!(
            incident.unwrap().context_lines,
            vec!["loading config", "connecting", "FATAL: config invalid"]
        );
    }

    #[tokio::test]
    async fn test_dismissed_fingerprint_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let context = Mutex::new(ContextRing::default());

        let hash = Fingerprinter::classify("Error: boom").unwrap().hash;
        // Nothing persisted yet, but the hash is still excluded
        assert!(!pipeline.dismiss("ticket", &hash).await.unwrap());
        assert!(pipeline.is_dismissed(&hash));

        let outcome = pipeline
            .process("ticket", stderr("Error: boom"), &context)
            .await;
        assert!(matches!(outcome, LineOutcome::Dismissed(_)));
        assert_eq!(pipeline.error_count("ticket"), 0);
    }

    #[tokio::test]
    async fn test_persisted_incident_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let line = "panic: nil map";

        let before = pipeline(dir.path());
        let context = Mutex::new(ContextRing::default());
        let first = before.process("ticket", stderr(line), &context).await;
        assert!(matches!(
            first,
            LineOutcome::Detected {
                incident: Some(_),
                ..
            }
        ));

        // Fresh in-memory state, same store
        let after = pipeline(dir.path());
        let second = after.process("ticket", stderr(line), &context).await;
        assert!(matches!(
            second,
            LineOutcome::Detected { incident: None, .. }
        ));
        assert_eq!(after.error_count("ticket"), 1);
    }

    struct FailingSink;

    #[async_trait]
    impl IncidentSink for FailingSink {
        async fn create_if_absent(
            &self,
            _group: &str,
            _fingerprint: &Fingerprint,
            _line: &LogLine,
            _context_lines: &[String],
        ) -> Result<Option<Incident>, IncidentError> {
            Err(IncidentError::Io(std::io::Error::other("disk full")))
        }

        async fn dismiss(&self, _group: &str, _hash: &str) -> Result<bool, IncidentError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_write_failure_keeps_dedup_entry() {
        let pipeline = LinePipeline::new(Arc::new(FailingSink), Duration::from_secs(3600), 8);
        let context = Mutex::new(ContextRing::default());

        let first = pipeline
            .process("ticket", stderr("Error: write failed"), &context)
            .await;
        let LineOutcome::PersistFailed { fingerprint, error } = first else {
            panic!("expected a failed creation, got {first:?}");
        };
        assert_eq!(fingerprint.category, ErrorCategory::Error);
        assert!(error.contains("disk full"));
        assert_eq!(pipeline.error_count("ticket"), 1);

        let second = pipeline
            .process("ticket", stderr("Error: write failed"), &context)
            .await;
        assert!(matches!(second, LineOutcome::Duplicate(_)));
    }
}
