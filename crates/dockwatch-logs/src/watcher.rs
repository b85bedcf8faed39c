use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::WatchConfig;
use crate::pipeline::LinePipeline;
use crate::stream::{RefreshReport, StreamSupervisor};
use dockwatch_docker::LogTransport;
use dockwatch_incidents::{IncidentError, IncidentSink};
use dockwatch_types::{DedupRecord, SubscriptionInfo, WatchEvent};

/// Runtime log watcher: follows every running container, detects error
/// lines and records incidents.
///
/// Two timers drive it once started: the inventory refresh (first run
/// immediately) and the dedup cleanup.
pub struct LogWatcher {
    transport: Arc<dyn LogTransport>,
    pipeline: Arc<LinePipeline>,
    supervisor: Arc<StreamSupervisor>,
    config: WatchConfig,
    cancel: CancellationToken,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl LogWatcher {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        sink: Arc<dyn IncidentSink>,
        config: WatchConfig,
    ) -> Self {
        let pipeline = Arc::new(LinePipeline::new(
            sink,
            config.dedup_window(),
            config.event_capacity(),
        ));
        let supervisor = Arc::new(StreamSupervisor::new(
            Arc::clone(&transport),
            Arc::clone(&pipeline),
            &config,
        ));
        Self {
            transport,
            pipeline,
            supervisor,
            config,
            cancel: CancellationToken::new(),
            timers: Mutex::new(Vec::new()),
        }
    }

    /// Start the refresh and cleanup timers. Does nothing when the runtime
    /// is unreachable, or when already started.
    pub fn start(&self) {
        if !self.transport.is_available() {
            info!("docker socket not available, log watcher disabled");
            return;
        }

        let mut timers = self.timers.lock();
        if !timers.is_empty() || self.cancel.is_cancelled() {
            return;
        }

        timers.push(self.spawn_refresh_timer());
        timers.push(self.spawn_cleanup_timer());
        info!(
            refresh_secs = self.config.refresh_interval().as_secs(),
            "log watcher started"
        );
    }

    fn spawn_refresh_timer(&self) -> JoinHandle<()> {
        let supervisor = Arc::clone(&self.supervisor);
        let cancel = self.cancel.clone();
        let mut interval = tokio::time::interval(self.config.refresh_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = supervisor.refresh().await;
                        if !report.is_noop() {
                            debug!(
                                started = report.started.len(),
                                stopped = report.stopped.len(),
                                "inventory refreshed"
                            );
                        }
                    }
                }
            }
        })
    }

    fn spawn_cleanup_timer(&self) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let cancel = self.cancel.clone();
        let period = self.config.cleanup_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let removed = pipeline.dedup().cleanup();
                        if removed > 0 {
                            debug!(removed, "expired dedup records dropped");
                        }
                    }
                }
            }
        })
    }

    /// Stop both timers and every stream
    pub fn shutdown(&self) {
        self.cancel.cancel();
        for timer in self.timers.lock().drain(..) {
            timer.abort();
        }
        self.supervisor.shutdown();
        info!("log watcher stopped");
    }

    /// Run one inventory refresh now
    pub async fn refresh(&self) -> RefreshReport {
        self.supervisor.refresh().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.pipeline.subscribe()
    }

    pub fn is_available(&self) -> bool {
        self.transport.is_available()
    }

    pub fn is_running(&self) -> bool {
        self.timers.lock().iter().any(|t| !t.is_finished())
    }

    pub fn error_count(&self, group: &str) -> u64 {
        self.pipeline.error_count(group)
    }

    /// Fingerprints seen within the dedup window, most recent first
    pub fn recent_errors(&self) -> Vec<DedupRecord> {
        self.pipeline.recent_errors()
    }

    /// Stop creating incidents for `hash` and mark today's incident
    /// dismissed. Returns whether a persisted incident was updated.
    pub async fn dismiss(&self, group: &str, hash: &str) -> Result<bool, IncidentError> {
        self.pipeline.dismiss(group, hash).await
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.supervisor.subscriptions()
    }

    pub fn context_snapshot(&self, source: &str) -> Option<Vec<String>> {
        self.supervisor.context_snapshot(source)
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
        for timer in self.timers.get_mut().drain(..) {
            timer.abort();
        }
    }
}
