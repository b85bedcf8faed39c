use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::ContextRing;
use crate::config::WatchConfig;
use crate::demux::{FrameDemuxer, FramingError};
use crate::pipeline::LinePipeline;
use dockwatch_docker::{ByteStream, LogOptions, LogTransport, TransportError};
use dockwatch_types::{LogLine, SourceInfo, SubscriptionInfo, SubscriptionState};

/// Why a subscription's stream stopped abnormally
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Framing(#[from] FramingError),
}

/// Changes applied by one inventory refresh
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
}

impl RefreshReport {
    pub fn is_noop(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

/// One watched source
struct Subscription {
    /// Distinguishes this subscription from a later one for the same name
    id: u64,
    group: String,
    state: SubscriptionState,
    started_at: DateTime<Utc>,
    context: Arc<Mutex<ContextRing>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

type SubscriptionTable = Arc<Mutex<HashMap<String, Subscription>>>;

/// Owns the per-source stream subscriptions and keeps them in line with the
/// runtime inventory
pub struct StreamSupervisor {
    transport: Arc<dyn LogTransport>,
    pipeline: Arc<LinePipeline>,
    subscriptions: SubscriptionTable,
    next_id: AtomicU64,

    /// Parent of every subscription token
    cancel: CancellationToken,

    options: LogOptions,
    self_name: String,
    max_frame_bytes: usize,
    context_lines: usize,
}

impl StreamSupervisor {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        pipeline: Arc<LinePipeline>,
        config: &WatchConfig,
    ) -> Self {
        Self {
            transport,
            pipeline,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            options: config.log_options(),
            self_name: config.self_name.clone(),
            max_frame_bytes: config.max_frame_bytes,
            context_lines: config.context_lines,
        }
    }

    /// Reconcile subscriptions with the current inventory.
    ///
    /// Sources no longer listed are torn down, newly listed ones are started.
    /// Running it again with an unchanged inventory changes nothing. An
    /// inventory failure leaves the current subscriptions alone.
    pub async fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();
        if self.cancel.is_cancelled() {
            return report;
        }

        let sources = match self.transport.list_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "inventory refresh failed");
                return report;
            }
        };

        let listed: HashMap<String, SourceInfo> = sources
            .into_iter()
            .filter(|source| source.name != self.self_name)
            .map(|source| (source.name.clone(), source))
            .collect();

        let mut subscriptions = self.subscriptions.lock();
        // Shut down while the inventory was in flight
        if self.cancel.is_cancelled() {
            return report;
        }

        let gone: Vec<String> = subscriptions
            .keys()
            .filter(|name| !listed.contains_key(*name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(subscription) = subscriptions.remove(&name) {
                subscription.cancel.cancel();
                info!(source = %name, "source gone, stream stopped");
                report.stopped.push(name);
            }
        }

        for (name, source) in listed {
            if subscriptions.contains_key(&name) {
                continue;
            }
            let subscription = self.start(&source);
            info!(source = %name, group = %subscription.group, "watching source");
            subscriptions.insert(name.clone(), subscription);
            report.started.push(name);
        }

        report.started.sort();
        report.stopped.sort();
        report
    }

    fn start(&self, source: &SourceInfo) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let group = source.group();
        let context = Arc::new(Mutex::new(ContextRing::new(self.context_lines)));
        let cancel = self.cancel.child_token();

        let task = StreamTask {
            id,
            source: source.name.clone(),
            group: group.clone(),
            transport: Arc::clone(&self.transport),
            pipeline: Arc::clone(&self.pipeline),
            subscriptions: Arc::clone(&self.subscriptions),
            context: Arc::clone(&context),
            cancel: cancel.clone(),
            options: self.options.clone(),
            max_frame_bytes: self.max_frame_bytes,
        };

        Subscription {
            id,
            group,
            state: SubscriptionState::Starting,
            started_at: Utc::now(),
            context,
            cancel,
            task: Some(tokio::spawn(task.run())),
        }
    }

    /// Current subscriptions, sorted by source name
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(name, subscription)| SubscriptionInfo {
                source: name.clone(),
                group: subscription.group.clone(),
                state: subscription.state,
                started_at: subscription.started_at,
            })
            .collect();
        infos.sort_by(|a, b| a.source.cmp(&b.source));
        infos
    }

    /// Context ring contents of a watched source
    pub fn context_snapshot(&self, source: &str) -> Option<Vec<String>> {
        self.subscriptions
            .lock()
            .get(source)
            .map(|subscription| subscription.context.lock().snapshot())
    }

    pub fn is_watching(&self, source: &str) -> bool {
        self.subscriptions.lock().contains_key(source)
    }

    pub fn active_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Stop every stream. Refreshes after this are no-ops.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let drained: Vec<Subscription> = self
            .subscriptions
            .lock()
            .drain()
            .map(|(_, subscription)| subscription)
            .collect();
        for mut subscription in drained {
            if let Some(task) = subscription.task.take() {
                task.abort();
            }
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// How the pump loop exited without error
enum PumpExit {
    Ended,
    Cancelled,
}

/// State moved into a subscription's task
struct StreamTask {
    id: u64,
    source: String,
    group: String,
    transport: Arc<dyn LogTransport>,
    pipeline: Arc<LinePipeline>,
    subscriptions: SubscriptionTable,
    context: Arc<Mutex<ContextRing>>,
    cancel: CancellationToken,
    options: LogOptions,
    max_frame_bytes: usize,
}

impl StreamTask {
    async fn run(self) {
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.transport.stream_logs(&self.source, &self.options) => result,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                // Not retried until the next refresh
                warn!(source = %self.source, error = %e, "failed to open log stream");
                self.finish(SubscriptionState::Errored);
                return;
            }
        };

        self.set_state(SubscriptionState::Streaming);
        debug!(source = %self.source, "log stream open");

        match self.pump(stream).await {
            Ok(PumpExit::Cancelled) => {}
            Ok(PumpExit::Ended) => {
                info!(source = %self.source, "log stream ended");
                self.finish(SubscriptionState::Ended);
            }
            Err(e) => {
                warn!(source = %self.source, error = %e, "log stream failed");
                self.finish(SubscriptionState::Errored);
            }
        }
    }

    async fn pump(&self, mut stream: ByteStream) -> Result<PumpExit, StreamError> {
        let mut demuxer = FrameDemuxer::new(self.max_frame_bytes);

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(PumpExit::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else {
                return Ok(PumpExit::Ended);
            };
            demuxer.push(&chunk?);

            while let Some(frame) = demuxer.next_frame()? {
                for text in frame.lines() {
                    let line = LogLine::new(self.source.clone(), frame.channel, text);
                    self.pipeline.process(&self.group, line, &self.context).await;
                }
            }
        }
    }

    fn set_state(&self, state: SubscriptionState) {
        if let Some(subscription) = self.subscriptions.lock().get_mut(&self.source) {
            if subscription.id == self.id {
                subscription.state = state;
            }
        }
    }

    /// Drop our subscription so the next refresh can start a new one
    fn finish(&self, state: SubscriptionState) {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions
            .get(&self.source)
            .is_some_and(|subscription| subscription.id == self.id)
        {
            subscriptions.remove(&self.source);
            debug!(source = %self.source, state = state.label(), "subscription removed");
        }
    }
}
