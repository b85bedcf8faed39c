//! In-memory transport for supervisor and watcher tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, broadcast, mpsc};

use dockwatch_docker::{ByteStream, LogOptions, LogTransport, TransportError};
use dockwatch_types::{ErrorEvent, SourceInfo, WatchEvent};

pub(crate) type Feed = mpsc::UnboundedSender<Result<Bytes, TransportError>>;

/// Sources and streams are driven by the test. A stream exists for a name
/// only after [`FakeTransport::feed`] registers it; otherwise opening it
/// fails with `SourceNotFound`.
pub(crate) struct FakeTransport {
    available: bool,
    sources: Mutex<Vec<SourceInfo>>,
    streams: Mutex<HashMap<String, mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>>,
    opened: Mutex<Vec<String>>,
    fail_inventory: AtomicBool,
    hold_inventory: AtomicBool,
    inventory_entered: Notify,
    inventory_release: Notify,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            available: true,
            sources: Mutex::new(Vec::new()),
            streams: Mutex::new(HashMap::new()),
            opened: Mutex::new(Vec::new()),
            fail_inventory: AtomicBool::new(false),
            hold_inventory: AtomicBool::new(false),
            inventory_entered: Notify::new(),
            inventory_release: Notify::new(),
        }
    }

    pub(crate) fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    pub(crate) fn set_sources(&self, names: &[&str]) {
        *self.sources.lock() = names
            .iter()
            .enumerate()
            .map(|(i, name)| SourceInfo::new(format!("{:012x}", i), name.to_string()))
            .collect();
    }

    /// Register the next stream for `name` and return its sending half
    pub(crate) fn feed(&self, name: &str) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().insert(name.to_string(), rx);
        tx
    }

    pub(crate) fn fail_inventory(&self, fail: bool) {
        self.fail_inventory.store(fail, Ordering::SeqCst);
    }

    /// Park the next inventory call until [`FakeTransport::release_inventory`]
    pub(crate) fn hold_inventory(&self) {
        self.hold_inventory.store(true, Ordering::SeqCst);
    }

    /// Resolves once a held inventory call is parked
    pub(crate) async fn inventory_entered(&self) {
        self.inventory_entered.notified().await;
    }

    pub(crate) fn release_inventory(&self) {
        self.inventory_release.notify_one();
    }

    /// Names whose streams were requested, in order
    pub(crate) fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl LogTransport for FakeTransport {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn list_sources(&self) -> Result<Vec<SourceInfo>, TransportError> {
        if !self.available {
            return Ok(Vec::new());
        }
        if self.hold_inventory.swap(false, Ordering::SeqCst) {
            self.inventory_entered.notify_one();
            self.inventory_release.notified().await;
        }
        if self.fail_inventory.load(Ordering::SeqCst) {
            return Err(TransportError::Api {
                status: 500,
                message: "daemon busy".to_string(),
            });
        }
        Ok(self.sources.lock().clone())
    }

    async fn stream_logs(
        &self,
        name: &str,
        _options: &LogOptions,
    ) -> Result<ByteStream, TransportError> {
        self.opened.lock().push(name.to_string());
        let rx = self
            .streams
            .lock()
            .remove(name)
            .ok_or_else(|| TransportError::SourceNotFound {
                name: name.to_string(),
            })?;
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed())
    }
}

/// Poll `condition` until it holds, failing after two seconds
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

/// Next error event, skipping line events
pub(crate) async fn next_error(events: &mut broadcast::Receiver<WatchEvent>) -> ErrorEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let WatchEvent::ErrorDetected(event) = events.recv().await.unwrap() {
                return event;
            }
        }
    })
    .await
    .expect("error event in time")
}
