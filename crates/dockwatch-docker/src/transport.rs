use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use dockwatch_types::SourceInfo;

/// Raw multiplexed log bytes, chunked arbitrarily by the transport
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Errors from the container runtime
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("docker socket unavailable at {path}")]
    Unavailable { path: String },

    #[error("container not found: {name}")]
    SourceNotFound { name: String },

    #[error("docker API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Options for a log stream request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogOptions {
    /// Number of historical lines to replay before following
    pub tail: Option<u32>,
    pub stdout: bool,
    pub stderr: bool,
    pub timestamps: bool,
    pub follow: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            tail: Some(50),
            stdout: true,
            stderr: true,
            timestamps: true,
            follow: true,
        }
    }
}

impl LogOptions {
    /// Query string for the Engine API logs endpoint
    pub fn to_query(&self) -> String {
        let flag = |b: bool| if b { "1" } else { "0" };
        let mut query = format!(
            "follow={}&stdout={}&stderr={}&timestamps={}",
            flag(self.follow),
            flag(self.stdout),
            flag(self.stderr),
            flag(self.timestamps),
        );
        match self.tail {
            Some(n) => query.push_str(&format!("&tail={}", n)),
            None => query.push_str("&tail=all"),
        }
        query
    }
}

/// Source of container inventory and log streams
#[async_trait]
pub trait LogTransport: Send + Sync + 'static {
    /// Whether the runtime was reachable when the transport was created
    fn is_available(&self) -> bool;

    /// List the currently running sources
    async fn list_sources(&self) -> Result<Vec<SourceInfo>, TransportError>;

    /// Open a multiplexed log stream for a source by name.
    /// Dropping the returned stream closes it.
    async fn stream_logs(&self, name: &str, opts: &LogOptions)
    -> Result<ByteStream, TransportError>;
}
