use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, BodyStream, Empty};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::net::UnixStream;
use tracing::{debug, warn};

use crate::transport::{ByteStream, LogOptions, LogTransport, TransportError};
use dockwatch_types::{SourceInfo, SourceState};

/// Default location of the Docker Engine socket
pub const DEFAULT_SOCKET: &str = "/var/run/docker.sock";

/// Docker Engine API client talking HTTP/1.1 over the unix socket
pub struct DockerClient {
    socket_path: PathBuf,
    available: bool,
}

/// Entry of `GET /containers/json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created: i64,
}

impl ContainerSummary {
    fn into_info(self) -> SourceInfo {
        let id: String = self.id.chars().take(12).collect();
        let name = self
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| id.clone());

        let mut info = SourceInfo::new(id, name);
        info.image = self.image;
        info.state = SourceState::from(self.state.as_str());
        info.status = self.status;
        info.created_at = self.created;
        info
    }
}

/// Error body returned by the Engine API
#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

impl DockerClient {
    /// Create a client for the given socket. A missing socket leaves the
    /// client in degraded mode: inventory is empty and streams fail.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        let socket_path = socket_path.into();
        let available = socket_path.exists();
        if !available {
            warn!(
                socket = %socket_path.display(),
                "docker socket not found, log watching disabled"
            );
        }
        Self {
            socket_path,
            available,
        }
    }

    /// Socket path accessor
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn unavailable(&self) -> TransportError {
        TransportError::Unavailable {
            path: self.socket_path.display().to_string(),
        }
    }

    /// Issue a GET over a fresh connection. The connection lives until the
    /// response body is dropped.
    async fn get(&self, path: &str) -> Result<Response<Incoming>, TransportError> {
        if !self.available {
            return Err(self.unavailable());
        }

        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                // Socket present but nobody listening, or not ours to use
                ErrorKind::ConnectionRefused | ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    debug!(error = %e, "docker daemon unreachable");
                    self.unavailable()
                }
                _ => TransportError::Io(e),
            })?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "docker connection closed");
            }
        });

        let request = Request::get(path)
            .header(hyper::header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(|e| TransportError::Api {
                status: 0,
                message: format!("invalid request {}: {}", path, e),
            })?;

        Ok(sender.send_request(request).await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let response = self.get(path).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        if !status.is_success() {
            return Err(api_error(status, &body));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    /// Running containers, failing with `Unavailable` when the daemon
    /// cannot be reached
    async fn containers(&self) -> Result<Vec<SourceInfo>, TransportError> {
        let containers: Vec<ContainerSummary> = self.get_json("/containers/json").await?;
        Ok(containers
            .into_iter()
            .map(ContainerSummary::into_info)
            .collect())
    }
}

/// Build an error from a non-success Engine API response
fn api_error(status: StatusCode, body: &[u8]) -> TransportError {
    let message = serde_json::from_slice::<ApiMessage>(body)
        .map(|m| m.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).trim().to_string());
    TransportError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl LogTransport for DockerClient {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn list_sources(&self) -> Result<Vec<SourceInfo>, TransportError> {
        if !self.available {
            return Ok(Vec::new());
        }

        match self.containers().await {
            Err(TransportError::Unavailable { path }) => {
                warn!(socket = %path, "docker daemon not reachable, no sources");
                Ok(Vec::new())
            }
            result => result,
        }
    }

    async fn stream_logs(
        &self,
        name: &str,
        opts: &LogOptions,
    ) -> Result<ByteStream, TransportError> {
        if !self.available {
            return Err(self.unavailable());
        }

        // Resolve by exact name; the API's name filter matches substrings
        let source = self
            .containers()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| TransportError::SourceNotFound {
                name: name.to_string(),
            })?;

        let path = format!("/containers/{}/logs?{}", source.id, opts.to_query());
        let response = self.get(&path).await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(TransportError::SourceNotFound {
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.into_body().collect().await?.to_bytes();
            return Err(api_error(status, &body));
        }

        let stream = BodyStream::new(response.into_body()).filter_map(|frame| async move {
            match frame {
                Ok(frame) => frame.into_data().ok().map(Ok),
                Err(e) => Some(Err(TransportError::from(e))),
            }
        });

        Ok(stream.boxed())
    }
}
