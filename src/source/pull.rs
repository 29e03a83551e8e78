//! Static pull sources
//!
//! A pull source keeps a connection to the upstream server named in the
//! path configuration and reports readiness changes back to its path.
//! Protocol negotiation on top of the connection belongs to the transport
//! layer; this type owns the connection lifecycle only.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::path::SourceState;
use crate::server::config::SourceKind;

use super::{Source, SourceDescription, SourceError, StaticSource};

/// Upper bound for a single connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Protocol spoken with the upstream server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullProtocol {
    Rtsp,
    Rtmp,
}

/// Upstream endpoint of a pull source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullTarget {
    pub protocol: PullProtocol,
    pub host: String,
    pub port: u16,
}

impl PullTarget {
    /// Build a target from a configured source kind
    ///
    /// Returns `None` for publisher paths.
    pub fn from_kind(kind: &SourceKind) -> Option<Self> {
        let protocol = match kind {
            SourceKind::Publisher => return None,
            SourceKind::Rtsp(_) => PullProtocol::Rtsp,
            SourceKind::Rtmp(_) => PullProtocol::Rtmp,
        };
        let (host, port) = kind.upstream()?;
        Some(Self {
            protocol,
            host,
            port,
        })
    }
}

impl fmt::Display for PullTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Static source pulling from an upstream server
pub struct PullSource {
    protocol: PullProtocol,
    shutdown: oneshot::Sender<()>,
    worker: JoinHandle<()>,
}

impl PullSource {
    /// Start pulling from `target`
    ///
    /// `report` receives every readiness transition. It is called from the
    /// worker task and must not block.
    pub fn start<F>(path: String, target: PullTarget, retry_pause: Duration, report: F) -> Self
    where
        F: Fn(SourceState) + Send + Sync + 'static,
    {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let protocol = target.protocol;

        tracing::debug!(path = %path, upstream = %target, "Starting static source");

        let worker = tokio::spawn(run(path, target, retry_pause, report, shutdown_rx));

        Self {
            protocol,
            shutdown,
            worker,
        }
    }
}

impl Source for PullSource {
    fn describe(&self) -> SourceDescription {
        match self.protocol {
            PullProtocol::Rtsp => SourceDescription::new("rtspSource"),
            PullProtocol::Rtmp => SourceDescription::new("rtmpSource"),
        }
    }
}

#[async_trait]
impl StaticSource for PullSource {
    async fn close(self: Box<Self>) -> Result<(), SourceError> {
        let PullSource {
            shutdown, worker, ..
        } = *self;

        // The worker also stops when the sender is dropped
        let _ = shutdown.send(());
        worker.await?;
        Ok(())
    }
}

async fn run<F>(
    path: String,
    target: PullTarget,
    retry_pause: Duration,
    report: F,
    mut shutdown: oneshot::Receiver<()>,
) where
    F: Fn(SourceState) + Send + Sync + 'static,
{
    loop {
        report(SourceState::Creating);

        let attempt = tokio::time::timeout(
            CONNECT_TIMEOUT,
            TcpStream::connect((target.host.as_str(), target.port)),
        );
        let result = tokio::select! {
            _ = &mut shutdown => return,
            result = attempt => result,
        };

        match result {
            Ok(Ok(stream)) => {
                tracing::info!(path = %path, upstream = %target, "Static source connected");
                report(SourceState::Ready);

                tokio::select! {
                    _ = &mut shutdown => return,
                    result = hold(stream) => match result {
                        Ok(()) => tracing::warn!(path = %path, upstream = %target, "Upstream closed the connection"),
                        Err(e) => tracing::warn!(path = %path, upstream = %target, error = %e, "Upstream connection lost"),
                    },
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %path, upstream = %target, error = %e, "Static source connection failed");
            }
            Err(_) => {
                tracing::warn!(path = %path, upstream = %target, "Static source connection timed out");
            }
        }

        report(SourceState::NotReady);

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(retry_pause) => {}
        }
    }
}

/// Keep the connection open until the peer closes it
async fn hold(mut stream: TcpStream) -> std::io::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        if stream.read(&mut buf).await? == 0 {
            return Ok(());
        }
    }
}
