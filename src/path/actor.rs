//! Path actor and handle

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::server::config::PathConf;
use crate::source::{PathSource, PullSource, PullTarget, Source, SourceDescription};

use super::error::PathError;
use super::state::SourceState;

/// Capacity of a path mailbox
const MAILBOX_CAPACITY: usize = 64;

static NEXT_PATH_ID: AtomicU64 = AtomicU64::new(1);

/// Point-in-time description of a path, as served by the API
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathItem {
    /// Path name
    pub name: String,
    /// Name of the configuration entry that matched the path
    pub conf_name: Option<String>,
    /// Configuration of the path
    pub conf: Option<Arc<PathConf>>,
    /// Readiness of the current source
    pub source_state: SourceState,
    /// Current source, `null` when nothing is attached
    pub source: Option<SourceDescription>,
}

/// Notification sent by a path to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    /// An ephemeral path lost its publisher
    ///
    /// `id` identifies the actor that sent the event, so a path created
    /// later under the same name is not mistaken for it.
    Idle { name: String, id: u64 },
}

enum PathRequest {
    Describe {
        reply: oneshot::Sender<PathItem>,
    },
    AnnouncePublisher {
        session_id: u64,
        source: Box<dyn Source>,
        reply: oneshot::Sender<Result<(), PathError>>,
    },
    RecordPublisher {
        session_id: u64,
        reply: oneshot::Sender<Result<(), PathError>>,
    },
    RemovePublisher {
        session_id: u64,
        reply: oneshot::Sender<Result<(), PathError>>,
    },
    TryClose {
        reply: oneshot::Sender<bool>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Path actor state
pub struct Path {
    id: u64,
    name: String,
    conf_name: Option<String>,
    conf: Option<Arc<PathConf>>,
    ephemeral: bool,
    source: Option<PathSource>,
    source_state: SourceState,
    publisher_id: Option<u64>,
    rx: mpsc::Receiver<PathRequest>,
    static_states: mpsc::UnboundedReceiver<SourceState>,
    events: Option<mpsc::UnboundedSender<PathEvent>>,
    tombstone: Arc<OnceLock<PathItem>>,
}

impl Path {
    /// Spawn a path actor
    ///
    /// `conf` is the matching configuration entry and its name. A path is
    /// ephemeral unless an entry carries its exact name; ephemeral paths
    /// report [`PathEvent::Idle`] on `events` when their publisher leaves.
    /// A configured static source starts immediately.
    pub fn spawn(
        name: impl Into<String>,
        conf: Option<(String, Arc<PathConf>)>,
        events: Option<mpsc::UnboundedSender<PathEvent>>,
    ) -> PathHandle {
        let name = name.into();
        let (state_tx, static_states) = mpsc::unbounded_channel();

        let path_conf = conf.as_ref().map(|(_, conf)| Arc::clone(conf));
        let target = path_conf
            .as_ref()
            .and_then(|conf| conf.source_kind().ok())
            .and_then(|kind| PullTarget::from_kind(&kind));

        let (source, source_state) = match (target, path_conf) {
            (Some(target), Some(conf)) => {
                let report = move |state: SourceState| {
                    let _ = state_tx.send(state);
                };
                let source = PullSource::start(name.clone(), target, conf.source_retry_pause, report);
                (
                    Some(PathSource::Static(Box::new(source))),
                    SourceState::Creating,
                )
            }
            _ => (None, SourceState::NotReady),
        };

        Self::launch(name, conf, source, source_state, static_states, events)
    }

    fn launch(
        name: String,
        conf: Option<(String, Arc<PathConf>)>,
        source: Option<PathSource>,
        source_state: SourceState,
        static_states: mpsc::UnboundedReceiver<SourceState>,
        events: Option<mpsc::UnboundedSender<PathEvent>>,
    ) -> PathHandle {
        let id = NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let tombstone = Arc::new(OnceLock::new());

        let (conf_name, conf) = match conf {
            Some((conf_name, conf)) => (Some(conf_name), Some(conf)),
            None => (None, None),
        };
        let ephemeral = conf_name.as_deref() != Some(name.as_str());

        let path = Path {
            id,
            name: name.clone(),
            conf_name,
            conf,
            ephemeral,
            source,
            source_state,
            publisher_id: None,
            rx,
            static_states,
            events,
            tombstone: Arc::clone(&tombstone),
        };

        tracing::info!(path = %name, ephemeral = ephemeral, "Path created");
        tokio::spawn(path.run());

        PathHandle {
            id,
            name: name.into(),
            tx,
            tombstone,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if self.handle(request).is_break() {
                            return;
                        }
                    }
                    None => {
                        self.terminate();
                        return;
                    }
                },
                Some(state) = self.static_states.recv() => self.on_static_state(state),
            }
        }
    }

    fn handle(&mut self, request: PathRequest) -> ControlFlow<()> {
        match request {
            PathRequest::Describe { reply } => {
                let _ = reply.send(self.describe());
            }
            PathRequest::AnnouncePublisher {
                session_id,
                source,
                reply,
            } => {
                let _ = reply.send(self.announce_publisher(session_id, source));
            }
            PathRequest::RecordPublisher { session_id, reply } => {
                let _ = reply.send(self.record_publisher(session_id));
            }
            PathRequest::RemovePublisher { session_id, reply } => {
                let _ = reply.send(self.remove_publisher(session_id));
            }
            PathRequest::TryClose { reply } => {
                if self.source.is_some() {
                    let _ = reply.send(false);
                } else {
                    self.terminate();
                    let _ = reply.send(true);
                    return ControlFlow::Break(());
                }
            }
            PathRequest::Close { reply } => {
                self.terminate();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn describe(&self) -> PathItem {
        PathItem {
            name: self.name.clone(),
            conf_name: self.conf_name.clone(),
            conf: self.conf.clone(),
            source_state: self.source_state,
            source: self.source.as_ref().map(PathSource::describe),
        }
    }

    fn announce_publisher(
        &mut self,
        session_id: u64,
        source: Box<dyn Source>,
    ) -> Result<(), PathError> {
        match self.source {
            Some(PathSource::Static(_)) => {
                return Err(PathError::StaticSourceAssigned(self.name.clone()));
            }
            Some(PathSource::Generic(_)) => {
                return Err(PathError::AlreadyPublishing(self.name.clone()));
            }
            None => {}
        }

        self.source = Some(PathSource::Generic(source));
        self.publisher_id = Some(session_id);
        self.source_state = SourceState::Creating;

        tracing::info!(path = %self.name, session_id = session_id, "Publisher attached");
        Ok(())
    }

    fn record_publisher(&mut self, session_id: u64) -> Result<(), PathError> {
        self.check_publisher(session_id)?;
        self.source_state = SourceState::Ready;

        tracing::info!(path = %self.name, session_id = session_id, "Publisher is recording");
        Ok(())
    }

    fn remove_publisher(&mut self, session_id: u64) -> Result<(), PathError> {
        self.check_publisher(session_id)?;

        self.source = None;
        self.publisher_id = None;
        self.source_state = SourceState::NotReady;

        tracing::info!(path = %self.name, session_id = session_id, "Publisher removed");

        if self.ephemeral {
            if let Some(events) = &self.events {
                let _ = events.send(PathEvent::Idle {
                    name: self.name.clone(),
                    id: self.id,
                });
            }
        }
        Ok(())
    }

    fn check_publisher(&self, session_id: u64) -> Result<(), PathError> {
        if self.publisher_id == Some(session_id) {
            return Ok(());
        }

        tracing::warn!(
            path = %self.name,
            expected = ?self.publisher_id,
            actual = session_id,
            "Publisher mismatch"
        );
        Err(PathError::PublisherMismatch {
            path: self.name.clone(),
            session_id,
        })
    }

    fn on_static_state(&mut self, state: SourceState) {
        if matches!(self.source, Some(PathSource::Static(_))) {
            tracing::debug!(path = %self.name, state = ?state, "Static source state changed");
            self.source_state = state;
        }
    }

    /// Leave a description behind, answer queued requests and release the
    /// source
    fn terminate(&mut self) {
        let last = self.describe();
        let _ = self.tombstone.set(last.clone());

        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            match request {
                PathRequest::Describe { reply } => {
                    let _ = reply.send(last.clone());
                }
                PathRequest::AnnouncePublisher { reply, .. }
                | PathRequest::RecordPublisher { reply, .. }
                | PathRequest::RemovePublisher { reply, .. } => {
                    let _ = reply.send(Err(PathError::Terminated(self.name.clone())));
                }
                PathRequest::TryClose { reply } => {
                    let _ = reply.send(true);
                }
                PathRequest::Close { reply } => {
                    let _ = reply.send(());
                }
            }
        }

        match self.source.take() {
            Some(PathSource::Static(source)) => {
                let name = self.name.clone();
                tokio::spawn(async move {
                    if let Err(e) = source.close().await {
                        tracing::warn!(path = %name, error = %e, "Failed to close static source");
                    }
                });
            }
            Some(PathSource::Generic(_)) => {
                tracing::debug!(path = %self.name, session_id = ?self.publisher_id, "Dropping publisher");
            }
            None => {}
        }
        self.publisher_id = None;
        self.source_state = SourceState::NotReady;

        tracing::info!(path = %self.name, "Path closed");
    }
}

/// Cloneable handle to a path actor
#[derive(Clone)]
pub struct PathHandle {
    id: u64,
    name: Arc<str>,
    tx: mpsc::Sender<PathRequest>,
    tombstone: Arc<OnceLock<PathItem>>,
}

impl PathHandle {
    /// Identifier of the actor behind the handle, unique per process
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Path name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the actor has stopped accepting requests
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Describe the path
    ///
    /// A path that already shut down answers with the description it had
    /// right before closing.
    pub async fn describe(&self) -> Result<PathItem, PathError> {
        match self.request(|reply| PathRequest::Describe { reply }).await {
            Ok(item) => Ok(item),
            Err(e) => self.tombstone.get().cloned().ok_or(e),
        }
    }

    /// Attach a publisher; the source becomes `Creating`
    pub async fn announce_publisher(
        &self,
        session_id: u64,
        source: Box<dyn Source>,
    ) -> Result<(), PathError> {
        self.request(|reply| PathRequest::AnnouncePublisher {
            session_id,
            source,
            reply,
        })
        .await?
    }

    /// Mark the publisher as delivering media; the source becomes `Ready`
    pub async fn record_publisher(&self, session_id: u64) -> Result<(), PathError> {
        self.request(|reply| PathRequest::RecordPublisher { session_id, reply })
            .await?
    }

    /// Detach the publisher; the source becomes `NotReady`
    pub async fn remove_publisher(&self, session_id: u64) -> Result<(), PathError> {
        self.request(|reply| PathRequest::RemovePublisher { session_id, reply })
            .await?
    }

    /// Close the path if no source is attached
    ///
    /// Returns `true` when the path is closed after the call.
    pub async fn try_close(&self) -> bool {
        self.request(|reply| PathRequest::TryClose { reply })
            .await
            .unwrap_or(true)
    }

    /// Close the path unconditionally
    pub async fn close(&self) {
        let _ = self.request(|reply| PathRequest::Close { reply }).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> PathRequest,
    ) -> Result<T, PathError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| self.terminated())?;
        rx.await.map_err(|_| self.terminated())
    }

    fn terminated(&self) -> PathError {
        PathError::Terminated(self.name.to_string())
    }
}

impl std::fmt::Debug for PathHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
impl PathHandle {
    /// Handle whose actor is already gone without a description
    pub(crate) fn detached(name: &str) -> Self {
        let (tx, _) = mpsc::channel(1);
        Self {
            id: NEXT_PATH_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            tx,
            tombstone: Arc::new(OnceLock::new()),
        }
    }
}

#[cfg(test)]
impl Path {
    /// Spawn a path around an already running static source
    pub(crate) fn spawn_with_static_source(
        name: &str,
        conf: Option<(String, Arc<PathConf>)>,
        source: Box<dyn crate::source::StaticSource>,
    ) -> PathHandle {
        let (_, static_states) = mpsc::unbounded_channel();
        Self::launch(
            name.to_string(),
            conf,
            Some(PathSource::Static(source)),
            SourceState::Ready,
            static_states,
            None,
        )
    }
}
