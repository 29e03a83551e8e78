//! Path manager implementation

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::path::{Path, PathEvent, PathHandle};
use crate::server::config::{validate_path_name, Conf};
use crate::source::Source;

use super::error::RegistryError;

/// Capacity of the registry mailbox
const MAILBOX_CAPACITY: usize = 256;

enum ManagerRequest {
    ListPaths {
        reply: oneshot::Sender<BTreeMap<String, PathHandle>>,
    },
    PublisherAnnounce {
        name: String,
        session_id: u64,
        source: Box<dyn Source>,
        reply: oneshot::Sender<Result<PathHandle, RegistryError>>,
    },
    Reload {
        conf: Arc<Conf>,
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    #[cfg(test)]
    Adopt {
        path: PathHandle,
        reply: oneshot::Sender<()>,
    },
}

/// Registry actor state
pub struct PathManager {
    conf: Arc<Conf>,
    paths: BTreeMap<String, PathHandle>,
    rx: mpsc::Receiver<ManagerRequest>,
    events_tx: mpsc::UnboundedSender<PathEvent>,
    events_rx: mpsc::UnboundedReceiver<PathEvent>,
}

impl PathManager {
    /// Spawn the registry and create every configured path
    pub fn spawn(conf: Arc<Conf>) -> PathManagerHandle {
        let (manager, handle) = Self::new(conf);
        tokio::spawn(manager.run());
        handle
    }

    fn new(conf: Arc<Conf>) -> (Self, PathManagerHandle) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut manager = PathManager {
            conf,
            paths: BTreeMap::new(),
            rx,
            events_tx,
            events_rx,
        };
        manager.create_static_paths();

        (manager, PathManagerHandle { tx })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                request = self.rx.recv() => match request {
                    Some(request) => {
                        if self.handle(request).await.is_break() {
                            return;
                        }
                    }
                    None => {
                        self.close_all().await;
                        return;
                    }
                },
                Some(event) = self.events_rx.recv() => self.on_path_event(event).await,
            }
        }
    }

    async fn handle(&mut self, request: ManagerRequest) -> ControlFlow<()> {
        match request {
            ManagerRequest::ListPaths { reply } => {
                tracing::debug!(paths = self.paths.len(), "Listing paths");
                let _ = reply.send(self.paths.clone());
            }
            ManagerRequest::PublisherAnnounce {
                name,
                session_id,
                source,
                reply,
            } => {
                let result = self.publisher_announce(name, session_id, source).await;
                let _ = reply.send(result);
            }
            ManagerRequest::Reload { conf, reply } => {
                self.reload(conf).await;
                let _ = reply.send(());
            }
            ManagerRequest::Shutdown { reply } => {
                self.close_all().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
            #[cfg(test)]
            ManagerRequest::Adopt { path, reply } => {
                self.paths.insert(path.name().to_string(), path);
                let _ = reply.send(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Create every exactly-named path the configuration lists
    fn create_static_paths(&mut self) {
        let conf = Arc::clone(&self.conf);
        for name in conf.static_path_names() {
            if !self.paths.contains_key(name) {
                let path = self.spawn_path(name);
                self.paths.insert(name.to_string(), path);
            }
        }
    }

    fn spawn_path(&self, name: &str) -> PathHandle {
        let conf = self
            .conf
            .find_path_conf(name)
            .map(|(conf_name, conf)| (conf_name.to_string(), Arc::new(conf.clone())));
        Path::spawn(name, conf, Some(self.events_tx.clone()))
    }

    async fn publisher_announce(
        &mut self,
        name: String,
        session_id: u64,
        source: Box<dyn Source>,
    ) -> Result<PathHandle, RegistryError> {
        validate_path_name(&name).map_err(|e| RegistryError::InvalidPathName(e.to_string()))?;

        let (path, created) = match self.paths.get(&name) {
            Some(path) => (path.clone(), false),
            None => {
                if self.conf.find_path_conf(&name).is_none() {
                    return Err(RegistryError::PathNotConfigured(name));
                }
                let path = self.spawn_path(&name);
                self.paths.insert(name.clone(), path.clone());
                (path, true)
            }
        };

        if let Err(e) = path.announce_publisher(session_id, source).await {
            if created {
                self.remove_path(&name).await;
            }
            return Err(e.into());
        }
        Ok(path)
    }

    async fn reload(&mut self, conf: Arc<Conf>) {
        let stale: Vec<String> = self
            .paths
            .keys()
            .filter(|name| self.conf.find_path_conf(name) != conf.find_path_conf(name))
            .cloned()
            .collect();

        for name in &stale {
            self.remove_path(name).await;
        }

        self.conf = conf;
        self.create_static_paths();

        tracing::info!(
            removed = stale.len(),
            paths = self.paths.len(),
            "Path configuration reloaded"
        );
    }

    async fn on_path_event(&mut self, event: PathEvent) {
        match event {
            PathEvent::Idle { name, id } => {
                // The path may have been replaced by a reload since the event was sent
                let Some(path) = self.paths.get(&name).filter(|path| path.id() == id) else {
                    tracing::debug!(path = %name, "Ignoring idle event from a replaced path");
                    return;
                };
                // A publisher may have attached again since the event was sent
                if path.try_close().await {
                    self.paths.remove(&name);
                    tracing::info!(path = %name, "Idle path removed");
                }
            }
        }
    }

    async fn remove_path(&mut self, name: &str) {
        if let Some(path) = self.paths.remove(name) {
            path.close().await;
            tracing::info!(path = %name, "Path removed");
        }
    }

    async fn close_all(&mut self) {
        for (_, path) in std::mem::take(&mut self.paths) {
            path.close().await;
        }
        tracing::info!("Path registry shut down");
    }
}

/// Cloneable handle to the path registry
#[derive(Clone, Debug)]
pub struct PathManagerHandle {
    tx: mpsc::Sender<ManagerRequest>,
}

impl PathManagerHandle {
    /// Snapshot of the current name → path mapping
    pub async fn list_paths(&self) -> Result<BTreeMap<String, PathHandle>, RegistryError> {
        self.request(|reply| ManagerRequest::ListPaths { reply })
            .await
    }

    /// Attach a publisher to a path, creating the path if needed
    pub async fn publisher_announce(
        &self,
        name: impl Into<String>,
        session_id: u64,
        source: Box<dyn Source>,
    ) -> Result<PathHandle, RegistryError> {
        let name = name.into();
        self.request(|reply| ManagerRequest::PublisherAnnounce {
            name,
            session_id,
            source,
            reply,
        })
        .await?
    }

    /// Apply a new configuration to the set of paths
    pub async fn reload(&self, conf: Arc<Conf>) -> Result<(), RegistryError> {
        self.request(|reply| ManagerRequest::Reload { conf, reply })
            .await
    }

    /// Close every path and stop the registry
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| ManagerRequest::Shutdown { reply }).await;
    }

    /// Insert an arbitrary handle into the mapping
    #[cfg(test)]
    pub(crate) async fn adopt(&self, path: PathHandle) {
        let _ = self.request(|reply| ManagerRequest::Adopt { path, reply }).await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> ManagerRequest,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RegistryError::Unavailable)?;
        rx.await.map_err(|_| RegistryError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::TcpListener;

    use super::*;
    use crate::path::{PathError, SourceState};
    use crate::server::config::{PathConf, CATCH_ALL_PATH};
    use crate::source::testing::FailingSource;
    use crate::source::{PublisherProtocol, PublisherSource};

    fn publisher(session_id: u64) -> Box<dyn Source> {
        Box::new(PublisherSource::new(PublisherProtocol::Rtmp, session_id))
    }

    async fn unreachable_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("rtsp://{}/stream", addr)
    }

    fn names(paths: &BTreeMap<String, PathHandle>) -> Vec<&str> {
        paths.keys().map(String::as_str).collect()
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let manager = PathManager::spawn(Arc::new(Conf::default()));
        assert!(manager.list_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_paths_are_created() {
        let url = unreachable_url().await;
        let conf = Conf::default()
            .path(
                "cam1",
                PathConf::pull(url).source_retry_pause(Duration::from_secs(60)),
            )
            .path("studio", PathConf::publisher());
        let manager = PathManager::spawn(Arc::new(conf));

        let paths = manager.list_paths().await.unwrap();
        assert_eq!(names(&paths), vec!["cam1", "studio"]);

        let item = paths["cam1"].describe().await.unwrap();
        assert_eq!(item.conf_name.as_deref(), Some("cam1"));
        assert!(item.source.is_some());
    }

    #[tokio::test]
    async fn test_publisher_announce_creates_ephemeral_path() {
        let manager = PathManager::spawn(Arc::new(Conf::default()));

        let path = manager
            .publisher_announce("live/key", 1, publisher(1))
            .await
            .unwrap();
        assert_eq!(path.name(), "live/key");

        let paths = manager.list_paths().await.unwrap();
        assert_eq!(names(&paths), vec!["live/key"]);

        let item = paths["live/key"].describe().await.unwrap();
        assert_eq!(item.conf_name.as_deref(), Some(CATCH_ALL_PATH));
        assert_eq!(item.source_state, SourceState::Creating);

        let result = manager.publisher_announce("live/key", 2, publisher(2)).await;
        assert_eq!(
            result.unwrap_err(),
            RegistryError::Path(PathError::AlreadyPublishing("live/key".to_string()))
        );
    }

    #[tokio::test]
    async fn test_idle_ephemeral_path_is_removed() {
        let manager = PathManager::spawn(Arc::new(Conf::default()));
        let path = manager
            .publisher_announce("live", 1, publisher(1))
            .await
            .unwrap();

        path.remove_publisher(1).await.unwrap();

        let removed = tokio::time::timeout(Duration::from_secs(5), async {
            while !manager.list_paths().await.unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(removed.is_ok());
        assert!(path.is_closed());
    }

    #[tokio::test]
    async fn test_idle_event_from_replaced_path_is_ignored() {
        let (mut manager, _handle) = PathManager::new(Arc::new(Conf::default()));

        let ephemeral = manager
            .publisher_announce("live".to_string(), 1, publisher(1))
            .await
            .unwrap();
        ephemeral.remove_publisher(1).await.unwrap();

        // The idle event stays queued while a reload configures the name
        let conf = Conf::default().path("live", PathConf::publisher());
        manager.reload(Arc::new(conf)).await;
        assert!(ephemeral.is_closed());

        let event = manager.events_rx.recv().await.unwrap();
        manager.on_path_event(event).await;

        let configured = &manager.paths["live"];
        assert_ne!(configured.id(), ephemeral.id());
        assert!(!configured.is_closed());
        assert_eq!(
            configured.describe().await.unwrap().conf_name.as_deref(),
            Some("live")
        );
    }

    #[tokio::test]
    async fn test_failing_static_source_close_keeps_registry_running() {
        let manager = PathManager::spawn(Arc::new(Conf::default()));
        let (source, mut closed) = FailingSource::new();
        let path = Path::spawn_with_static_source("cam9", None, Box::new(source));
        manager.adopt(path.clone()).await;

        manager
            .reload(Arc::new(Conf::default().without_path(CATCH_ALL_PATH)))
            .await
            .unwrap();

        assert_eq!(closed.recv().await, Some(()));
        assert!(path.is_closed());
        assert!(manager.list_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_configured_publisher_path_survives_idle() {
        let conf = Conf::default().path("studio", PathConf::publisher());
        let manager = PathManager::spawn(Arc::new(conf));

        let path = manager
            .publisher_announce("studio", 1, publisher(1))
            .await
            .unwrap();
        path.remove_publisher(1).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(names(&manager.list_paths().await.unwrap()), vec!["studio"]);
        assert!(!path.is_closed());
    }

    #[tokio::test]
    async fn test_publisher_announce_rejections() {
        let conf = Conf::default().without_path(CATCH_ALL_PATH);
        let manager = PathManager::spawn(Arc::new(conf));

        let result = manager.publisher_announce("unknown", 1, publisher(1)).await;
        assert_eq!(
            result.unwrap_err(),
            RegistryError::PathNotConfigured("unknown".to_string())
        );

        let result = manager.publisher_announce("bad name", 1, publisher(1)).await;
        assert!(matches!(result, Err(RegistryError::InvalidPathName(_))));

        assert!(manager.list_paths().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_replaces_changed_paths() {
        let conf = Conf::default()
            .path("studio", PathConf::publisher())
            .path("backstage", PathConf::publisher());
        let manager = PathManager::spawn(Arc::new(conf.clone()));
        let before = manager.list_paths().await.unwrap();

        let next = conf
            .without_path("backstage")
            .path("lobby", PathConf::publisher());
        manager.reload(Arc::new(next)).await.unwrap();

        let after = manager.list_paths().await.unwrap();
        assert_eq!(names(&after), vec!["lobby", "studio"]);
        assert!(before["backstage"].is_closed());
        assert!(!before["studio"].is_closed());
    }

    #[tokio::test]
    async fn test_shutdown_makes_registry_unavailable() {
        let conf = Conf::default().path("studio", PathConf::publisher());
        let manager = PathManager::spawn(Arc::new(conf));
        let paths = manager.list_paths().await.unwrap();

        manager.shutdown().await;

        assert_eq!(manager.list_paths().await.unwrap_err(), RegistryError::Unavailable);
        let result = manager.publisher_announce("live", 1, publisher(1)).await;
        assert_eq!(result.unwrap_err(), RegistryError::Unavailable);

        // Handles from an earlier snapshot still answer
        assert!(paths["studio"].is_closed());
        assert_eq!(paths["studio"].describe().await.unwrap().name, "studio");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_list_paths_is_linearizable() {
        const COUNT: usize = 30;
        let manager = PathManager::spawn(Arc::new(Conf::default()));
        let expected: Vec<String> = (0..COUNT).map(|i| format!("p{:02}", i)).collect();

        let announcer = {
            let manager = manager.clone();
            let expected = expected.clone();
            tokio::spawn(async move {
                for (i, name) in expected.iter().enumerate() {
                    manager
                        .publisher_announce(name.as_str(), i as u64, publisher(i as u64))
                        .await
                        .unwrap();
                }
            })
        };

        let mut listers = Vec::new();
        for _ in 0..3 {
            let manager = manager.clone();
            let expected = expected.clone();
            listers.push(tokio::spawn(async move {
                let mut last = 0;
                loop {
                    let paths = manager.list_paths().await.unwrap();
                    let seen: Vec<String> = paths.keys().cloned().collect();

                    // Paths are created in order, so every instant is a prefix
                    assert_eq!(seen, expected[..seen.len()].to_vec());
                    assert!(seen.len() >= last);
                    last = seen.len();

                    if last == COUNT {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        announcer.await.unwrap();
        for lister in listers {
            lister.await.unwrap();
        }
    }
}
