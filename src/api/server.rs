//! API listener and handlers

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::path::PathItem;
use crate::registry::PathManagerHandle;
use crate::server::config::Conf;
use crate::server::holder::ConfHolder;

use super::error::ApiError;

/// State shared by the handlers
#[derive(Clone)]
struct ApiState {
    conf: Arc<ConfHolder>,
    paths: PathManagerHandle,
}

/// Body of `GET /paths/list`
#[derive(Debug, Serialize)]
pub struct PathsList {
    pub items: Vec<PathItem>,
}

/// Build the API router
pub fn router(conf: Arc<ConfHolder>, paths: PathManagerHandle) -> Router {
    Router::new()
        .route(
            "/config/get",
            get(config_get).head(not_found).fallback(not_found),
        )
        .route(
            "/paths/list",
            get(paths_list).head(not_found).fallback(not_found),
        )
        .with_state(ApiState { conf, paths })
}

/// Running API listener
pub struct ApiServer {
    local_addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ApiServer {
    /// Bind `address` and start serving
    pub async fn start(
        address: &str,
        conf: Arc<ConfHolder>,
        paths: PathManagerHandle,
    ) -> crate::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local_addr = listener.local_addr()?;
        let app = router(conf, paths);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "API server failed");
            }
        });

        tracing::info!(addr = %local_addr, "API listener opened");

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting requests and wait for in-flight ones
    pub async fn close(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "API server task failed");
        }
        tracing::info!(addr = %self.local_addr, "API listener closed");
    }
}

async fn config_get(State(state): State<ApiState>) -> Json<Arc<Conf>> {
    Json(state.conf.current())
}

/// Query the registry, then every path in registry order
///
/// Paths are queried one after the other; the first failure aborts the
/// whole listing.
async fn paths_list(State(state): State<ApiState>) -> Result<Json<PathsList>, ApiError> {
    let paths = state.paths.list_paths().await?;

    let mut items = Vec::with_capacity(paths.len());
    for path in paths.values() {
        items.push(path.describe().await?);
    }

    tracing::debug!(items = items.len(), "Paths listed");
    Ok(Json(PathsList { items }))
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, Bytes};
    use axum::http::{Method, Request};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tower::ServiceExt;

    use super::*;
    use crate::path::{PathHandle, SourceState};
    use crate::registry::PathManager;
    use crate::server::config::PathConf;
    use crate::source::{PublisherProtocol, PublisherSource};

    async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body)
    }

    fn setup(conf: Conf) -> (Arc<ConfHolder>, PathManagerHandle) {
        let conf = Arc::new(conf);
        let paths = PathManager::spawn(Arc::clone(&conf));
        (Arc::new(ConfHolder::new(conf)), paths)
    }

    #[tokio::test]
    async fn test_paths_list_empty() {
        let (conf, paths) = setup(Conf::default());

        let (status, body) = send(router(conf, paths), Method::GET, "/paths/list").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], br#"{"items":[]}"#);
    }

    #[tokio::test]
    async fn test_paths_list_static_source_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("rtsp://{}/stream", listener.local_addr().unwrap());
        let (conf, paths) = setup(Conf::default().path("cam1", PathConf::pull(url)));

        let (_upstream, _) = listener.accept().await.unwrap();
        let cam1 = paths.list_paths().await.unwrap()["cam1"].clone();
        let ready = tokio::time::timeout(Duration::from_secs(5), async {
            while cam1.describe().await.unwrap().source_state != SourceState::Ready {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(ready.is_ok());

        let (status, body) = send(router(conf, paths), Method::GET, "/paths/list").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let items = json["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "cam1");
        assert_eq!(items[0]["confName"], "cam1");
        assert_eq!(items[0]["sourceState"], "ready");
        assert_eq!(items[0]["source"]["type"], "rtspSource");
        assert_eq!(items[0]["conf"]["sourceRetryPause"], "5s");
    }

    #[tokio::test]
    async fn test_paths_list_follows_registry_order() {
        let (conf, paths) = setup(Conf::default());
        for (session_id, name) in ["zeta", "alpha", "mid"].into_iter().enumerate() {
            let source = PublisherSource::new(PublisherProtocol::Rtsp, session_id as u64);
            paths
                .publisher_announce(name, session_id as u64, Box::new(source))
                .await
                .unwrap();
        }

        let (status, body) = send(router(conf, paths), Method::GET, "/paths/list").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let names: Vec<&str> = json["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(json["items"][0]["sourceState"], "creating");
        assert_eq!(json["items"][0]["source"]["type"], "rtspSession");
    }

    #[tokio::test]
    async fn test_paths_list_fails_when_one_path_fails() {
        let conf = Conf::default()
            .path("a", PathConf::publisher())
            .path("c", PathConf::publisher());
        let (conf, paths) = setup(conf);
        paths.adopt(PathHandle::detached("b")).await;
        assert_eq!(paths.list_paths().await.unwrap().len(), 3);

        let (status, body) = send(router(conf, paths), Method::GET, "/paths/list").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_paths_list_fails_after_shutdown() {
        let (conf, paths) = setup(Conf::default());
        paths.shutdown().await;

        let (status, body) = send(router(conf, paths), Method::GET, "/paths/list").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_config_get_is_idempotent() {
        let (conf, paths) = setup(Conf::default().path("cam1", PathConf::publisher()));
        let app = router(conf, paths);

        let (status, first) = send(app.clone(), Method::GET, "/config/get").await;
        let (_, second) = send(app, Method::GET, "/config/get").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(first, second);

        let json: serde_json::Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(json["apiAddress"], "127.0.0.1:9997");
        assert_eq!(json["paths"]["cam1"]["source"], "publisher");
    }

    #[tokio::test]
    async fn test_config_get_follows_reload() {
        let (conf, paths) = setup(Conf::default());
        let app = router(Arc::clone(&conf), paths);

        conf.replace(Arc::new(Conf::default().api_address("0.0.0.0:7000")));

        let (_, body) = send(app, Method::GET, "/config/get").await;
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["apiAddress"], "0.0.0.0:7000");
    }

    #[tokio::test]
    async fn test_wrong_method_and_unknown_route() {
        let (conf, paths) = setup(Conf::default());
        let app = router(conf, paths);

        let (status, _) = send(app.clone(), Method::POST, "/config/get").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app.clone(), Method::DELETE, "/paths/list").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app.clone(), Method::HEAD, "/paths/list").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app, Method::GET, "/rtspsessions/list").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_over_tcp() {
        let (conf, paths) = setup(Conf::default());
        let server = ApiServer::start("127.0.0.1:0", conf, paths).await.unwrap();

        let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
        stream
            .write_all(b"GET /paths/list HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.ends_with(r#"{"items":[]}"#));

        server.close().await;
    }
}
