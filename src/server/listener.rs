//! Server façade
//!
//! Wires the configuration holder, the path registry and the API listener
//! together and applies configuration reloads to all of them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::api::ApiServer;
use crate::error::Result;
use crate::registry::{PathManager, PathManagerHandle};
use crate::server::config::Conf;
use crate::server::holder::ConfHolder;

/// Media server control plane
pub struct Server {
    conf: Arc<ConfHolder>,
    paths: PathManagerHandle,
    api: Option<ApiServer>,
}

impl Server {
    /// Validate the configuration and start the registry and, if enabled,
    /// the API listener
    pub async fn start(conf: Conf) -> Result<Self> {
        conf.validate()?;
        let conf = Arc::new(conf);
        let holder = Arc::new(ConfHolder::new(Arc::clone(&conf)));
        let paths = PathManager::spawn(Arc::clone(&conf));

        let api = if conf.api {
            match ApiServer::start(&conf.api_address, Arc::clone(&holder), paths.clone()).await {
                Ok(api) => Some(api),
                Err(e) => {
                    paths.shutdown().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        tracing::info!(paths = conf.paths.len(), api = conf.api, "Server started");

        Ok(Self {
            conf: holder,
            paths,
            api,
        })
    }

    /// Current configuration snapshot
    pub fn conf(&self) -> Arc<Conf> {
        self.conf.current()
    }

    /// Handle to the path registry, for protocol handlers
    pub fn paths(&self) -> &PathManagerHandle {
        &self.paths
    }

    /// Address of the API listener, if running
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api.as_ref().map(ApiServer::local_addr)
    }

    /// Apply a new configuration
    ///
    /// A replacement API listener is bound before anything else changes, so
    /// an invalid configuration or an unusable API address leaves the running
    /// server untouched. The snapshot is then swapped and the registry adds
    /// and removes paths; if the registry is gone the previous snapshot is
    /// restored. The old API listener is closed last.
    pub async fn reload(&mut self, conf: Conf) -> Result<()> {
        conf.validate()?;
        let conf = Arc::new(conf);

        let current = self.conf.current();
        let restart_api = current.api != conf.api || current.api_address != conf.api_address;

        let next_api = if restart_api && conf.api {
            let api = ApiServer::start(&conf.api_address, Arc::clone(&self.conf), self.paths.clone())
                .await?;
            Some(api)
        } else {
            None
        };

        let previous = self.conf.replace(Arc::clone(&conf));
        if let Err(e) = self.paths.reload(Arc::clone(&conf)).await {
            self.conf.replace(previous);
            if let Some(api) = next_api {
                api.close().await;
            }
            return Err(e.into());
        }

        if restart_api {
            if let Some(api) = std::mem::replace(&mut self.api, next_api) {
                api.close().await;
            }
        }

        tracing::info!("Configuration reloaded");
        Ok(())
    }

    /// Run until `shutdown` resolves, then close everything
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        tracing::info!("Shutdown signal received");
        self.close().await;
    }

    /// Close the API listener and every path
    pub async fn close(self) {
        if let Some(api) = self.api {
            api.close().await;
        }
        self.paths.shutdown().await;
    }
}
