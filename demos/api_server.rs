//! Administrative API example
//!
//! Run with: cargo run --example api_server [CONFIG_FILE]
//!
//! Without a configuration file the API listens on 127.0.0.1:9997 and any
//! path name is accepted from publishers. A demo publisher is attached to
//! `demo/stream` so the listing is not empty.
//!
//! Query it with:
//!   curl http://127.0.0.1:9997/config/get
//!   curl http://127.0.0.1:9997/paths/list

use mediapath::source::{PublisherProtocol, PublisherSource};
use mediapath::{Conf, Server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let conf = match std::env::args().nth(1) {
        Some(path) => Conf::load(path)?,
        None => Conf::default().api(true),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(conf.log_level.as_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let server = Server::start(conf).await?;

    let demo = PublisherSource::new(PublisherProtocol::Rtmp, 1);
    match server.paths().publisher_announce("demo/stream", 1, Box::new(demo)).await {
        Ok(path) => path.record_publisher(1).await?,
        Err(e) => tracing::warn!(error = %e, "Demo publisher rejected"),
    }

    if let Some(addr) = server.api_addr() {
        println!("API available at http://{}", addr);
    }

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}
