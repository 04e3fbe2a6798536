pub mod config;
pub mod controller;
pub mod store;

use std::sync::Arc;

use config::Config;
use store::Store;

/// Start the registry's HTTP server and block until it exits. Exposed
/// separately from `main` so integration tests (and the peer crate's own
/// end-to-end tests) can run a registry in-process.
pub async fn server_main(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(&config.storage.path)?);
    let app = controller::router(store);

    log::info!("signaling registry listening: {}", config.server.listen);
    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
