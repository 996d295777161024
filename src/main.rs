use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vidserve::app::{router, AppContext};
use vidserve::config::Config;
use vidserve::library::Library;
use vidserve::upload::Uploader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::parse();
    config.ensure_directories()?;

    let refresh = Duration::from_secs(config.refresh_secs);
    let library = Arc::new(Library::new(config.media_dir.clone(), refresh));
    library.refresh().await?;

    let uploader = Arc::new(Uploader::new(
        config.media_dir.clone(),
        config.covers_dir.clone(),
        config.max_upload_bytes(),
    ));

    tokio::spawn(Arc::clone(&library).refresh_periodically(refresh));

    info!(media = %config.media_dir.display(), covers = %config.covers_dir.display(), "directories ready");

    let listen = config.listen;
    let ctx = AppContext {
        config: Arc::new(config),
        library,
        uploader,
    };

    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "serving media");

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vidserve=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
