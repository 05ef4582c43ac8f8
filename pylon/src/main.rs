use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use args::Args;
use axum::{Router, routing::get};
use clap::Parser;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args);

    let config = args.config()?;

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 8000)));

    if let Err(e) = serve(listen_address, config).await {
        log::error!("Server failed to start: {e}");
        std::process::exit(1);
    }

    Ok(())
}

async fn serve(listen_address: SocketAddr, config: config::Config) -> anyhow::Result<()> {
    let mut app = Router::new().route("/health", get(|| async { "OK" }));

    if config.ai.enabled() {
        log::debug!("mounting AI endpoints at {}", config.ai.path);
        app = app.merge(ai::router(&config.ai, ai::Collaborators::default()));
    }

    let listener = tokio::net::TcpListener::bind(listen_address).await?;
    log::info!("Pylon listening on {listen_address}");

    axum::serve(listener, app).await?;

    Ok(())
}
