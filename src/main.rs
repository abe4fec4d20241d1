use std::net::SocketAddr;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dipper::api;
use dipper::cli;
use dipper::clock;
use dipper::node::DipperNode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dipper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse args and env vars
    let settings = cli::Cli::parse().into_settings();
    let socket_address = settings.listen_socket()?;

    let node = DipperNode::new(&settings, clock::system_clock()).await?;
    let _expiry = node.spawn_expiry(settings.expire_interval());

    // Build Axum Router
    let api = api::api(node)?;

    // Start server
    info!("Starting Dipper on {}", socket_address);
    let listener = tokio::net::TcpListener::bind(socket_address).await?;
    axum::serve(
        listener,
        api.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
