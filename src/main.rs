use parley::config::HubConfig;
use parley::server::Server;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .init();

    let config = HubConfig::from_env()?;

    println!("   Parley Signaling Server");
    println!("   Binding to {}", config.bind_addr);
    println!("   Allowed origin {}", config.allowed_origin);
    println!("   Press Ctrl+C to stop\n");

    let cancel = CancellationToken::new();
    let server = Server::bind(config, cancel.clone()).await?;

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Shutting down");
        cancel.cancel();
    });

    server.run().await?;
    Ok(())
}
