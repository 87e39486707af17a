use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use peerdrop::config::Config;
use peerdrop::signaling::SignalingServer;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::parse();

    println!("   Peerdrop Signaling Relay");
    println!("   WebSocket: {}/rooms/{{room}}/users/{{uid}}", config.signaling_addr);
    println!("   Identity:  {}/auth", config.signaling_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = SignalingServer::bind(&config.signaling_addr, config.signaling()).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = &result {
                error!("Signaling server failed: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}
