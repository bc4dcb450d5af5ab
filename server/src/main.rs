use clap::Parser;
use log::info;
use std::time::Duration;

use server::config::ServerConfig;
use server::network::Server;

/// Parses command-line arguments, binds the listener and runs the accept
/// loop until the process is interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Milliseconds between turn broadcasts
        #[clap(long, default_value_t = shared::DEFAULT_TURN_INTERVAL_MS)]
        turn_interval_ms: u64,
        /// Milliseconds a room accepts joins before its game starts
        #[clap(long, default_value_t = shared::DEFAULT_LOBBY_LIFETIME_MS)]
        lobby_lifetime_ms: u64,
        /// Milliseconds a game runs after the lobby closes
        #[clap(long, default_value_t = shared::DEFAULT_GAME_DURATION_MS)]
        game_duration_ms: u64,
    }

    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = ServerConfig {
        turn_interval: Duration::from_millis(args.turn_interval_ms),
        lobby_lifetime: Duration::from_millis(args.lobby_lifetime_ms),
        game_duration: Duration::from_millis(args.game_duration_ms),
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
