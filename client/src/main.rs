use clap::Parser;
use client::input::{random_player_name, InputManager};
use client::network::Client;
use log::info;
use shared::NetworkConfig;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host to connect to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Client tick rate (inputs per second)
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// JSON file with network and gameplay settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Player name announced in the handshake (random if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Seed for the bot's random input
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetworkConfig::load(path)?,
        None => NetworkConfig::default(),
    };
    if let Some(host) = args.host {
        config.server_host = host;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.client_tick_rate_hz = tick_rate;
    }
    let config = config.validated();

    let name = args.name.unwrap_or_else(random_player_name);
    let input_manager = match args.seed {
        Some(seed) => InputManager::with_seed(&config, seed),
        None => InputManager::new(&config),
    };

    info!("Starting client {}...", name);
    info!("Connecting to: {}", config.server_addr());

    let mut client = Client::new(config, name, input_manager);
    client.run(args.duration.map(Duration::from_secs)).await?;

    Ok(())
}
