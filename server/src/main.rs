use clap::Parser;
use log::{error, info, warn};
use server::physics::StaticWorld;
use server::ServerSimulation;
use shared::{MessageRouter, NetworkConfig, NetworkEvent, NetworkService};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// Server port to listen on
    #[clap(short, long)]
    port: Option<u16>,
    /// Simulation tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
    /// JSON file with network and gameplay settings
    #[clap(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<NetworkConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => NetworkConfig::load(path)?,
            None => NetworkConfig::default(),
        };
        if let Some(host) = self.host {
            config.server_host = host;
        }
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.server_tick_rate_hz = tick_rate;
        }
        Ok(config.validated())
    }
}

/// Main-method of the application.
/// Starts the network service, wires the simulation into it and runs the game loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;

    let router = Arc::new(MessageRouter::new());
    let service = Arc::new(NetworkService::new(config.clone(), Arc::clone(&router)));
    let address = service.start_server(&config.server_addr()).await?;

    let simulation = Arc::new(ServerSimulation::new(
        config.clone(),
        service.clone(),
        Arc::new(StaticWorld::arena()),
    ));
    simulation.register_handlers(&router);

    info!(
        "Server listening on {} at {}Hz",
        address, config.server_tick_rate_hz
    );

    let game_handle = {
        let service = Arc::clone(&service);
        let simulation = Arc::clone(&simulation);
        tokio::spawn(async move {
            run_game_loop(service, simulation, config.server_tick_rate_hz).await;
        })
    };

    tokio::select! {
        result = game_handle => {
            if let Err(e) = result {
                error!("Game loop task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    service.disconnect();
    Ok(())
}

/// Starts the game-loop.
async fn run_game_loop(
    service: Arc<NetworkService>,
    simulation: Arc<ServerSimulation>,
    tick_rate: u32,
) {
    let mut interval_timer = interval(Duration::from_secs_f32(1.0 / tick_rate as f32));
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_update = Instant::now();

    // Cap the maximum delta time to 250ms
    let max_delta_time = 0.25;

    // Skip the first tick since it fires immediately
    interval_timer.tick().await;

    loop {
        interval_timer.tick().await;

        let current_time = Instant::now();
        let mut delta_time = (current_time - last_update).as_secs_f32();
        last_update = current_time;

        if delta_time > max_delta_time {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                delta_time, max_delta_time
            );
            delta_time = max_delta_time;
        }

        // Lifecycle first so handlers see players that joined this tick
        for event in service.poll_events() {
            match event {
                NetworkEvent::ClientConnected(id) => simulation.on_client_connected(id),
                NetworkEvent::ClientDisconnected(id) => simulation.on_client_disconnected(id),
                NetworkEvent::ConnectionFailed(reason) => warn!("{}", reason),
                NetworkEvent::LocalIdAssigned(_) => {}
            }
        }

        service.process_incoming();
        simulation.update(delta_time);
    }
}
