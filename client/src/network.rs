use crate::game::ClientGameState;
use crate::input::InputManager;
use log::{error, info, warn};
use parking_lot::Mutex;
use shared::{
    HandshakeMessage, MessageBody, MessageRouter, MessageType, NetworkConfig, NetworkEvent,
    NetworkMessage, NetworkService, Vec3,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Message types the client mirrors into its game state
const WORLD_MESSAGES: [MessageType; 6] = [
    MessageType::PlayerState,
    MessageType::PlayerJoined,
    MessageType::PlayerLeft,
    MessageType::BulletSpawn,
    MessageType::BulletDestroy,
    MessageType::GameTime,
];

pub struct Client {
    config: NetworkConfig,
    player_name: String,
    service: Arc<NetworkService>,
    game_state: Arc<Mutex<ClientGameState>>,
    input_manager: InputManager,
    connected: bool,
}

impl Client {
    pub fn new(config: NetworkConfig, player_name: String, input_manager: InputManager) -> Self {
        let router = Arc::new(MessageRouter::new());
        let game_state = Arc::new(Mutex::new(ClientGameState::new(&config)));

        for message_type in WORLD_MESSAGES {
            let game_state = Arc::clone(&game_state);
            router.register(message_type, move |message, _| {
                apply_world_message(&mut game_state.lock(), message);
                Ok(())
            });
        }

        let service = Arc::new(NetworkService::new(config.clone(), router));

        Client {
            config,
            player_name,
            service,
            game_state,
            input_manager,
            connected: false,
        }
    }

    pub fn service(&self) -> &Arc<NetworkService> {
        &self.service
    }

    pub fn game_state(&self) -> &Arc<Mutex<ClientGameState>> {
        &self.game_state
    }

    /// Connects and introduces the player; the id arrives with the server's reply
    pub async fn connect(&mut self) -> shared::Result<()> {
        let address = self.config.server_addr();
        info!("Connecting to server at {}...", address);
        self.service.connect(&address).await?;

        let hello = NetworkMessage::new(HandshakeMessage {
            player_name: self.player_name.clone(),
            ..HandshakeMessage::default()
        });
        self.service.send_message(&hello);
        self.connected = true;
        Ok(())
    }

    /// One client frame: network events, inbound messages, bot input, prediction
    pub fn tick(&mut self, dt: f32) {
        for event in self.service.poll_events() {
            match event {
                NetworkEvent::LocalIdAssigned(id) => {
                    info!("Connected! Client ID: {}", id);
                    self.game_state.lock().set_local_id(id);
                }
                NetworkEvent::ConnectionFailed(reason) => {
                    warn!("Disconnected: {}", reason);
                    self.connected = false;
                }
                NetworkEvent::ClientDisconnected(_) => {
                    warn!("Disconnected from server");
                    self.connected = false;
                }
                NetworkEvent::ClientConnected(_) => {}
            }
        }

        self.service.process_incoming();
        self.send_input(dt);
        self.game_state.lock().update(dt);
    }

    fn send_input(&mut self, dt: f32) {
        let position = {
            let game = self.game_state.lock();
            match game.local_player() {
                Some(local) if local.is_alive => local.position,
                _ => return,
            }
        };

        let generated = self.input_manager.update(dt, position);
        self.game_state.lock().apply_prediction(&generated.input);

        self.service
            .send_message(&NetworkMessage::new(generated.input));
        if let Some(fire) = generated.fire {
            self.service.send_message(&NetworkMessage::new(fire));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.service.is_connected()
    }

    pub fn local_position(&self) -> Option<Vec3> {
        self.game_state
            .lock()
            .local_player()
            .map(|local| local.position)
    }

    /// Runs the client loop at the configured tick rate until Ctrl+C, the
    /// optional duration elapses or the connection drops.
    pub async fn run(&mut self, duration: Option<Duration>) -> Result<(), Box<dyn std::error::Error>> {
        if !self.connected {
            self.connect().await?;
        }

        let timestep = self.config.client_timestep();
        let mut tick_interval = interval(Duration::from_secs_f32(timestep));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started = Instant::now();
        let mut last_update = Instant::now();
        let mut report_interval = interval(Duration::from_secs(5));

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = (now - last_update).as_secs_f32();
                    last_update = now;
                    self.tick(dt);

                    if !self.is_connected() {
                        error!("Connection to server lost");
                        break;
                    }
                    if duration.map_or(false, |limit| started.elapsed() >= limit) {
                        info!("Run time elapsed");
                        break;
                    }
                },

                _ = report_interval.tick() => {
                    let stats = self.service.statistics();
                    let game = self.game_state.lock();
                    info!(
                        "id={:?} pos={:?} remotes={} bullets={} pending_inputs={} udp_sent={} udp_received={}",
                        game.local_id(),
                        game.local_player().map(|local| local.position),
                        game.remote_players().count(),
                        game.bullets().len(),
                        game.pending_input_count(),
                        stats.udp_packets_sent,
                        stats.udp_packets_received,
                    );
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, disconnecting...");
                    break;
                }
            }
        }

        self.service.disconnect();
        self.connected = false;
        Ok(())
    }
}

fn apply_world_message(game: &mut ClientGameState, message: &NetworkMessage) {
    match &message.body {
        MessageBody::PlayerState(state) => {
            game.apply_server_state(state);
        }
        MessageBody::PlayerJoined(joined) => game.on_player_joined(joined),
        MessageBody::PlayerLeft(left) => game.on_player_left(left.player_id),
        MessageBody::BulletSpawn(spawn) => game.on_bullet_spawn(spawn),
        MessageBody::BulletDestroy(destroy) => game.on_bullet_destroy(destroy.bullet_id),
        MessageBody::GameTime(time) => game.on_game_time(time),
        _ => {}
    }
}
