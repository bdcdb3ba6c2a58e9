//! Runtime configuration consumed read-only by the transport and simulation
//!
//! Values come from defaults, an optional JSON file and command-line overrides
//! applied by the binaries. [`NetworkConfig::validated`] clamps everything into
//! the ranges the rest of the crate assumes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVER_PORT: u16 = 7777;
pub const MAX_PACKET_SIZE: usize = 1400;
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - 20;
pub const BUFFER_SIZE: usize = 4096;
pub const BUFFER_POOL_CAPACITY: usize = 50;
/// Largest length prefix accepted on a TCP stream
pub const MAX_TCP_FRAME_SIZE: usize = 64 * 1024;
pub const RELIABLE_SWEEP_INTERVAL: Duration = Duration::from_millis(50);
pub const FRAGMENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const QUEUE_BACKLOG_WARNING: usize = 100;

const DEFAULT_CONNECTION_TIMEOUT_SECS: f32 = 5.0;
const DEFAULT_RETRY_TIMEOUT_SECS: f32 = 0.2;
const DEFAULT_DAY_NIGHT_CYCLE_SECS: f32 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    // Connection
    pub server_host: String,
    pub server_port: u16,
    pub connection_timeout_secs: f32,

    // Performance
    pub buffer_size: usize,
    pub max_messages_per_frame: usize,
    pub server_tick_rate_hz: u32,
    pub client_tick_rate_hz: u32,

    // Reliability
    pub max_retries: u32,
    pub retry_timeout_secs: f32,
    pub enable_reliable_udp: bool,

    // Compression
    pub enable_compression: bool,
    pub compression_threshold_bytes: usize,

    // Gameplay
    pub player_move_speed: f32,
    pub player_max_health: f32,
    pub bullet_damage: f32,
    pub bullet_speed: f32,
    pub bullet_lifetime_secs: f32,
    pub fire_rate_per_sec: f32,
    pub player_hit_radius: f32,
    pub map_half_extent: f32,

    // Reconciliation
    pub snap_distance: f32,
    pub interpolation_speed: f32,

    // Vision
    pub day_vision_range: f32,
    pub night_vision_range: f32,
    pub day_vision_angle: f32,
    pub night_vision_angle: f32,
    pub day_night_cycle_secs: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_SERVER_PORT,
            connection_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            buffer_size: BUFFER_SIZE,
            max_messages_per_frame: 10,
            server_tick_rate_hz: 20,
            client_tick_rate_hz: 20,
            max_retries: 5,
            retry_timeout_secs: DEFAULT_RETRY_TIMEOUT_SECS,
            enable_reliable_udp: true,
            enable_compression: true,
            compression_threshold_bytes: 100,
            player_move_speed: 7.0,
            player_max_health: 100.0,
            bullet_damage: 25.0,
            bullet_speed: 20.0,
            bullet_lifetime_secs: 3.0,
            fire_rate_per_sec: 4.0,
            player_hit_radius: 0.5,
            map_half_extent: 50.0,
            snap_distance: 2.0,
            interpolation_speed: 10.0,
            day_vision_range: 15.0,
            night_vision_range: 8.0,
            day_vision_angle: 75.0,
            night_vision_angle: 45.0,
            day_night_cycle_secs: DEFAULT_DAY_NIGHT_CYCLE_SECS,
        }
    }
}

impl NetworkConfig {
    /// Reads a JSON config file; missing fields fall back to defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        let config: NetworkConfig = serde_json::from_str(&text)?;
        Ok(config.validated())
    }

    /// Returns a copy with every field clamped into its legal range
    pub fn validated(mut self) -> Self {
        self.buffer_size = self.buffer_size.clamp(1024, 65536);
        self.max_messages_per_frame = self.max_messages_per_frame.clamp(1, 100);
        self.server_tick_rate_hz = self.server_tick_rate_hz.clamp(10, 120);
        self.client_tick_rate_hz = self.client_tick_rate_hz.clamp(10, 120);
        self.max_retries = self.max_retries.clamp(1, 10);

        self.connection_timeout_secs =
            positive_or(self.connection_timeout_secs, DEFAULT_CONNECTION_TIMEOUT_SECS);
        self.retry_timeout_secs = positive_or(self.retry_timeout_secs, DEFAULT_RETRY_TIMEOUT_SECS);
        self.day_night_cycle_secs =
            positive_or(self.day_night_cycle_secs, DEFAULT_DAY_NIGHT_CYCLE_SECS);
        self
    }

    /// Falls back to the default when the field is not a positive, finite number
    pub fn connection_timeout(&self) -> Duration {
        secs_to_duration(self.connection_timeout_secs, DEFAULT_CONNECTION_TIMEOUT_SECS)
    }

    pub fn retry_timeout(&self) -> Duration {
        secs_to_duration(self.retry_timeout_secs, DEFAULT_RETRY_TIMEOUT_SECS)
    }

    /// Length of one fixed simulation step on the server
    pub fn server_timestep(&self) -> f32 {
        1.0 / self.server_tick_rate_hz.max(1) as f32
    }

    pub fn client_timestep(&self) -> f32 {
        1.0 / self.client_tick_rate_hz.max(1) as f32
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        fallback
    }
}

fn secs_to_duration(value: f32, fallback: f32) -> Duration {
    Duration::from_secs_f32(positive_or(value, fallback))
}
