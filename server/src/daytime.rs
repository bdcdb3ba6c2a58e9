use log::info;
use shared::GameTimeMessage;

const BROADCAST_INTERVAL_SECS: f32 = 1.0;

/// Server-owned day/night clock, announced to clients once a second and on every flip
#[derive(Debug, Clone)]
pub struct DayNightCycle {
    cycle_duration: f32,
    remaining: f32,
    is_night: bool,
    broadcast_timer: f32,
}

impl DayNightCycle {
    pub fn new(cycle_duration: f32) -> Self {
        DayNightCycle {
            cycle_duration,
            remaining: cycle_duration,
            is_night: false,
            broadcast_timer: 0.0,
        }
    }

    pub fn is_night(&self) -> bool {
        self.is_night
    }

    pub fn remaining(&self) -> f32 {
        self.remaining
    }

    /// Advances the clock; returns a message when clients should be told the time
    pub fn advance(&mut self, dt: f32) -> Option<GameTimeMessage> {
        self.remaining -= dt;
        if self.remaining <= 0.0 {
            self.is_night = !self.is_night;
            self.remaining = self.cycle_duration;
            self.broadcast_timer = 0.0;
            info!("=== {} ===", if self.is_night { "NIGHT" } else { "DAY" });
            return Some(self.to_message());
        }

        self.broadcast_timer += dt;
        if self.broadcast_timer >= BROADCAST_INTERVAL_SECS {
            self.broadcast_timer = 0.0;
            return Some(self.to_message());
        }
        None
    }

    pub fn to_message(&self) -> GameTimeMessage {
        GameTimeMessage {
            remaining_time: self.remaining,
            is_night: self.is_night,
            cycle_duration: self.cycle_duration,
        }
    }
}
