//! Bot input generation with sequencing
//!
//! The headless client has no keyboard, so a small random walker stands in
//! for the player: it wanders, aims at points around itself and fires at the
//! configured rate. Every generated input carries the next sequence number.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{FireMessage, NetworkConfig, PlayerInputMessage, Vec2, Vec3};

/// How long the bot keeps one move direction, in seconds
const DIRECTION_HOLD_RANGE: std::ops::Range<f32> = 0.5..2.0;
/// Chance per direction change that the bot stands still instead
const IDLE_CHANCE: f64 = 0.2;
const AIM_RADIUS: f32 = 8.0;
/// Chance per tick that the bot wants to shoot when the cooldown allows it
const ATTACK_CHANCE: f64 = 0.3;

/// One tick's worth of generated input
#[derive(Debug, Clone, PartialEq)]
pub struct BotInput {
    pub input: PlayerInputMessage,
    pub fire: Option<FireMessage>,
}

pub struct InputManager {
    rng: StdRng,
    next_sequence: u32,
    move_input: Vec2,
    aim_offset: Vec3,
    direction_timer: f32,
    fire_cooldown: f32,
    fire_interval: f32,
    bullet_damage: f32,
    bullet_speed: f32,
}

impl InputManager {
    pub fn new(config: &NetworkConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic bot, for tests and reproducible runs
    pub fn with_seed(config: &NetworkConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &NetworkConfig, rng: StdRng) -> Self {
        let fire_interval = if config.fire_rate_per_sec > 0.0 {
            1.0 / config.fire_rate_per_sec
        } else {
            f32::INFINITY
        };

        Self {
            rng,
            next_sequence: 1,
            move_input: Vec2::ZERO,
            aim_offset: Vec3::new(0.0, 0.0, AIM_RADIUS),
            direction_timer: 0.0,
            fire_cooldown: 0.0,
            fire_interval,
            bullet_damage: config.bullet_damage,
            bullet_speed: config.bullet_speed,
        }
    }

    /// Sequence number the next input will carry
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Produces the input for one tick of length `dt`, given where the player currently is
    pub fn update(&mut self, dt: f32, position: Vec3) -> BotInput {
        self.direction_timer -= dt;
        if self.direction_timer <= 0.0 {
            self.pick_direction();
        }

        let mouse_world_position = position + self.aim_offset;

        self.fire_cooldown = (self.fire_cooldown - dt).max(0.0);
        let wants_attack = self.rng.gen_bool(ATTACK_CHANCE);
        let fire = if wants_attack && self.fire_cooldown <= 0.0 {
            self.fire_cooldown = self.fire_interval;
            Some(FireMessage {
                fire_position: position,
                fire_direction: self.aim_offset.normalize(),
                damage: self.bullet_damage,
                bullet_speed: self.bullet_speed,
            })
        } else {
            None
        };

        let input = PlayerInputMessage {
            move_input: self.move_input,
            mouse_world_position,
            attack_pressed: fire.is_some(),
            sequence_number: self.next_sequence,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        BotInput { input, fire }
    }

    fn pick_direction(&mut self) {
        self.direction_timer = self.rng.gen_range(DIRECTION_HOLD_RANGE);

        self.move_input = if self.rng.gen_bool(IDLE_CHANCE) {
            Vec2::ZERO
        } else {
            let angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
            Vec2::new(angle.cos(), angle.sin())
        };

        let aim_angle = self.rng.gen_range(0.0..std::f32::consts::TAU);
        self.aim_offset = Vec3::new(aim_angle.cos() * AIM_RADIUS, 0.0, aim_angle.sin() * AIM_RADIUS);
    }
}

/// A random display name such as `Bot_4821`
pub fn random_player_name() -> String {
    format!("Bot_{:04}", rand::thread_rng().gen_range(0..10_000))
}
