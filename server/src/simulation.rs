//! Authoritative game simulation
//!
//! All game state lives here and is advanced once per frame by
//! [`ServerSimulation::update`]. Player physics runs in fixed steps taken from a
//! time accumulator; bullets are swept every frame and raycast against players
//! and the static world. Everything the clients need to know leaves through the
//! injected [`MessageSink`].

use crate::daytime::DayNightCycle;
use crate::entity::{spawn_position, PlayerState, ServerBullet};
use crate::physics::PhysicsQuery;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::Mutex;
use shared::{
    BulletDestroyMessage, BulletSpawnMessage, DestroyReason, FireMessage, HandlerId,
    HandlerResult, HandshakeMessage, MessageBody, MessageRouter, MessageSink, MessageType,
    NetworkConfig, NetworkMessage, PlayerInputMessage, PlayerJoinedMessage, PlayerLeftMessage,
    Quat, Vec3,
};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Mouse targets closer than this (squared, on the floor plane) leave the rotation alone
const MIN_AIM_DISTANCE_SQ: f32 = 0.01;

#[derive(Debug)]
struct SimulationClock {
    fixed_timestep: f32,
    accumulated: f32,
    state_timer: f32,
    elapsed: f32,
}

impl SimulationClock {
    /// Adds frame time and returns how many fixed steps are due
    fn accumulate(&mut self, frame_dt: f32) -> u32 {
        self.elapsed += frame_dt;
        self.accumulated += frame_dt;

        let mut steps = 0;
        while self.accumulated >= self.fixed_timestep {
            self.accumulated -= self.fixed_timestep;
            steps += 1;
        }
        steps
    }

    fn state_broadcast_due(&mut self, frame_dt: f32) -> bool {
        self.state_timer += frame_dt;
        if self.state_timer < self.fixed_timestep {
            return false;
        }
        self.state_timer -= self.fixed_timestep;
        if self.state_timer > self.fixed_timestep {
            self.state_timer = 0.0;
        }
        true
    }
}

enum BulletOutcome {
    Flying,
    HitPlayer,
    HitWall,
    Expired,
}

pub struct ServerSimulation {
    config: NetworkConfig,
    sink: Arc<dyn MessageSink>,
    world: Arc<dyn PhysicsQuery>,
    players: DashMap<i32, PlayerState>,
    bullets: Mutex<HashMap<u32, ServerBullet>>,
    next_bullet_id: Mutex<u32>,
    clock: Mutex<SimulationClock>,
    day_night: Mutex<DayNightCycle>,
}

impl ServerSimulation {
    pub fn new(
        config: NetworkConfig,
        sink: Arc<dyn MessageSink>,
        world: Arc<dyn PhysicsQuery>,
    ) -> Self {
        let fixed_timestep = config.server_timestep();
        info!(
            "Fixed timestep: {}s ({}Hz)",
            fixed_timestep, config.server_tick_rate_hz
        );

        ServerSimulation {
            day_night: Mutex::new(DayNightCycle::new(config.day_night_cycle_secs)),
            config,
            sink,
            world,
            players: DashMap::new(),
            bullets: Mutex::new(HashMap::new()),
            next_bullet_id: Mutex::new(1),
            clock: Mutex::new(SimulationClock {
                fixed_timestep,
                accumulated: 0.0,
                state_timer: 0.0,
                elapsed: 0.0,
            }),
        }
    }

    /// Hooks the message handlers into a router. Handlers hold a weak
    /// reference, so dropping the simulation turns them into no-ops.
    pub fn register_handlers(self: &Arc<Self>, router: &MessageRouter) -> Vec<HandlerId> {
        vec![
            router.register(
                MessageType::PlayerInput,
                bind(self, ServerSimulation::handle_input),
            ),
            router.register(MessageType::Fire, bind(self, ServerSimulation::handle_fire)),
            router.register(
                MessageType::Handshake,
                bind(self, ServerSimulation::handle_handshake),
            ),
        ]
    }

    pub fn player(&self, player_id: i32) -> Option<PlayerState> {
        self.players.get(&player_id).map(|state| state.clone())
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn bullet_count(&self) -> usize {
        self.bullets.lock().len()
    }

    /// Simulated seconds since start
    pub fn elapsed(&self) -> f32 {
        self.clock.lock().elapsed
    }

    /// Runs one frame of real time `frame_dt`
    pub fn update(&self, frame_dt: f32) {
        let (steps, fixed_timestep, now, broadcast_due) = {
            let mut clock = self.clock.lock();
            let steps = clock.accumulate(frame_dt);
            let broadcast_due = clock.state_broadcast_due(frame_dt);
            (steps, clock.fixed_timestep, clock.elapsed, broadcast_due)
        };

        for _ in 0..steps {
            self.simulate_physics(fixed_timestep);
        }

        self.update_bullets(frame_dt, now);

        if broadcast_due {
            self.broadcast_player_states();
        }

        let time_update = self.day_night.lock().advance(frame_dt);
        if let Some(message) = time_update {
            self.sink.send(NetworkMessage::new(message));
        }
    }

    fn simulate_physics(&self, dt: f32) {
        for mut state in self.players.iter_mut() {
            state.integrate(dt);
        }
    }

    pub fn on_client_connected(&self, player_id: i32) {
        let spawn = spawn_position(player_id);
        let state = PlayerState::new(player_id, spawn, self.config.player_max_health);
        let joined = PlayerJoinedMessage {
            player_id,
            player_name: state.name.clone(),
            spawn_position: spawn,
            health: state.health,
        };
        self.players.insert(player_id, state);

        self.sink.send(NetworkMessage::new(joined));
        info!("Player {} joined at {:?}", player_id, spawn);
    }

    pub fn on_client_disconnected(&self, player_id: i32) {
        if self.players.remove(&player_id).is_some() {
            self.sink
                .send(NetworkMessage::new(PlayerLeftMessage { player_id }));
            info!("Player {} left", player_id);
        }
    }

    fn handle_handshake(&self, message: &NetworkMessage, sender_id: i32) -> HandlerResult {
        let MessageBody::Handshake(handshake) = &message.body else {
            return Err(unexpected_body(message));
        };
        info!(
            "Handshake from client {}: {} (version {})",
            sender_id, handshake.player_name, handshake.client_version
        );

        if let Some(mut state) = self.players.get_mut(&sender_id) {
            if !handshake.player_name.is_empty() {
                state.name = handshake.player_name.clone();
            }
        }

        // The reply's target id is how the client learns who it is
        self.sink.send(NetworkMessage::to(
            sender_id,
            HandshakeMessage {
                player_name: "Server".to_string(),
                ..HandshakeMessage::default()
            },
        ));

        let existing: Vec<PlayerJoinedMessage> = self
            .players
            .iter()
            .filter(|state| state.player_id != sender_id)
            .map(|state| PlayerJoinedMessage {
                player_id: state.player_id,
                player_name: state.name.clone(),
                spawn_position: state.position,
                health: state.health,
            })
            .collect();

        let sent = existing.len();
        for joined in existing {
            debug!(
                "Sending existing player {} to client {}",
                joined.player_id, sender_id
            );
            self.sink.send(NetworkMessage::to(sender_id, joined));
        }
        if sent > 0 {
            info!("Sent {} existing player(s) to client {}", sent, sender_id);
        }
        Ok(())
    }

    fn handle_input(&self, message: &NetworkMessage, sender_id: i32) -> HandlerResult {
        let MessageBody::PlayerInput(input) = &message.body else {
            return Err(unexpected_body(message));
        };
        let Some(mut state) = self.players.get_mut(&sender_id) else {
            debug!("Input from unknown player {}", sender_id);
            return Ok(());
        };
        if !state.is_alive {
            return Ok(());
        }
        if !state.validator.validate(message).is_valid() {
            return Ok(());
        }

        apply_input(&mut state, input, self.config.player_move_speed);
        Ok(())
    }

    fn handle_fire(&self, message: &NetworkMessage, sender_id: i32) -> HandlerResult {
        let MessageBody::Fire(fire) = &message.body else {
            return Err(unexpected_body(message));
        };

        let shooter_alive = self
            .players
            .get(&sender_id)
            .map_or(false, |state| state.is_alive);
        if !shooter_alive {
            warn!("Fire rejected: player {} invalid state", sender_id);
            return Ok(());
        }

        let direction = fire.fire_direction.normalize();
        if direction == Vec3::ZERO {
            warn!("Fire rejected: player {} sent no direction", sender_id);
            return Ok(());
        }

        let bullet = self.spawn_bullet(sender_id, fire, direction);
        let spawn = BulletSpawnMessage {
            bullet_id: bullet.bullet_id,
            owner_id: sender_id,
            spawn_position: bullet.position,
            direction,
            speed: bullet.speed,
            damage: bullet.damage,
        };
        self.bullets.lock().insert(bullet.bullet_id, bullet);

        self.sink.send(NetworkMessage::new(spawn));
        debug!("Bullet spawned by player {}", sender_id);
        Ok(())
    }

    fn spawn_bullet(&self, owner_id: i32, fire: &FireMessage, direction: Vec3) -> ServerBullet {
        let speed = if fire.bullet_speed > 0.0 {
            fire.bullet_speed
        } else {
            self.config.bullet_speed
        };
        let damage = if fire.damage > 0.0 {
            fire.damage
        } else {
            self.config.bullet_damage
        };

        ServerBullet {
            bullet_id: self.next_bullet_id(),
            owner_id,
            position: fire.fire_position,
            direction,
            speed,
            damage,
            spawn_time: self.elapsed(),
            lifetime: self.config.bullet_lifetime_secs,
        }
    }

    fn next_bullet_id(&self) -> u32 {
        let mut next = self.next_bullet_id.lock();
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }

    fn update_bullets(&self, dt: f32, now: f32) {
        let mut destroyed = Vec::new();
        {
            let mut bullets = self.bullets.lock();
            bullets.retain(|&bullet_id, bullet| {
                let reason = match self.step_bullet(bullet, dt, now) {
                    BulletOutcome::Flying => return true,
                    BulletOutcome::HitPlayer => DestroyReason::HitPlayer,
                    BulletOutcome::HitWall => DestroyReason::HitWall,
                    BulletOutcome::Expired => DestroyReason::Timeout,
                };
                destroyed.push(BulletDestroyMessage { bullet_id, reason });
                false
            });
        }

        for message in destroyed {
            debug!("Bullet {} destroyed ({:?})", message.bullet_id, message.reason);
            self.sink.send(NetworkMessage::new(message));
        }
    }

    fn step_bullet(&self, bullet: &mut ServerBullet, dt: f32, now: f32) -> BulletOutcome {
        if bullet.is_expired(now) {
            return BulletOutcome::Expired;
        }

        let origin = bullet.advance(dt);
        let travel = bullet.speed * dt;

        let player_hit = self
            .players
            .iter()
            .filter(|state| state.player_id != bullet.owner_id && state.is_alive)
            .filter_map(|state| {
                state
                    .ray_hit_distance(origin, bullet.direction, travel, self.config.player_hit_radius)
                    .map(|distance| (state.player_id, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));
        let wall_hit = self.world.raycast(origin, bullet.direction, travel);

        match (player_hit, wall_hit) {
            (Some((player_id, distance)), wall) if wall.map_or(true, |w| distance <= w) => {
                self.damage_player(player_id, bullet);
                BulletOutcome::HitPlayer
            }
            (_, Some(_)) => BulletOutcome::HitWall,
            _ if bullet.out_of_bounds(self.config.map_half_extent) => BulletOutcome::Expired,
            _ => BulletOutcome::Flying,
        }
    }

    fn damage_player(&self, player_id: i32, bullet: &ServerBullet) {
        let Some(mut target) = self.players.get_mut(&player_id) else {
            return;
        };
        let killed = target.apply_damage(bullet.damage);
        info!(
            "Bullet {} hit player {}. Damage: {}, remaining HP: {}",
            bullet.bullet_id, player_id, bullet.damage, target.health
        );
        if killed {
            info!("Player {} killed player {}", bullet.owner_id, player_id);
        }
    }

    fn broadcast_player_states(&self) {
        let states: Vec<_> = self.players.iter().map(|state| state.to_message()).collect();
        for state in states {
            self.sink.send(NetworkMessage::new(state));
        }
    }
}

fn apply_input(state: &mut PlayerState, input: &PlayerInputMessage, move_speed: f32) {
    // Vertical velocity belongs to gravity, not input
    state.velocity = Vec3::new(
        input.move_input.x * move_speed,
        state.velocity.y,
        input.move_input.y * move_speed,
    );

    if input.mouse_world_position != Vec3::ZERO {
        let mut aim = input.mouse_world_position - state.position;
        aim.y = 0.0;
        if aim.sqr_magnitude() > MIN_AIM_DISTANCE_SQ {
            state.rotation = Quat::look_rotation(aim);
        }
    }

    state.last_processed_input = input.sequence_number;
}

fn bind<F>(
    simulation: &Arc<ServerSimulation>,
    handler: F,
) -> impl Fn(&NetworkMessage, i32) -> HandlerResult + Send + Sync + 'static
where
    F: Fn(&ServerSimulation, &NetworkMessage, i32) -> HandlerResult + Send + Sync + 'static,
{
    let weak: Weak<ServerSimulation> = Arc::downgrade(simulation);
    move |message, sender_id| match weak.upgrade() {
        Some(simulation) => handler(&simulation, message, sender_id),
        None => Ok(()),
    }
}

fn unexpected_body(message: &NetworkMessage) -> Box<dyn std::error::Error + Send + Sync> {
    format!("unexpected {:?} body", message.message_type()).into()
}
