use log::debug;
use shared::{
    BulletSpawnMessage, GameTimeMessage, NetworkConfig, PlayerInputMessage, PlayerJoinedMessage,
    PlayerStateMessage, Quat, Vec3,
};
use std::collections::{HashMap, VecDeque};

/// Upper bound on unconfirmed inputs kept for replay
const MAX_PENDING_INPUTS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayer {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: f32,
    pub is_alive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub name: String,
    /// Where the player is drawn; eases toward `target_position`
    pub position: Vec3,
    pub target_position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: f32,
    pub is_alive: bool,
    pub last_processed_input: u32,
}

impl RemotePlayer {
    fn new(name: String, position: Vec3, health: f32) -> Self {
        RemotePlayer {
            name,
            position,
            target_position: position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            health,
            is_alive: true,
            last_processed_input: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientBullet {
    pub owner_id: i32,
    pub position: Vec3,
    pub direction: Vec3,
    pub speed: f32,
}

/// Outcome of feeding one authoritative state of the local player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    /// Older than a state already applied
    Stale,
    /// Error above the snap distance; position replaced outright
    Snapped(f32),
    /// Small error, smoothed over the next frames
    Interpolating(f32),
}

/// Client-side view of the world: the predicted local player plus
/// interpolated remote players, bullets and the server clock.
pub struct ClientGameState {
    local_id: Option<i32>,
    local: Option<LocalPlayer>,
    pending_inputs: VecDeque<PlayerInputMessage>,
    last_acknowledged_input: u32,
    correction: Vec3,
    remote: HashMap<i32, RemotePlayer>,
    bullets: HashMap<u32, ClientBullet>,
    game_time: Option<GameTimeMessage>,
    move_speed: f32,
    snap_distance: f32,
    interpolation_speed: f32,
    timestep: f32,
}

impl ClientGameState {
    pub fn new(config: &NetworkConfig) -> Self {
        Self {
            local_id: None,
            local: None,
            pending_inputs: VecDeque::new(),
            last_acknowledged_input: 0,
            correction: Vec3::ZERO,
            remote: HashMap::new(),
            bullets: HashMap::new(),
            game_time: None,
            move_speed: config.player_move_speed,
            snap_distance: config.snap_distance,
            interpolation_speed: config.interpolation_speed,
            timestep: config.client_timestep(),
        }
    }

    pub fn local_id(&self) -> Option<i32> {
        self.local_id
    }

    pub fn set_local_id(&mut self, id: i32) {
        self.local_id = Some(id);
        // We may already know ourselves as a remote from the join broadcast
        if let Some(me) = self.remote.remove(&id) {
            self.local = Some(LocalPlayer {
                position: me.target_position,
                rotation: me.rotation,
                velocity: me.velocity,
                health: me.health,
                is_alive: me.is_alive,
            });
        }
    }

    pub fn local_player(&self) -> Option<&LocalPlayer> {
        self.local.as_ref()
    }

    pub fn remote_player(&self, id: i32) -> Option<&RemotePlayer> {
        self.remote.get(&id)
    }

    pub fn remote_players(&self) -> impl Iterator<Item = (&i32, &RemotePlayer)> {
        self.remote.iter()
    }

    pub fn bullets(&self) -> &HashMap<u32, ClientBullet> {
        &self.bullets
    }

    pub fn game_time(&self) -> Option<&GameTimeMessage> {
        self.game_time.as_ref()
    }

    pub fn pending_input_count(&self) -> usize {
        self.pending_inputs.len()
    }

    /// Applies an input locally right away and remembers it until the server confirms it
    pub fn apply_prediction(&mut self, input: &PlayerInputMessage) {
        let Some(local) = self.local.as_mut() else {
            return;
        };
        if !local.is_alive {
            return;
        }

        apply_input(local, input, self.move_speed);

        if self.pending_inputs.len() == MAX_PENDING_INPUTS {
            self.pending_inputs.pop_front();
        }
        self.pending_inputs.push_back(input.clone());
    }

    /// Advances prediction, pending corrections, remote interpolation and bullets
    pub fn update(&mut self, dt: f32) {
        let blend = (self.interpolation_speed * dt).min(1.0);

        if let Some(local) = self.local.as_mut() {
            if local.is_alive {
                local.position += local.velocity * dt;
            }
            let step = self.correction * blend;
            local.position += step;
            self.correction = self.correction - step;
        }

        for player in self.remote.values_mut() {
            player.position = player.position.lerp(&player.target_position, blend);
        }

        for bullet in self.bullets.values_mut() {
            bullet.position += bullet.direction * (bullet.speed * dt);
        }
    }

    /// Applies an authoritative state for any player
    pub fn apply_server_state(&mut self, state: &PlayerStateMessage) -> Option<Reconciliation> {
        if Some(state.player_id) == self.local_id {
            return Some(self.reconcile(state));
        }

        let player = self.remote.entry(state.player_id).or_insert_with(|| {
            RemotePlayer::new(
                format!("Player_{}", state.player_id),
                state.position,
                state.health,
            )
        });
        if state.last_processed_input < player.last_processed_input {
            debug!("Ignoring stale state for player {}", state.player_id);
            return None;
        }

        player.target_position = state.position;
        player.rotation = state.rotation;
        player.velocity = state.velocity;
        player.health = state.health;
        player.is_alive = state.is_alive;
        player.last_processed_input = state.last_processed_input;
        None
    }

    fn reconcile(&mut self, state: &PlayerStateMessage) -> Reconciliation {
        if state.last_processed_input < self.last_acknowledged_input {
            return Reconciliation::Stale;
        }
        self.last_acknowledged_input = state.last_processed_input;

        // Drop everything the server has already applied
        while self
            .pending_inputs
            .front()
            .map_or(false, |input| input.sequence_number <= state.last_processed_input)
        {
            self.pending_inputs.pop_front();
        }

        let mut replayed = LocalPlayer {
            position: state.position,
            rotation: state.rotation,
            velocity: state.velocity,
            health: state.health,
            is_alive: state.is_alive,
        };
        for input in &self.pending_inputs {
            apply_input(&mut replayed, input, self.move_speed);
            replayed.position += replayed.velocity * self.timestep;
        }

        let Some(local) = self.local.as_mut() else {
            self.local = Some(replayed);
            self.correction = Vec3::ZERO;
            return Reconciliation::Snapped(0.0);
        };

        local.health = replayed.health;
        local.is_alive = replayed.is_alive;

        let error = replayed.position - local.position;
        let distance = error.magnitude();
        if distance > self.snap_distance {
            debug!("Snapping local player, error {:.2}", distance);
            local.position = replayed.position;
            self.correction = Vec3::ZERO;
            Reconciliation::Snapped(distance)
        } else {
            self.correction = error;
            Reconciliation::Interpolating(distance)
        }
    }

    pub fn on_player_joined(&mut self, joined: &PlayerJoinedMessage) {
        if Some(joined.player_id) == self.local_id {
            if self.local.is_none() {
                self.local = Some(LocalPlayer {
                    position: joined.spawn_position,
                    rotation: Quat::IDENTITY,
                    velocity: Vec3::ZERO,
                    health: joined.health,
                    is_alive: true,
                });
            }
            return;
        }

        self.remote.insert(
            joined.player_id,
            RemotePlayer::new(
                joined.player_name.clone(),
                joined.spawn_position,
                joined.health,
            ),
        );
    }

    pub fn on_player_left(&mut self, player_id: i32) {
        self.remote.remove(&player_id);
    }

    pub fn on_bullet_spawn(&mut self, spawn: &BulletSpawnMessage) {
        self.bullets.insert(
            spawn.bullet_id,
            ClientBullet {
                owner_id: spawn.owner_id,
                position: spawn.spawn_position,
                direction: spawn.direction,
                speed: spawn.speed,
            },
        );
    }

    pub fn on_bullet_destroy(&mut self, bullet_id: u32) {
        self.bullets.remove(&bullet_id);
    }

    pub fn on_game_time(&mut self, time: &GameTimeMessage) {
        self.game_time = Some(time.clone());
    }
}

// Same movement rule as the server: input drives the horizontal plane only
fn apply_input(player: &mut LocalPlayer, input: &PlayerInputMessage, move_speed: f32) {
    player.velocity = Vec3::new(
        input.move_input.x * move_speed,
        player.velocity.y,
        input.move_input.y * move_speed,
    );

    if input.mouse_world_position != Vec3::ZERO {
        let mut aim = input.mouse_world_position - player.position;
        aim.y = 0.0;
        if aim.sqr_magnitude() > 0.01 {
            player.rotation = Quat::look_rotation(aim);
        }
    }
}
