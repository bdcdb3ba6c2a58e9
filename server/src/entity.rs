use crate::validation::MessageValidator;
use shared::{PlayerStateMessage, Quat, Vec3};

/// Spawn points, picked by player id modulo the table length
pub const SPAWN_POSITIONS: [Vec3; 4] = [
    Vec3 { x: -5.0, y: 0.0, z: 0.0 },
    Vec3 { x: 5.0, y: 0.0, z: 0.0 },
    Vec3 { x: -5.0, y: 0.0, z: 5.0 },
    Vec3 { x: 5.0, y: 0.0, z: 5.0 },
];

pub fn spawn_position(player_id: i32) -> Vec3 {
    SPAWN_POSITIONS[player_id.rem_euclid(SPAWN_POSITIONS.len() as i32) as usize]
}

// Authoritative player representation
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub player_id: i32,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub health: f32,
    pub is_alive: bool,
    pub last_processed_input: u32,
    pub validator: MessageValidator,
}

impl PlayerState {
    pub fn new(player_id: i32, position: Vec3, health: f32) -> Self {
        PlayerState {
            player_id,
            name: format!("Player_{}", player_id),
            position,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            health,
            is_alive: true,
            last_processed_input: 0,
            validator: MessageValidator::new(),
        }
    }

    // Advance position by velocity; dead players stay put
    pub fn integrate(&mut self, dt: f32) {
        if self.is_alive {
            self.position += self.velocity * dt;
        }
    }

    /// Applies damage and returns true if this hit killed the player
    pub fn apply_damage(&mut self, damage: f32) -> bool {
        if !self.is_alive {
            return false;
        }
        self.health -= damage;
        if self.health <= 0.0 {
            self.health = 0.0;
            self.is_alive = false;
            return true;
        }
        false
    }

    /// Distance along a ray to this player's hit circle on the XZ plane.
    /// `direction` must be normalized.
    pub fn ray_hit_distance(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        radius: f32,
    ) -> Option<f32> {
        let dx = self.position.x - origin.x;
        let dz = self.position.z - origin.z;
        let flat_len_sq = direction.x * direction.x + direction.z * direction.z;
        if flat_len_sq == 0.0 {
            return None;
        }

        // Work in units of the full 3D ray so the result is comparable to max_distance
        let along = (dx * direction.x + dz * direction.z) / flat_len_sq;
        let closest_x = direction.x * along - dx;
        let closest_z = direction.z * along - dz;
        let miss_sq = closest_x * closest_x + closest_z * closest_z;
        let radius_sq = radius * radius;
        if miss_sq > radius_sq {
            return None;
        }

        let half_chord = ((radius_sq - miss_sq) / flat_len_sq).sqrt();
        let entry = along - half_chord;
        let distance = if entry >= 0.0 { entry } else { along + half_chord };
        (distance >= 0.0 && distance <= max_distance).then_some(distance)
    }

    pub fn to_message(&self) -> PlayerStateMessage {
        PlayerStateMessage {
            player_id: self.player_id,
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            health: self.health,
            is_alive: self.is_alive,
            last_processed_input: self.last_processed_input,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerBullet {
    pub bullet_id: u32,
    pub owner_id: i32,
    pub position: Vec3,
    pub direction: Vec3,
    pub speed: f32,
    pub damage: f32,
    pub spawn_time: f32,
    pub lifetime: f32,
}

impl ServerBullet {
    pub fn is_expired(&self, now: f32) -> bool {
        now - self.spawn_time > self.lifetime
    }

    /// Moves the bullet and returns the start of the swept segment
    pub fn advance(&mut self, dt: f32) -> Vec3 {
        let previous = self.position;
        self.position += self.direction * (self.speed * dt);
        previous
    }

    pub fn out_of_bounds(&self, half_extent: f32) -> bool {
        self.position.x.abs() > half_extent || self.position.z.abs() > half_extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_spawn_table_cycles() {
        assert_eq!(spawn_position(0), SPAWN_POSITIONS[0]);
        assert_eq!(spawn_position(1), SPAWN_POSITIONS[1]);
        assert_eq!(spawn_position(6), SPAWN_POSITIONS[2]);
        assert_eq!(spawn_position(7), SPAWN_POSITIONS[3]);
    }

    #[test]
    fn test_damage_kills_at_zero() {
        let mut player = PlayerState::new(1, Vec3::ZERO, 50.0);
        assert!(!player.apply_damage(25.0));
        assert!(player.apply_damage(30.0));
        assert!(!player.is_alive);
        assert_approx_eq!(player.health, 0.0);
        assert!(!player.apply_damage(10.0));
    }

    #[test]
    fn test_dead_player_does_not_move() {
        let mut player = PlayerState::new(1, Vec3::ZERO, 100.0);
        player.velocity = Vec3::new(1.0, 0.0, 0.0);
        player.integrate(0.5);
        assert_approx_eq!(player.position.x, 0.5);

        player.is_alive = false;
        player.integrate(0.5);
        assert_approx_eq!(player.position.x, 0.5);
    }

    #[test]
    fn test_ray_hits_circle_front_edge() {
        let player = PlayerState::new(1, Vec3::new(5.0, 0.0, 0.0), 100.0);
        let hit = player.ray_hit_distance(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0), 10.0, 0.5);
        assert_approx_eq!(hit.unwrap(), 4.5, 1e-5);
    }

    #[test]
    fn test_ray_ignores_height() {
        let player = PlayerState::new(1, Vec3::new(5.0, 0.0, 0.0), 100.0);
        let origin = Vec3::new(0.0, 1.0, 0.0);
        assert!(player
            .ray_hit_distance(origin, Vec3::new(1.0, 0.0, 0.0), 10.0, 0.5)
            .is_some());
    }

    #[test]
    fn test_ray_misses() {
        let player = PlayerState::new(1, Vec3::new(5.0, 0.0, 2.0), 100.0);
        let dir = Vec3::new(1.0, 0.0, 0.0);
        assert!(player.ray_hit_distance(Vec3::ZERO, dir, 10.0, 0.5).is_none());
        // Too short
        let near = PlayerState::new(1, Vec3::new(5.0, 0.0, 0.0), 100.0);
        assert!(near.ray_hit_distance(Vec3::ZERO, dir, 4.0, 0.5).is_none());
        // Behind the origin
        assert!(near
            .ray_hit_distance(Vec3::new(10.0, 0.0, 0.0), dir, 10.0, 0.5)
            .is_none());
    }

    #[test]
    fn test_bullet_expiry_and_bounds() {
        let mut bullet = ServerBullet {
            bullet_id: 1,
            owner_id: 1,
            position: Vec3::new(49.0, 0.0, 0.0),
            direction: Vec3::new(1.0, 0.0, 0.0),
            speed: 20.0,
            damage: 25.0,
            spawn_time: 1.0,
            lifetime: 3.0,
        };
        assert!(!bullet.is_expired(3.5));
        assert!(bullet.is_expired(4.5));

        let previous = bullet.advance(0.1);
        assert_approx_eq!(previous.x, 49.0);
        assert_approx_eq!(bullet.position.x, 51.0, 1e-5);
        assert!(bullet.out_of_bounds(50.0));
    }
}
