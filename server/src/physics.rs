use shared::Vec3;

///Static geometry the server raycasts bullets against.
pub trait PhysicsQuery: Send + Sync {
    ///Returns the distance to the nearest surface hit within `max_distance`.
    /// `direction` must be normalized.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32>;
}

///Represents an axis-aligned static block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wall {
    ///The positional center of the block.
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Wall {
    pub fn new(center: Vec3, half_extents: Vec3) -> Self {
        Wall {
            center,
            half_extents,
        }
    }

    ///Slab test against the block's bounds.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        let axes = [
            (origin.x, direction.x, self.center.x, self.half_extents.x),
            (origin.y, direction.y, self.center.y, self.half_extents.y),
            (origin.z, direction.z, self.center.z, self.half_extents.z),
        ];

        let mut t_min = 0.0f32;
        let mut t_max = max_distance;
        for (o, d, c, h) in axes {
            let (low, high) = (c - h, c + h);
            if d.abs() < f32::EPSILON {
                // Parallel to this slab: must already be inside it
                if o < low || o > high {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (mut t0, mut t1) = ((low - o) * inv, (high - o) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

///The arena's static world.
#[derive(Debug, Clone, Default)]
pub struct StaticWorld {
    walls: Vec<Wall>,
}

impl StaticWorld {
    pub fn new(walls: Vec<Wall>) -> Self {
        StaticWorld { walls }
    }

    ///Four cover blocks placed away from the spawn points.
    pub fn arena() -> Self {
        let half = Vec3::new(1.0, 1.0, 1.0);
        StaticWorld::new(vec![
            Wall::new(Vec3::new(-12.0, 1.0, 12.0), half),
            Wall::new(Vec3::new(12.0, 1.0, 12.0), half),
            Wall::new(Vec3::new(-12.0, 1.0, -12.0), half),
            Wall::new(Vec3::new(12.0, 1.0, -12.0), half),
        ])
    }

    pub fn add_wall(&mut self, wall: Wall) {
        self.walls.push(wall);
    }

    pub fn walls(&self) -> &[Wall] {
        &self.walls
    }
}

impl PhysicsQuery for StaticWorld {
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        self.walls
            .iter()
            .filter_map(|wall| wall.raycast(origin, direction, max_distance))
            .min_by(|a, b| a.total_cmp(b))
    }
}
