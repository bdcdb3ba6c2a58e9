//! Small vector and rotation types carried in game messages
//!
//! World space is Y-up; the arena floor is the XZ plane.

use std::ops::{Add, AddAssign, Mul, Sub};

///Represents a vector in 2D space, used for movement input.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }
}

///Represents a vector in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn sqr_magnitude(&self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        self.sqr_magnitude().sqrt()
    }

    ///Returns the normalized vector, or zero for a zero-length input.
    pub fn normalize(&self) -> Vec3 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vec3::ZERO
        } else {
            self.scale(1.0 / mag)
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vec3 {
        Vec3 {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }

    pub fn dot(&self, other: &Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn distance(&self, other: &Vec3) -> f32 {
        (*other - *self).magnitude()
    }

    /// Linear interpolation, `t` clamped to `[0, 1]`
    pub fn lerp(&self, other: &Vec3, t: f32) -> Vec3 {
        let t = t.clamp(0.0, 1.0);
        *self + (*other - *self).scale(t)
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        self.scale(rhs)
    }
}

/// Rotation quaternion, stored x, y, z, w
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Quat::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Yaw-only rotation that makes +Z face `forward` projected on the floor
    pub fn look_rotation(forward: Vec3) -> Quat {
        let flat = Vec3::new(forward.x, 0.0, forward.z);
        if flat.sqr_magnitude() == 0.0 {
            return Quat::IDENTITY;
        }
        let half_yaw = flat.x.atan2(flat.z) * 0.5;
        Quat::new(0.0, half_yaw.sin(), 0.0, half_yaw.cos())
    }

    /// Rotates the +Z axis by this quaternion
    pub fn forward(&self) -> Vec3 {
        let Quat { x, y, z, w } = *self;
        Vec3::new(
            2.0 * (x * z + w * y),
            2.0 * (y * z - w * x),
            1.0 - 2.0 * (x * x + y * y),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_normalize() {
        let v = Vec3::new(3.0, 0.0, 4.0).normalize();
        assert_approx_eq!(v.magnitude(), 1.0, 1e-6);
        assert_approx_eq!(v.x, 0.6, 1e-6);
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
    }

    #[test]
    fn test_lerp_is_clamped() {
        let a = Vec3::ZERO;
        let b = Vec3::new(10.0, 0.0, 0.0);
        assert_approx_eq!(a.lerp(&b, 0.5).x, 5.0, 1e-6);
        assert_approx_eq!(a.lerp(&b, 2.0).x, 10.0, 1e-6);
    }

    #[test]
    fn test_look_rotation_faces_direction() {
        let q = Quat::look_rotation(Vec3::new(1.0, 5.0, 0.0));
        let forward = q.forward();
        assert_approx_eq!(forward.x, 1.0, 1e-5);
        assert_approx_eq!(forward.y, 0.0, 1e-5);
        assert_approx_eq!(forward.z, 0.0, 1e-5);
    }

    #[test]
    fn test_look_rotation_zero_is_identity() {
        assert_eq!(Quat::look_rotation(Vec3::new(0.0, 3.0, 0.0)), Quat::IDENTITY);
    }
}
