//! Single precision 2D vector used for wipe tower coordinates.
//!
//! Wipe tower geometry is computed in tower-local millimetres with `f32`
//! precision, matching the precision of the emitted G-code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A 2D point or vector in millimetres.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2f {
    pub x: f32,
    pub y: f32,
}

impl Vec2f {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    #[inline]
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    #[inline]
    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Euclidean distance to another point.
    #[inline]
    pub fn distance_to(&self, other: &Self) -> f32 {
        (*self - *other).norm()
    }

    /// Rotate counter-clockwise about the origin by `angle` radians.
    pub fn rotate(&self, angle: f32) -> Self {
        let (sin_a, cos_a) = angle.sin_cos();
        Self::new(
            self.x * cos_a - self.y * sin_a,
            self.x * sin_a + self.y * cos_a,
        )
    }

    /// Rotate counter-clockwise about `center` by `angle` radians.
    pub fn rotate_about(&self, center: Self, angle: f32) -> Self {
        (*self - center).rotate(angle) + center
    }

    /// Component-wise comparison with a tolerance.
    #[inline]
    pub fn approx_eq(&self, other: &Self, eps: f32) -> bool {
        (self.x - other.x).abs() <= eps && (self.y - other.y).abs() <= eps
    }
}

impl Add for Vec2f {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y)
    }
}

impl AddAssign for Vec2f {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vec2f {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y)
    }
}

impl SubAssign for Vec2f {
    fn sub_assign(&mut self, other: Self) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Mul<f32> for Vec2f {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        Self::new(self.x * scalar, self.y * scalar)
    }
}

impl Neg for Vec2f {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

impl From<(f32, f32)> for Vec2f {
    fn from((x, y): (f32, f32)) -> Self {
        Self::new(x, y)
    }
}

impl fmt::Display for Vec2f {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_vec2f_operations() {
        let a = Vec2f::new(1.0, 2.0);
        let b = Vec2f::new(3.0, 5.0);

        let sum = a + b;
        assert!((sum.x - 4.0).abs() < 1e-6);
        assert!((sum.y - 7.0).abs() < 1e-6);

        let diff = b - a;
        assert!((diff.x - 2.0).abs() < 1e-6);
        assert!((diff.y - 3.0).abs() < 1e-6);

        let scaled = a * 2.0;
        assert!((scaled.y - 4.0).abs() < 1e-6);
        assert!((a.dot(&b) - 13.0).abs() < 1e-6);
    }

    #[test]
    fn test_vec2f_rotate() {
        let rotated = Vec2f::new(1.0, 0.0).rotate(FRAC_PI_2);
        assert!(rotated.x.abs() < 1e-6);
        assert!((rotated.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_vec2f_rotate_about() {
        let center = Vec2f::new(10.0, 10.0);
        let p = Vec2f::new(12.0, 10.0).rotate_about(center, FRAC_PI_2);
        assert!(p.approx_eq(&Vec2f::new(10.0, 12.0), 1e-5));
    }

    #[test]
    fn test_vec2f_distance() {
        let a = Vec2f::zero();
        let b = Vec2f::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-6);
        assert!(((-b).norm() - 5.0).abs() < 1e-6);
    }
}
