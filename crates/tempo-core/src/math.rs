//! Vector, quaternion and rectangle types
//!
//! Vectors and rotations are `glam`'s, built with `libm` so server and client
//! get bit-identical transcendental results on every platform. Collision works
//! on the x/y plane with [`FloatRect`].

pub use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle on the x/y plane, anchored at its bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatRect {
    pub left: f32,
    pub bottom: f32,
    pub width: f32,
    pub height: f32,
}

impl FloatRect {
    pub const fn new(left: f32, bottom: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            bottom,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn top(&self) -> f32 {
        self.bottom + self.height
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.left + self.width * 0.5, self.bottom + self.height * 0.5)
    }

    /// The same rectangle moved by `offset`
    pub fn translated(&self, offset: Vec2) -> FloatRect {
        FloatRect::new(
            self.left + offset.x,
            self.bottom + offset.y,
            self.width,
            self.height,
        )
    }

    /// Smallest rectangle containing both
    pub fn union(&self, other: &FloatRect) -> FloatRect {
        let left = self.left.min(other.left);
        let bottom = self.bottom.min(other.bottom);
        let right = self.right().max(other.right());
        let top = self.top().max(other.top());
        FloatRect::new(left, bottom, right - left, top - bottom)
    }

    /// Overlapping region, if the rectangles intersect with non-zero area
    pub fn intersection(&self, other: &FloatRect) -> Option<FloatRect> {
        let left = self.left.max(other.left);
        let bottom = self.bottom.max(other.bottom);
        let right = self.right().min(other.right());
        let top = self.top().min(other.top());

        if left < right && bottom < top {
            Some(FloatRect::new(left, bottom, right - left, top - bottom))
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &FloatRect) -> bool {
        self.intersection(other).is_some()
    }
}
