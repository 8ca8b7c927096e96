//! Axis-aligned boxes described by their four corners.
//!
//! The wipe tower computes every extrusion boundary (cleaning boxes, fill
//! boxes, priming areas) as one of these boxes. Keeping all four corners
//! explicit makes the toolpath code read like the geometry it draws.

use super::Vec2f;

/// Box coordinates: left-down, left-up, right-down and right-up corners.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoxCoordinates {
    pub ld: Vec2f,
    pub lu: Vec2f,
    pub rd: Vec2f,
    pub ru: Vec2f,
}

impl BoxCoordinates {
    pub fn new(left: f32, bottom: f32, width: f32, height: f32) -> Self {
        Self {
            ld: Vec2f::new(left, bottom),
            lu: Vec2f::new(left, bottom + height),
            rd: Vec2f::new(left + width, bottom),
            ru: Vec2f::new(left + width, bottom + height),
        }
    }

    pub fn from_pos(pos: Vec2f, width: f32, height: f32) -> Self {
        Self::new(pos.x, pos.y, width, height)
    }

    pub fn translate(&mut self, shift: Vec2f) {
        self.ld += shift;
        self.lu += shift;
        self.rd += shift;
        self.ru += shift;
    }

    /// Grow (or shrink, for negative `offset`) the box on every side.
    pub fn expand(&mut self, offset: f32) {
        self.ld += Vec2f::new(-offset, -offset);
        self.lu += Vec2f::new(-offset, offset);
        self.rd += Vec2f::new(offset, -offset);
        self.ru += Vec2f::new(offset, offset);
    }

    pub fn width(&self) -> f32 {
        self.rd.x - self.ld.x
    }

    pub fn height(&self) -> f32 {
        self.lu.y - self.ld.y
    }

    pub fn center(&self) -> Vec2f {
        Vec2f::new(
            (self.ld.x + self.ru.x) / 2.0,
            (self.ld.y + self.ru.y) / 2.0,
        )
    }

    /// A box is degenerate when it encloses no area.
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Corners in counter-clockwise order starting at the left-down corner.
    pub fn corners(&self) -> [Vec2f; 4] {
        [self.ld, self.rd, self.ru, self.lu]
    }
}
