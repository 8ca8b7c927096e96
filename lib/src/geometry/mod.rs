//! Geometry primitives for the wipe tower.

mod bed;
mod bounding_box;
mod point;

pub use bed::{BedGeometry, BedShape};
pub use bounding_box::BoxCoordinates;
pub use point::Vec2f;
