//! Print bed geometry used to place the priming lines.

use super::Vec2f;
use geo::{BoundingRect, MultiPoint};
use serde::{Deserialize, Serialize};

/// Rough classification of the bed outline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BedShape {
    #[default]
    Rectangular,
    Circular,
    Custom,
}

/// Bed outline summary: shape, bounding width and reference corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedGeometry {
    pub shape: BedShape,
    /// Width of the bounding box of the outline.
    pub width: f32,
    /// First outline point for rectangular beds, origin otherwise.
    pub bottom_left: Vec2f,
    pub center: Vec2f,
}

impl Default for BedGeometry {
    fn default() -> Self {
        Self::from_points(&[[0.0, 0.0], [250.0, 0.0], [250.0, 210.0], [0.0, 210.0]])
    }
}

impl BedGeometry {
    /// Classify a bed outline.
    ///
    /// Four points make a rectangular bed. Anything else is circular when
    /// every point lies close to the circle inscribed in the bounding box
    /// and custom otherwise.
    pub fn from_points(points: &[[f64; 2]]) -> Self {
        let multi: MultiPoint<f64> = points.iter().map(|p| (p[0], p[1])).collect::<Vec<_>>().into();
        let Some(rect) = multi.bounding_rect() else {
            return Self {
                shape: BedShape::Custom,
                width: 0.0,
                bottom_left: Vec2f::zero(),
                center: Vec2f::zero(),
            };
        };

        let width = rect.width();
        let center = rect.center();
        let mut shape = if points.len() == 4 {
            BedShape::Rectangular
        } else {
            BedShape::Circular
        };

        if shape == BedShape::Circular {
            let r2 = (width / 2.0).powi(2);
            let lim2 = (width / 10.0).powi(2);
            let off_circle = points.iter().any(|p| {
                ((p[0] - center.x).powi(2) + (p[1] - center.y).powi(2) - r2).abs() > lim2
            });
            if off_circle {
                shape = BedShape::Custom;
            }
        }

        let bottom_left = match (shape, points.first()) {
            (BedShape::Rectangular, Some(p)) => Vec2f::new(p[0] as f32, p[1] as f32),
            _ => Vec2f::zero(),
        };

        Self {
            shape,
            width: width as f32,
            bottom_left,
            center: Vec2f::new(center.x as f32, center.y as f32),
        }
    }

    /// A circular bed of the given diameter centered at the origin.
    pub fn circular(diameter: f64, segments: usize) -> Self {
        let r = diameter / 2.0;
        let points: Vec<[f64; 2]> = (0..segments.max(8))
            .map(|i| {
                let a = i as f64 / segments.max(8) as f64 * std::f64::consts::TAU;
                [r * a.cos(), r * a.sin()]
            })
            .collect();
        Self::from_points(&points)
    }
}
