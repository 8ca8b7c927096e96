//! Polygon union and offset for the wipe tower outline.
//!
//! The tower footprint is a box, optionally merged with the silhouette of
//! the stabilization cone. The brim is a series of outward offsets of that
//! footprint. Both operations go through geo-clipper; coordinates are scaled
//! by [`CLIPPER_SCALE`] so clipper works on micrometre integers.

use crate::geometry::Vec2f;
use geo::{Area, Coord as GeoCoord, LineString, MultiPolygon, Polygon as GeoPolygon};
use geo_clipper::{Clipper, EndType, JoinType};

/// Scale factor applied before handing coordinates to clipper.
pub const CLIPPER_SCALE: f64 = 1000.0;

/// Miter limit used for outline offsets, keeps box corners sharp.
const MITER_LIMIT: f64 = 3.0;

fn outline_to_geo(outline: &[Vec2f]) -> GeoPolygon<f64> {
    let mut ring: Vec<GeoCoord<f64>> = outline
        .iter()
        .map(|p| GeoCoord {
            x: p.x as f64,
            y: p.y as f64,
        })
        .collect();

    // Close the ring if needed
    if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
        if first != last {
            ring.push(first);
        }
    }

    GeoPolygon::new(LineString::new(ring), vec![])
}

fn geo_to_outline(poly: &GeoPolygon<f64>) -> Vec<Vec2f> {
    let mut points: Vec<Vec2f> = poly
        .exterior()
        .coords()
        .map(|c| Vec2f::new(c.x as f32, c.y as f32))
        .collect();

    // Drop the closing point, the writer closes loops itself
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

/// Outer contour of the largest polygon of a clipper result.
fn largest_outline(multi: &MultiPolygon<f64>) -> Vec<Vec2f> {
    multi
        .0
        .iter()
        .max_by(|a, b| a.unsigned_area().total_cmp(&b.unsigned_area()))
        .map(geo_to_outline)
        .unwrap_or_default()
}

/// Union of two simple outlines, returning the outer contour of the result.
pub fn union_outline(subject: &[Vec2f], clip: &[Vec2f]) -> Vec<Vec2f> {
    if subject.len() < 3 {
        return clip.to_vec();
    }
    if clip.len() < 3 {
        return subject.to_vec();
    }
    let merged = outline_to_geo(subject).union(&outline_to_geo(clip), CLIPPER_SCALE);
    largest_outline(&merged)
}

/// Offset an outline by `delta` millimetres using mitered corners.
///
/// Positive deltas grow the outline. An outline that vanishes under a
/// negative offset comes back empty.
pub fn offset_outline(outline: &[Vec2f], delta: f32) -> Vec<Vec2f> {
    if outline.len() < 3 {
        return Vec::new();
    }
    let offset = outline_to_geo(outline).offset(
        delta as f64,
        JoinType::Miter(MITER_LIMIT),
        EndType::ClosedPolygon,
        CLIPPER_SCALE,
    );
    largest_outline(&offset)
}

/// Area enclosed by an outline, in square millimetres.
pub fn outline_area(outline: &[Vec2f]) -> f32 {
    if outline.len() < 3 {
        return 0.0;
    }
    outline_to_geo(outline).unsigned_area() as f32
}
