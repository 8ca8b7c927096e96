//! # Extrusion Flow Math
//!
//! Conversions between extruded volume, bead length and filament feed for
//! the wipe tower.
//!
//! ## Rounded Rectangle Cross-Section
//!
//! An extruded bead is approximated by a rectangle with semicircular ends.
//! Its cross-sectional area is:
//!
//! ```text
//! area = height × (width - height × (1 - π/4))
//! ```
//!
//! Every conversion below is built on this area. The inverse relation is
//! used by the preview log to recover the squashed bead width from an
//! extrusion move.

use std::f32::consts::PI;

/// Height-dependent part of the rounded rectangle: `h × (1 - π/4)`.
#[inline]
pub fn rounding_correction(layer_height: f32) -> f32 {
    layer_height * (1.0 - PI / 4.0)
}

/// Cross-sectional area (mm²) of a bead of the given width and height.
#[inline]
pub fn bead_cross_section(line_width: f32, layer_height: f32) -> f32 {
    layer_height * (line_width - rounding_correction(layer_height))
}

/// Cross-sectional area (mm²) of filament with the given diameter.
#[inline]
pub fn filament_area(diameter: f32) -> f32 {
    PI / 4.0 * diameter * diameter
}

/// Length of bead (mm) that holds `volume` mm³. Never negative.
pub fn volume_to_length(volume: f32, line_width: f32, layer_height: f32) -> f32 {
    let area = bead_cross_section(line_width, layer_height);
    if area <= 0.0 {
        return 0.0;
    }
    (volume / area).max(0.0)
}

/// Volume (mm³) held by a bead of the given length.
pub fn length_to_volume(length: f32, line_width: f32, layer_height: f32) -> f32 {
    (length * bead_cross_section(line_width, layer_height)).max(0.0)
}

/// Filament feed per millimetre of travel for a bead of the given geometry.
pub fn extrusion_flow(line_width: f32, layer_height: f32, filament_area: f32) -> f32 {
    if filament_area <= 0.0 {
        return 0.0;
    }
    bead_cross_section(line_width, layer_height) / filament_area
}

/// Width of the squashed bead left by feeding `e` mm of filament over
/// `length` mm of travel.
pub fn squashed_width(e: f32, filament_area: f32, length: f32, layer_height: f32) -> f32 {
    e * filament_area / (length * layer_height) + rounding_correction(layer_height)
}

/// Centre-to-centre spacing of adjacent beads of the given width.
pub fn bead_spacing(line_width: f32, layer_height: f32) -> f32 {
    line_width - rounding_correction(layer_height)
}
