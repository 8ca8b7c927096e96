//! Multi-material wipe tower generator.
//!
//! Produces the toolpaths and G-code of the sacrificial tower a
//! multi-material printer uses to purge filament on every tool switch:
//! ramming and unloading of the old filament, loading and wiping of the new
//! one, sparse infill of unused tower area, the stabilization cone, the
//! first layer brim and the priming lines printed before the first layer.
//!
//! The entry points are [`gcode::wipe_tower::WipeTower`] for direct control
//! of the plan and [`gcode::multi_material::MultiMaterialCoordinator`] for
//! building everything from a [`config::PrintConfig`].

pub mod clipper;
pub mod config;
pub mod flow;
pub mod gcode;
pub mod geometry;

pub use config::{FilamentConfig, GCodeFlavor, PrintConfig, SkinnydipConfig};
pub use gcode::multi_material::{MultiMaterialCoordinator, MultiMaterialLayer, WipeTowerOutput};
pub use gcode::wipe_tower::{ToolChangeResult, WipeTower, WipeTowerConfig};
pub use geometry::{BoxCoordinates, Vec2f};

/// Floating point coordinate type used by the configuration (mm).
pub type CoordF = f64;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Broad class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller violated an ordering or format requirement
    Precondition,
    /// Settings are inconsistent with each other or with the plan
    Configuration,
    /// The tower cannot be laid out with the given dimensions
    Geometry,
    Io,
}

/// Error type for wipe tower operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("layer at z={z} planned after z={last_z}")]
    NonMonotonicLayer { z: f32, last_z: f32 },

    #[error("filament {0} was never registered")]
    UnregisteredFilament(usize),

    #[error("invalid ramming parameters {value:?}: {reason}")]
    InvalidRammingParameters { value: String, reason: String },

    #[error("negative wipe volume {volume} for toolchange {old_tool} -> {new_tool}")]
    NegativeWipeVolume {
        old_tool: usize,
        new_tool: usize,
        volume: f32,
    },

    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NonMonotonicLayer { .. } | Error::InvalidRammingParameters { .. } => {
                ErrorCategory::Precondition
            }
            Error::UnregisteredFilament(_) | Error::NegativeWipeVolume { .. } | Error::Config(_) => {
                ErrorCategory::Configuration
            }
            Error::DegenerateGeometry(_) => ErrorCategory::Geometry,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
        }
    }
}

/// Result type alias for wipe tower operations.
pub type Result<T> = std::result::Result<T, Error>;
