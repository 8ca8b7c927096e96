//! G-code generation for the wipe tower.
//!
//! - [`flavor`]: firmware dialects behind the [`CommandFormatter`] strategy
//! - [`fragment`]: structured output with placeholders for the consumer
//! - [`writer`]: toolpath to G-code writer with preview and usage tracking
//! - [`purge_volumes`]: purge volume matrix between filaments
//! - [`wipe_tower`]: planning and generation of the tower itself
//! - [`multi_material`]: end-to-end coordination from a print configuration

pub mod flavor;
pub mod fragment;
pub mod multi_material;
pub mod purge_volumes;
pub mod wipe_tower;
pub mod writer;

pub use flavor::CommandFormatter;
pub use fragment::{GCodeChunk, GCodeFragment, Placeholder};
pub use multi_material::{MultiMaterialCoordinator, MultiMaterialLayer, WipeTowerBounds, WipeTowerOutput};
pub use purge_volumes::{PurgeVolumes, DEFAULT_PURGE_VOLUME};
pub use wipe_tower::{FilamentParameters, ToolChangeResult, WipeTower, WipeTowerConfig};
pub use writer::{Extrusion, WipeTowerWriter};
