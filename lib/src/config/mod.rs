//! Configuration module for wipe tower generation.
//!
//! This module provides the print-wide and per-filament settings the wipe
//! tower is built from, loadable from JSON with serde.

mod filament_config;
mod print_config;

pub use filament_config::{FilamentConfig, SkinnydipConfig};
pub use print_config::{GCodeFlavor, PrintConfig};
