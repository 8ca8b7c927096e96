//! Per-filament configuration.

use crate::CoordF;
use serde::{Deserialize, Serialize};

/// Filament tip shaping by dipping into the melt zone before unloading.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinnydipConfig {
    pub enabled: bool,
    /// Set the toolchange temperature after the cooling moves without waiting.
    pub fast: bool,
    /// Dip depth below the cooling position (mm).
    pub distance: CoordF,
    /// Pause in the melt zone (ms).
    pub melt_zone_pause: u32,
    /// Pause in the cooling zone after extraction (ms).
    pub cooling_zone_pause: u32,
    /// Insertion speed (mm/s).
    pub insertion_speed: CoordF,
    /// Extraction speed (mm/s).
    pub extraction_speed: CoordF,
    /// Temperature used during the toolchange (°C, 0 = unchanged).
    pub toolchange_temperature: i32,
    /// Part fan speed during the toolchange (%, negative = untouched).
    pub toolchange_part_fan_speed: i32,
}

/// Physical and behavioral settings of one loaded filament.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FilamentConfig {
    /// Material name, e.g. "PLA", "PVA", "FLEX".
    pub filament_type: String,
    pub filament_diameter: CoordF,
    pub nozzle_diameter: CoordF,
    pub filament_soluble: bool,
    pub temperature: i32,
    pub first_layer_temperature: i32,

    // === Single extruder MM ===
    pub filament_loading_speed: CoordF,
    pub filament_loading_speed_start: CoordF,
    pub filament_unloading_speed: CoordF,
    pub filament_unloading_speed_start: CoordF,
    /// Pause after unloading (s).
    pub filament_toolchange_delay: CoordF,
    pub filament_cooling_moves: u32,
    pub filament_cooling_initial_speed: CoordF,
    pub filament_cooling_final_speed: CoordF,
    /// "<line width %> <step %> <speed0> <speed1> ...", flow samples in mm³/s.
    pub filament_ramming_parameters: String,

    // === Multi-nozzle ramming ===
    pub filament_multitool_ramming: bool,
    pub filament_multitool_ramming_volume: CoordF,
    pub filament_multitool_ramming_flow: CoordF,

    // === Limits ===
    /// mm³/s, 0 = unlimited.
    pub filament_max_volumetric_speed: CoordF,
    /// Minimal purge on the tower after a toolchange (mm³).
    pub filament_minimal_purge_on_wipe_tower: CoordF,
    /// Wipe speed override (% of the wipe speed, 0 = material default).
    pub filament_max_wipe_tower_speed: CoordF,

    pub skinnydip: SkinnydipConfig,
}

impl Default for FilamentConfig {
    fn default() -> Self {
        Self {
            filament_type: "PLA".to_string(),
            filament_diameter: 1.75,
            nozzle_diameter: 0.4,
            filament_soluble: false,
            temperature: 215,
            first_layer_temperature: 215,
            filament_loading_speed: 28.0,
            filament_loading_speed_start: 3.0,
            filament_unloading_speed: 90.0,
            filament_unloading_speed_start: 100.0,
            filament_toolchange_delay: 0.0,
            filament_cooling_moves: 4,
            filament_cooling_initial_speed: 2.2,
            filament_cooling_final_speed: 3.4,
            filament_ramming_parameters:
                "120 100 6.6 6.8 7.2 7.6 7.9 8.2 8.7 9.4 9.9 10.0".to_string(),
            filament_multitool_ramming: false,
            filament_multitool_ramming_volume: 10.0,
            filament_multitool_ramming_flow: 10.0,
            filament_max_volumetric_speed: 0.0,
            filament_minimal_purge_on_wipe_tower: 15.0,
            filament_max_wipe_tower_speed: 0.0,
            skinnydip: SkinnydipConfig::default(),
        }
    }
}
