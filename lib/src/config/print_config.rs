//! Print-wide configuration consumed by the wipe tower.
//!
//! Field names follow the usual slicer configuration keys so that a JSON
//! export of a printer profile can be deserialized directly.

use super::FilamentConfig;
use crate::CoordF;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// G-code dialect of the target firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GCodeFlavor {
    /// Marlin 1.x
    #[default]
    MarlinLegacy,
    /// Marlin 2.x
    MarlinFirmware,
    RepRapSprinter,
    RepRapFirmware,
    Klipper,
    Smoothie,
    Mach3,
}

/// Printer and print settings relevant to multi-material wipe tower output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintConfig {
    // === Wipe tower ===
    /// Left-down corner of the tower on the bed (mm).
    pub wipe_tower_x: CoordF,
    pub wipe_tower_y: CoordF,
    /// Tower width along X before rotation (mm).
    pub wipe_tower_width: CoordF,
    /// Rotation of the tower about its centre (degrees).
    pub wipe_tower_rotation_angle: CoordF,
    /// Maximal bridging distance of the sparse infill (mm).
    pub wipe_tower_bridging: CoordF,
    /// Stabilization cone apex angle (degrees, 0 = no cone).
    pub wipe_tower_cone_angle: CoordF,
    /// Spacing of purge lines relative to the extrusion width (%).
    pub wipe_tower_extra_spacing: CoordF,
    pub wipe_tower_brim_width: CoordF,
    /// Skip layers without toolchanges entirely.
    pub wipe_tower_no_sparse_layers: bool,
    /// 1-based extruder printing support interfaces (0 = use filament_soluble).
    pub wipe_tower_extruder: usize,
    /// Draw the first tower layer with solid infill.
    pub wipe_tower_first_layer_solid: bool,

    // === Speeds (mm/s) ===
    pub travel_speed: CoordF,
    pub infill_speed: CoordF,
    pub perimeter_speed: CoordF,
    pub first_layer_speed: CoordF,

    // === Printer ===
    pub gcode_flavor: GCodeFlavor,
    pub single_extruder_multi_material: bool,
    pub cooling_tube_retraction: CoordF,
    pub cooling_tube_length: CoordF,
    pub parking_pos_retraction: CoordF,
    pub extra_loading_move: CoordF,
    pub high_current_on_filament_swap: bool,
    /// Custom G-code run for every tool switch. `{previous_extruder}` and
    /// `{next_extruder}` are substituted, an empty template emits `T<next>`.
    pub toolchange_gcode: String,
    /// Bed outline points (mm).
    pub bed_shape: Vec<[CoordF; 2]>,

    // === Multi-material ===
    /// Row-major square matrix of purge volumes (mm³), from -> to.
    pub wiping_volumes_matrix: Vec<CoordF>,
    pub filaments: Vec<FilamentConfig>,
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            wipe_tower_x: 180.0,
            wipe_tower_y: 140.0,
            wipe_tower_width: 60.0,
            wipe_tower_rotation_angle: 0.0,
            wipe_tower_bridging: 10.0,
            wipe_tower_cone_angle: 0.0,
            wipe_tower_extra_spacing: 100.0,
            wipe_tower_brim_width: 2.0,
            wipe_tower_no_sparse_layers: false,
            wipe_tower_extruder: 0,
            wipe_tower_first_layer_solid: true,
            travel_speed: 130.0,
            infill_speed: 80.0,
            perimeter_speed: 60.0,
            first_layer_speed: 30.0,
            gcode_flavor: GCodeFlavor::MarlinLegacy,
            single_extruder_multi_material: false,
            cooling_tube_retraction: 91.5,
            cooling_tube_length: 5.0,
            parking_pos_retraction: 92.0,
            extra_loading_move: -2.0,
            high_current_on_filament_swap: false,
            toolchange_gcode: String::new(),
            bed_shape: vec![[0.0, 0.0], [250.0, 0.0], [250.0, 210.0], [0.0, 210.0]],
            wiping_volumes_matrix: Vec::new(),
            filaments: vec![FilamentConfig::default()],
        }
    }
}

impl PrintConfig {
    /// Configuration for `n` identical default filaments.
    pub fn with_filaments(n: usize) -> Self {
        Self {
            filaments: vec![FilamentConfig::default(); n],
            ..Self::default()
        }
    }

    /// Load from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse from a JSON string and validate.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn num_filaments(&self) -> usize {
        self.filaments.len()
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> crate::Result<()> {
        if self.filaments.is_empty() {
            return Err(crate::Error::Config("no filaments configured".into()));
        }
        let n = self.filaments.len();
        if !self.wiping_volumes_matrix.is_empty() && self.wiping_volumes_matrix.len() != n * n {
            return Err(crate::Error::Config(format!(
                "wiping_volumes_matrix has {} entries, expected {} for {} filaments",
                self.wiping_volumes_matrix.len(),
                n * n,
                n
            )));
        }
        if self.wipe_tower_extruder > n {
            return Err(crate::Error::Config(format!(
                "wipe_tower_extruder {} exceeds filament count {}",
                self.wipe_tower_extruder, n
            )));
        }
        if self.wipe_tower_width <= 0.0 {
            return Err(crate::Error::Config("wipe_tower_width must be positive".into()));
        }
        for (idx, filament) in self.filaments.iter().enumerate() {
            if filament.filament_diameter <= 0.0 || filament.nozzle_diameter <= 0.0 {
                return Err(crate::Error::Config(format!(
                    "filament {idx} needs positive filament and nozzle diameters"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_print_config_default() {
        let config = PrintConfig::default();
        assert!((config.wipe_tower_width - 60.0).abs() < 1e-9);
        assert_eq!(config.gcode_flavor, GCodeFlavor::MarlinLegacy);
        assert_eq!(config.bed_shape.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_print_config_from_json_partial() {
        let json = r#"{
            "wipe_tower_width": 45.0,
            "gcode_flavor": "klipper",
            "single_extruder_multi_material": true,
            "filaments": [{"filament_type": "PLA"}, {"filament_type": "PETG"}]
        }"#;
        let config = PrintConfig::from_json(json).unwrap();
        assert!((config.wipe_tower_width - 45.0).abs() < 1e-9);
        assert_eq!(config.gcode_flavor, GCodeFlavor::Klipper);
        assert_eq!(config.num_filaments(), 2);
        assert_eq!(config.filaments[1].filament_type, "PETG");
        // Unspecified keys keep their defaults
        assert!((config.travel_speed - 130.0).abs() < 1e-9);
    }

    #[test]
    fn test_print_config_rejects_bad_matrix() {
        let mut config = PrintConfig::with_filaments(2);
        config.wiping_volumes_matrix = vec![0.0, 70.0, 70.0];
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));
    }

    #[test]
    fn test_print_config_json_round_trip() {
        let config = PrintConfig::with_filaments(3);
        let json = config.to_json().unwrap();
        let parsed = PrintConfig::from_json(&json).unwrap();
        assert_eq!(parsed.num_filaments(), 3);
    }

    #[test]
    fn test_print_config_from_file() {
        let path = std::env::temp_dir().join(format!("wipetower-config-{}.json", std::process::id()));
        let mut config = PrintConfig::with_filaments(2);
        config.wipe_tower_x = 120.0;
        config.gcode_flavor = GCodeFlavor::RepRapFirmware;
        fs::write(&path, config.to_json().unwrap()).unwrap();

        let loaded = PrintConfig::from_file(&path);
        let _ = fs::remove_file(&path);
        let loaded = loaded.unwrap();
        assert!((loaded.wipe_tower_x - 120.0).abs() < 1e-9);
        assert_eq!(loaded.gcode_flavor, GCodeFlavor::RepRapFirmware);
        assert_eq!(loaded.num_filaments(), 2);
    }

    #[test]
    fn test_print_config_missing_file() {
        let path = std::env::temp_dir().join("wipetower-config-does-not-exist.json");
        let err = PrintConfig::from_file(path).unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
        assert_eq!(err.category(), crate::ErrorCategory::Io);
    }

    #[test]
    fn test_print_config_invalid_json() {
        assert!(matches!(
            PrintConfig::from_json("{ not json"),
            Err(crate::Error::Json(_))
        ));
    }
}
