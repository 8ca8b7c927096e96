//! Per-filament parameters used by the wipe tower.

use crate::config::{PrintConfig, SkinnydipConfig};
use crate::flow;
use crate::{Error, Result};

/// Time quantum of one single-extruder ramming sample (s).
pub const RAMMING_TIME_STEP: f32 = 0.25;

/// Physical and behavioral constants of one filament.
///
/// Populated once per filament index through [`super::WipeTower::set_extruder`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilamentParameters {
    /// Material name, e.g. "PLA", "PVA", "FLEX"
    pub material: String,
    pub is_soluble: bool,
    pub temperature: i32,
    pub first_layer_temperature: i32,
    /// Loading speed (mm/s)
    pub loading_speed: f32,
    pub loading_speed_start: f32,
    /// Unloading speed (mm/s)
    pub unloading_speed: f32,
    pub unloading_speed_start: f32,
    /// Pause after unloading (s)
    pub delay: f32,
    pub cooling_moves: u32,
    pub cooling_initial_speed: f32,
    pub cooling_final_speed: f32,
    pub ramming_line_width_multiplicator: f32,
    pub ramming_step_multiplicator: f32,
    /// Maximal filament feed rate (mm/s of filament)
    pub max_e_speed: f32,
    /// Volumetric flow samples (mm³/s), one per ramming time step
    pub ramming_speed: Vec<f32>,
    pub nozzle_diameter: f32,
    /// Filament cross-section (mm²)
    pub filament_area: f32,
    pub multitool_ramming: bool,
    pub multitool_ramming_volume: f32,
    pub multitool_ramming_flow: f32,
    /// Duration of the single multitool ramming sample (s), derived
    pub multitool_ramming_time: f32,
    /// Minimal purge after loading this filament (mm³)
    pub minimal_purge_on_wipe_tower: f32,
    /// Wipe speed override (% of the wipe speed, 0 = material default)
    pub wipe_tower_speed_override: f32,
    pub skinnydip: SkinnydipConfig,
}

impl Default for FilamentParameters {
    fn default() -> Self {
        Self {
            material: "PLA".to_string(),
            is_soluble: false,
            temperature: 215,
            first_layer_temperature: 215,
            loading_speed: 0.0,
            loading_speed_start: 0.0,
            unloading_speed: 0.0,
            unloading_speed_start: 0.0,
            delay: 0.0,
            cooling_moves: 0,
            cooling_initial_speed: 0.0,
            cooling_final_speed: 0.0,
            ramming_line_width_multiplicator: 1.0,
            ramming_step_multiplicator: 1.0,
            max_e_speed: f32::MAX,
            ramming_speed: Vec::new(),
            nozzle_diameter: 0.4,
            filament_area: flow::filament_area(1.75),
            multitool_ramming: false,
            multitool_ramming_volume: 0.0,
            multitool_ramming_flow: 0.0,
            multitool_ramming_time: 0.0,
            minimal_purge_on_wipe_tower: 0.0,
            wipe_tower_speed_override: 0.0,
            skinnydip: SkinnydipConfig::default(),
        }
    }
}

/// Parsed form of a ramming parameters string.
#[derive(Debug, Clone, PartialEq)]
pub struct RammingParameters {
    pub line_width_multiplicator: f32,
    pub step_multiplicator: f32,
    pub speeds: Vec<f32>,
}

/// Parse `"<line width %> <step %> <speed0> <speed1> ..."`.
///
/// The two leading percentages are returned as fractions.
pub fn parse_ramming_parameters(value: &str) -> Result<RammingParameters> {
    let invalid = |reason: String| Error::InvalidRammingParameters {
        value: value.to_string(),
        reason,
    };

    let numbers = value
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f32>()
                .map_err(|_| invalid(format!("'{token}' is not a number")))
        })
        .collect::<Result<Vec<f32>>>()?;

    if numbers.len() < 2 {
        return Err(invalid("expected line width and step multipliers".into()));
    }
    if let Some(negative) = numbers.iter().find(|n| **n < 0.0 || !n.is_finite()) {
        return Err(invalid(format!("value {negative} out of range")));
    }

    Ok(RammingParameters {
        line_width_multiplicator: numbers[0] / 100.0,
        step_multiplicator: numbers[1] / 100.0,
        speeds: numbers[2..].to_vec(),
    })
}

impl FilamentParameters {
    /// Build parameters for filament `idx` of a print configuration.
    ///
    /// Single extruder MM settings are only read when the printer is SEMM,
    /// otherwise they stay at values that switch the SEMM moves off.
    pub fn from_config(config: &PrintConfig, idx: usize) -> Result<Self> {
        let filament = config
            .filaments
            .get(idx)
            .ok_or(Error::UnregisteredFilament(idx))?;

        let filament_area = flow::filament_area(filament.filament_diameter as f32);
        let is_soluble = if config.wipe_tower_extruder == 0 {
            filament.filament_soluble
        } else {
            idx != config.wipe_tower_extruder - 1
        };

        let mut params = Self {
            material: filament.filament_type.clone(),
            is_soluble,
            temperature: filament.temperature,
            first_layer_temperature: filament.first_layer_temperature,
            nozzle_diameter: filament.nozzle_diameter as f32,
            filament_area,
            minimal_purge_on_wipe_tower: filament.filament_minimal_purge_on_wipe_tower as f32,
            wipe_tower_speed_override: filament.filament_max_wipe_tower_speed as f32,
            skinnydip: filament.skinnydip.clone(),
            ..Self::default()
        };

        if filament.filament_max_volumetric_speed > 0.0 {
            params.max_e_speed = filament.filament_max_volumetric_speed as f32 / filament_area;
        }

        if config.single_extruder_multi_material {
            params.loading_speed = filament.filament_loading_speed as f32;
            params.loading_speed_start = filament.filament_loading_speed_start as f32;
            params.unloading_speed = filament.filament_unloading_speed as f32;
            params.unloading_speed_start = filament.filament_unloading_speed_start as f32;
            params.delay = filament.filament_toolchange_delay as f32;
            params.cooling_moves = filament.filament_cooling_moves;
            params.cooling_initial_speed = filament.filament_cooling_initial_speed as f32;
            params.cooling_final_speed = filament.filament_cooling_final_speed as f32;

            let ramming = parse_ramming_parameters(&filament.filament_ramming_parameters)?;
            params.ramming_line_width_multiplicator = ramming.line_width_multiplicator;
            params.ramming_step_multiplicator = ramming.step_multiplicator;
            params.ramming_speed = ramming.speeds;
        } else {
            // A single flow sample lasting volume / flow seconds
            params.multitool_ramming = filament.filament_multitool_ramming;
            params.multitool_ramming_volume = filament.filament_multitool_ramming_volume as f32;
            params.multitool_ramming_flow = filament.filament_multitool_ramming_flow as f32;
            params.ramming_line_width_multiplicator = 2.0;
            params.ramming_step_multiplicator = 1.0;
            params.ramming_speed = vec![params.multitool_ramming_flow];
        }

        Ok(params)
    }

    /// Total ramming volume (mm³) of the profile for the given time step.
    pub fn ramming_volume(&self, time_step: f32) -> f32 {
        self.ramming_speed.iter().sum::<f32>() * time_step
    }

    /// Fraction of the wipe speed this material tolerates at `print_z`.
    pub fn wipe_speed_factor(&self, print_z: f32) -> f32 {
        if self.wipe_tower_speed_override > 0.0 {
            return self.wipe_tower_speed_override / 100.0;
        }
        match self.material.to_uppercase().as_str() {
            "PVA" => {
                if print_z < 0.8 {
                    0.6
                } else {
                    0.8
                }
            }
            "SCAFF" | "FLEX" => 0.35,
            _ if self.is_soluble => 0.35,
            _ => 1.0,
        }
    }
}
