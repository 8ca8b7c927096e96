//! Wipe Tower Generation for Multi-Material Printing
//!
//! The wipe tower is a sacrificial structure printed next to the model. Every
//! filament switch is performed above it: the old filament is rammed out and
//! unloaded, the new one is loaded and purged until the color is clean.
//!
//! ## Workflow
//!
//! 1. [`WipeTower::set_extruder`] registers the parameters of each filament.
//! 2. [`WipeTower::plan_toolchange`] is called bottom-up for every layer and
//!    every toolchange, building the plan and the depth each one needs.
//! 3. [`WipeTower::prime`] optionally produces the priming lines.
//! 4. [`WipeTower::generate`] converges the tower depth and replays the plan,
//!    producing one [`ToolChangeResult`] per toolchange per layer.
//! 5. [`WipeTower::final_purge`] unloads the last filament at the end.
//!
//! ## Key Concepts
//!
//! - **Ramming**: fast extrusion forcing molten filament out of the nozzle
//! - **Wiping**: back-and-forth strokes purging the new filament
//! - **Sparse infill**: fill of the tower area no toolchange used on a layer
//! - **Internal rotation**: every layer is drawn rotated 180° from the last

mod filament;
mod layer;
mod plan;
mod prime;
mod state;
mod toolchange;

pub use filament::{parse_ramming_parameters, FilamentParameters, RammingParameters, RAMMING_TIME_STEP};
pub use layer::get_wipe_tower_cone_base;
pub use plan::{ToolChange, WipeTowerInfo};
pub use state::GenerationState;
pub use toolchange::{plan_ramming, RammingMove};

use super::fragment::GCodeFragment;
use super::writer::{Extrusion, WipeTowerWriter};
use crate::config::{GCodeFlavor, PrintConfig};
use crate::flow;
use crate::geometry::{BedGeometry, Vec2f};
use crate::{Error, Result};
use tracing::{debug, info};

// ============================================================================
// Constants
// ============================================================================

/// Tolerance for depth and z comparisons (mm)
pub(crate) const WT_EPSILON: f32 = 1e-3;

/// Extrusion width relative to the nozzle diameter
pub const WIDTH_TO_NOZZLE_RATIO: f32 = 1.25;

/// Upper bound of the depth convergence passes
pub const MAX_CONVERGENCE_PASSES: usize = 5;

/// Travel feedrate between tower sections (mm/min)
pub(crate) const FAST_TRAVEL_FEEDRATE: f32 = 7200.0;

// ============================================================================
// Wipe Tower Configuration
// ============================================================================

/// Settings of the wipe tower, resolved from the print configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WipeTowerConfig {
    /// Left-down corner of the tower on the bed
    pub pos: Vec2f,
    pub width: f32,
    /// Rotation applied by the consumer when placing the tower (degrees)
    pub rotation_angle: f32,
    pub brim_width: f32,
    /// Stabilization cone apex angle (degrees)
    pub cone_angle: f32,
    /// Spacing multiplier of the purge lines
    pub extra_spacing: f32,
    /// Maximal unsupported span of the sparse infill (mm)
    pub bridging: f32,
    pub no_sparse_layers: bool,
    pub gcode_flavor: GCodeFlavor,
    /// Single extruder multi-material printer
    pub semm: bool,
    /// Speeds (mm/s)
    pub travel_speed: f32,
    pub infill_speed: f32,
    pub perimeter_speed: f32,
    pub first_layer_speed: f32,
    pub cooling_tube_retraction: f32,
    pub cooling_tube_length: f32,
    pub parking_pos_retraction: f32,
    pub extra_loading_move: f32,
    /// Raise the extruder motor current while ramming
    pub set_extruder_trimpot: bool,
    pub first_layer_solid_infill: bool,
    pub bed: BedGeometry,
}

impl Default for WipeTowerConfig {
    fn default() -> Self {
        Self {
            pos: Vec2f::new(180.0, 140.0),
            width: 60.0,
            rotation_angle: 0.0,
            brim_width: 2.0,
            cone_angle: 0.0,
            extra_spacing: 1.0,
            bridging: 10.0,
            no_sparse_layers: false,
            gcode_flavor: GCodeFlavor::MarlinLegacy,
            semm: false,
            travel_speed: 130.0,
            infill_speed: 80.0,
            perimeter_speed: 60.0,
            first_layer_speed: 30.0,
            cooling_tube_retraction: 91.5,
            cooling_tube_length: 5.0,
            parking_pos_retraction: 92.0,
            extra_loading_move: -2.0,
            set_extruder_trimpot: false,
            first_layer_solid_infill: true,
            bed: BedGeometry::default(),
        }
    }
}

impl WipeTowerConfig {
    /// Resolve tower settings from a print configuration.
    ///
    /// Zero speeds (auto speed) fall back to fixed values so the tower never
    /// emits a zero feedrate.
    pub fn from_print_config(config: &PrintConfig) -> Self {
        const DEFAULT_SPEED: f32 = 60.0;

        let or_default = |speed: f64, default: f32| {
            if speed > 0.0 {
                speed as f32
            } else {
                default
            }
        };
        let extra_spacing = if config.wipe_tower_extra_spacing > 0.0 {
            (config.wipe_tower_extra_spacing / 100.0) as f32
        } else {
            1.0
        };

        Self {
            pos: Vec2f::new(config.wipe_tower_x as f32, config.wipe_tower_y as f32),
            width: config.wipe_tower_width as f32,
            rotation_angle: config.wipe_tower_rotation_angle as f32,
            brim_width: config.wipe_tower_brim_width as f32,
            cone_angle: config.wipe_tower_cone_angle as f32,
            extra_spacing,
            bridging: config.wipe_tower_bridging as f32,
            no_sparse_layers: config.wipe_tower_no_sparse_layers,
            gcode_flavor: config.gcode_flavor,
            semm: config.single_extruder_multi_material,
            travel_speed: or_default(config.travel_speed, DEFAULT_SPEED),
            infill_speed: or_default(config.infill_speed, 80.0),
            perimeter_speed: or_default(config.perimeter_speed, 80.0),
            first_layer_speed: or_default(config.first_layer_speed, DEFAULT_SPEED / 2.0),
            cooling_tube_retraction: config.cooling_tube_retraction as f32,
            cooling_tube_length: config.cooling_tube_length as f32,
            parking_pos_retraction: config.parking_pos_retraction as f32,
            extra_loading_move: config.extra_loading_move as f32,
            set_extruder_trimpot: config.high_current_on_filament_swap,
            first_layer_solid_infill: config.wipe_tower_first_layer_solid,
            bed: BedGeometry::from_points(&config.bed_shape),
        }
    }
}

// ============================================================================
// Tool Change Result
// ============================================================================

/// Output of one toolchange, layer finish or priming sequence.
///
/// Positions are in tower-local coordinates. `start_pos` and `end_pos` have
/// the internal rotation applied, the `origin_*` variants do not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolChangeResult {
    pub print_z: f32,
    pub layer_height: f32,
    pub gcode: GCodeFragment,
    /// Extrusion records for path preview
    pub extrusions: Vec<Extrusion>,
    pub start_pos: Vec2f,
    pub end_pos: Vec2f,
    pub origin_start_pos: Vec2f,
    pub origin_end_pos: Vec2f,
    /// Rough time estimate (s)
    pub elapsed_time: f32,
    pub priming: bool,
    pub initial_tool: usize,
    pub new_tool: usize,
    /// The consumer must travel to `start_pos` explicitly
    pub force_travel: bool,
    /// Layer finish printed before the toolchange
    pub is_finish_first: bool,
    /// Path for the consumer's own non-extruding wipe
    pub wipe_path: Vec<Vec2f>,
}

impl ToolChangeResult {
    /// Sum of XY lengths of all extruding segments.
    pub fn total_extrusion_length_in_plane(&self) -> f32 {
        self.extrusions
            .windows(2)
            .filter(|pair| pair[1].width > 0.0)
            .map(|pair| (pair[1].pos - pair[0].pos).norm())
            .sum()
    }

    /// Append `second` to `self`, travelling between them if needed.
    ///
    /// End position, wipe path and new tool are taken from `second`.
    pub fn merge(mut self, second: ToolChangeResult) -> ToolChangeResult {
        if !self.end_pos.approx_eq(&second.start_pos, 1e-6) {
            self.gcode.push_str(&format!(
                "G1 X{:.3} Y{:.3} F{}\n",
                second.start_pos.x, second.start_pos.y, FAST_TRAVEL_FEEDRATE as i64
            ));
        }
        self.gcode.append(second.gcode);
        self.extrusions.extend(second.extrusions);
        self.end_pos = second.end_pos;
        self.origin_end_pos = second.origin_end_pos;
        self.wipe_path = second.wipe_path;
        self.new_tool = second.new_tool;
        self.elapsed_time += second.elapsed_time;
        self
    }
}

// ============================================================================
// Wipe Tower
// ============================================================================

/// Wipe tower generator: owns the filament parameters and the plan.
#[derive(Debug, Clone)]
pub struct WipeTower {
    config: WipeTowerConfig,
    filpar: Vec<FilamentParameters>,
    registered: Vec<bool>,
    perimeter_width: f32,
    initial_tool: usize,
    plan: Vec<WipeTowerInfo>,
    first_layer_idx: Option<usize>,
    wipe_tower_depth: f32,
    wipe_tower_height: f32,
    brim_width_real: f32,
    used_filament_length: Vec<f32>,
    used_filament_length_until_layer: Vec<(f32, Vec<f32>)>,
    num_tool_changes: u32,
    /// State left behind by the last generation pass
    session: Option<GenerationState>,
}

impl WipeTower {
    pub fn new(config: WipeTowerConfig, initial_tool: usize) -> Self {
        Self {
            config,
            filpar: Vec::new(),
            registered: Vec::new(),
            perimeter_width: 0.4 * WIDTH_TO_NOZZLE_RATIO,
            initial_tool,
            plan: Vec::new(),
            first_layer_idx: None,
            wipe_tower_depth: 0.0,
            wipe_tower_height: 0.0,
            brim_width_real: 0.0,
            used_filament_length: Vec::new(),
            used_filament_length_until_layer: Vec::new(),
            num_tool_changes: 0,
            session: None,
        }
    }

    /// Register the parameters of filament `idx`.
    ///
    /// The perimeter width follows the nozzle of the last registered
    /// filament; all nozzles are assumed to have the same diameter.
    pub fn set_extruder(&mut self, idx: usize, mut params: FilamentParameters) {
        if !self.config.semm && params.multitool_ramming_flow > 0.0 {
            params.multitool_ramming_time =
                params.multitool_ramming_volume / params.multitool_ramming_flow;
        }
        self.perimeter_width = params.nozzle_diameter * WIDTH_TO_NOZZLE_RATIO;

        if idx >= self.filpar.len() {
            self.filpar.resize(idx + 1, FilamentParameters::default());
            self.registered.resize(idx + 1, false);
        }
        if idx >= self.used_filament_length.len() {
            self.used_filament_length.resize(idx + 1, 0.0);
        }

        debug!(
            filament = idx,
            material = %params.material,
            soluble = params.is_soluble,
            ramming_samples = params.ramming_speed.len(),
            "registered filament"
        );
        self.filpar[idx] = params;
        self.registered[idx] = true;
    }

    pub fn config(&self) -> &WipeTowerConfig {
        &self.config
    }

    pub fn width(&self) -> f32 {
        self.config.width
    }

    pub fn position(&self) -> Vec2f {
        self.config.pos
    }

    pub fn rotation(&self) -> f32 {
        self.config.rotation_angle
    }

    pub fn perimeter_width(&self) -> f32 {
        self.perimeter_width
    }

    /// Depth of the tower including its outer perimeter.
    pub fn get_depth(&self) -> f32 {
        self.wipe_tower_depth
    }

    pub fn get_height(&self) -> f32 {
        self.wipe_tower_height
    }

    /// Width of the brim actually printed.
    pub fn get_brim_width(&self) -> f32 {
        self.brim_width_real
    }

    pub fn plan(&self) -> &[WipeTowerInfo] {
        &self.plan
    }

    /// Filament used per tool (mm) by the last generation.
    pub fn get_used_filament(&self) -> &[f32] {
        &self.used_filament_length
    }

    /// Cumulative filament use per tool after each layer, keyed by z.
    pub fn get_used_filament_until_layer(&self) -> &[(f32, Vec<f32>)] {
        &self.used_filament_length_until_layer
    }

    pub fn get_number_of_toolchanges(&self) -> u32 {
        self.num_tool_changes
    }

    /// Whether [`generate`](Self::generate) completed.
    pub fn finished(&self) -> bool {
        self.session.is_some()
    }

    /// Whether the last generated layer was closed by a layer finish.
    pub fn layer_finished(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.layer_finished)
    }

    /// First layer of the tower, the one carrying the brim.
    pub fn is_first_layer(&self, layer_idx: usize) -> bool {
        self.first_layer_idx == Some(layer_idx) || self.plan.is_empty()
    }

    /// Parameters of a registered filament.
    pub fn filament(&self, idx: usize) -> Result<&FilamentParameters> {
        match self.registered.get(idx) {
            Some(true) => Ok(&self.filpar[idx]),
            _ => Err(Error::UnregisteredFilament(idx)),
        }
    }

    /// Cross-section used to convert volumes to filament length.
    fn filament_area(&self) -> f32 {
        self.filpar
            .first()
            .map(|f| f.filament_area)
            .unwrap_or_else(|| flow::filament_area(1.75))
    }

    fn extrusion_flow(&self, layer_height: f32) -> f32 {
        flow::extrusion_flow(self.perimeter_width, layer_height, self.filament_area())
    }

    /// Purge line spacing of the state's layer.
    fn layer_spacing(&self, state: &GenerationState) -> f32 {
        self.plan
            .get(state.layer_idx)
            .map_or(self.config.extra_spacing, |layer| layer.extra_spacing)
    }

    /// Fresh state for a pass over the plan.
    pub fn new_state(&self) -> GenerationState {
        let mut state = GenerationState::new(self.initial_tool, self.filpar.len());
        if let Some(tc) = self.plan.iter().find_map(|layer| layer.tool_changes.first()) {
            state.current_tool = tc.old_tool;
        }
        state
    }

    /// Move the state to layer `layer_idx` of the plan.
    pub fn begin_layer(&self, state: &mut GenerationState, layer_idx: usize) -> Result<()> {
        let layer = self.plan.get(layer_idx).ok_or_else(|| {
            Error::DegenerateGeometry(format!("layer {layer_idx} is not in the plan"))
        })?;

        if layer_idx > state.layer_idx {
            state.num_layer_changes += 1;
        }
        state.layer_idx = layer_idx;
        state.z_pos = layer.z;
        state.layer_height = layer.height;
        state.depth_traversed = 0.0;
        state.layer_finished = false;
        state.extrusion_flow = self.extrusion_flow(layer.height);
        Ok(())
    }

    /// Writer for one program at the state's layer.
    fn writer(&self, state: &GenerationState) -> WipeTowerWriter {
        let mut writer = WipeTowerWriter::new(
            state.layer_height,
            self.perimeter_width,
            self.config.gcode_flavor,
            &self.filpar,
        );
        writer
            .set_extrusion_flow(state.extrusion_flow)
            .set_z(state.z_pos)
            .set_initial_tool(state.current_tool);
        writer
    }

    /// Package a writer's output.
    fn construct_tcr(
        &self,
        state: &GenerationState,
        writer: WipeTowerWriter,
        priming: bool,
        old_tool: usize,
        is_finish: bool,
    ) -> ToolChangeResult {
        let start_pos = writer.start_pos_rotated();
        let origin_start_pos = writer.unrotate(start_pos);
        let origin_end_pos = writer.pos();
        let end_pos = if priming { writer.pos() } else { writer.pos_rotated() };
        let elapsed_time = writer.elapsed_time();
        let (gcode, extrusions, wipe_path) = writer.into_parts();

        ToolChangeResult {
            print_z: state.z_pos,
            layer_height: state.layer_height,
            gcode,
            extrusions,
            start_pos,
            end_pos,
            origin_start_pos,
            origin_end_pos,
            elapsed_time,
            priming,
            initial_tool: old_tool,
            new_tool: state.current_tool,
            force_travel: false,
            is_finish_first: is_finish,
            wipe_path,
        }
    }

    /// Check that every tool referenced by the plan was registered.
    fn validate_plan(&self) -> Result<()> {
        self.filament(self.initial_tool)?;
        for tc in self.plan.iter().flat_map(|layer| &layer.tool_changes) {
            self.filament(tc.old_tool)?;
            self.filament(tc.new_tool)?;
        }
        Ok(())
    }

    /// Converge the plan and produce the G-code of every layer.
    ///
    /// The outer vector has one entry per planned layer. Each layer holds one
    /// result per toolchange, with the layer finish merged into one of them,
    /// or the layer finish alone when the layer has no toolchange.
    pub fn generate(&mut self) -> Result<Vec<Vec<ToolChangeResult>>> {
        if self.plan.is_empty() {
            return Ok(Vec::new());
        }
        self.validate_plan()?;

        info!(
            layers = self.plan.len(),
            flavor = self.config.gcode_flavor.formatter().name(),
            "generating wipe tower"
        );

        self.converge_depth()?;

        let mut state = self.new_state();
        self.used_filament_length_until_layer.clear();
        let mut result = Vec::with_capacity(self.plan.len());

        for layer_idx in 0..self.plan.len() {
            self.begin_layer(&mut state, layer_idx)?;
            state.internal_rotation += 180.0;

            let layer = &self.plan[layer_idx];
            state.y_shift = if layer.depth < self.wipe_tower_depth - self.perimeter_width {
                (self.wipe_tower_depth - layer.depth - self.perimeter_width) / 2.0
            } else {
                0.0
            };

            let new_tools: Vec<usize> = layer.tool_changes.iter().map(|tc| tc.new_tool).collect();
            let finish_after = self.first_toolchange_to_nonsoluble(&layer.tool_changes);

            let mut finish_layer_tcr = match finish_after {
                None => Some(self.finish_layer(&mut state)?),
                Some(_) => None,
            };

            let mut layer_result = Vec::with_capacity(new_tools.len());
            for (i, &tool) in new_tools.iter().enumerate() {
                layer_result.push(self.tool_change(&mut state, Some(tool))?);
                if finish_after == Some(i) {
                    finish_layer_tcr = Some(self.finish_layer(&mut state)?);
                }
            }

            if let Some(finish) = finish_layer_tcr {
                match finish_after {
                    Some(idx) => {
                        let tcr = std::mem::take(&mut layer_result[idx]);
                        layer_result[idx] = tcr.merge(finish);
                    }
                    None if layer_result.is_empty() => {
                        layer_result.push(ToolChangeResult {
                            force_travel: true,
                            ..finish
                        });
                    }
                    None => {
                        let first = std::mem::take(&mut layer_result[0]);
                        layer_result[0] = ToolChangeResult {
                            force_travel: true,
                            ..finish.merge(first)
                        };
                    }
                }
            }

            result.push(layer_result);

            let z = self.plan[layer_idx].z;
            match self.used_filament_length_until_layer.last_mut() {
                Some((last_z, used)) if *last_z == z => *used = state.used_filament_length.clone(),
                _ => self
                    .used_filament_length_until_layer
                    .push((z, state.used_filament_length.clone())),
            }
        }

        self.used_filament_length = state.used_filament_length.clone();
        self.num_tool_changes = state.num_tool_changes;
        self.brim_width_real = self.planned_brim_width();
        self.session = Some(state);

        info!(
            layers = result.len(),
            toolchanges = self.num_tool_changes,
            depth = self.wipe_tower_depth,
            height = self.wipe_tower_height,
            "wipe tower generated"
        );
        Ok(result)
    }

    /// Unload the current filament at the end of the print.
    pub fn final_purge(&mut self) -> Result<ToolChangeResult> {
        let mut state = match self.session.take() {
            Some(state) => state,
            None => {
                let mut state = self.new_state();
                if let Some(last) = self.plan.len().checked_sub(1) {
                    self.begin_layer(&mut state, last)?;
                }
                state
            }
        };
        let result = self.tool_change(&mut state, None);
        self.used_filament_length = state.used_filament_length.clone();
        self.session = Some(state);
        result
    }

    /// Per-layer (depth, required depths) used to detect convergence.
    fn depth_snapshot(&self) -> Vec<(f32, Vec<f32>)> {
        self.plan
            .iter()
            .map(|layer| {
                (
                    layer.depth,
                    layer.tool_changes.iter().map(|tc| tc.required_depth).collect(),
                )
            })
            .collect()
    }

    /// Index of the first toolchange switching to a non-soluble filament.
    fn first_toolchange_to_nonsoluble(&self, tool_changes: &[ToolChange]) -> Option<usize> {
        tool_changes
            .iter()
            .position(|tc| !self.filpar.get(tc.new_tool).is_some_and(|f| f.is_soluble))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(super) fn two_filament_tower(semm: bool) -> WipeTower {
        let config = WipeTowerConfig {
            semm,
            ..WipeTowerConfig::default()
        };
        let mut tower = WipeTower::new(config, 0);
        for idx in 0..2 {
            tower.set_extruder(
                idx,
                FilamentParameters {
                    ramming_speed: vec![5.0],
                    ..FilamentParameters::default()
                },
            );
        }
        tower
    }

    #[test]
    fn test_config_from_print_config() {
        let mut print = PrintConfig::with_filaments(2);
        print.first_layer_speed = 0.0;
        print.wipe_tower_extra_spacing = 150.0;
        let config = WipeTowerConfig::from_print_config(&print);
        assert_relative_eq!(config.first_layer_speed, 30.0);
        assert_relative_eq!(config.extra_spacing, 1.5);
        assert_eq!(config.bed.width, 250.0);
    }

    #[test]
    fn test_set_extruder_multitool_time() {
        let mut tower = WipeTower::new(WipeTowerConfig::default(), 0);
        tower.set_extruder(
            0,
            FilamentParameters {
                multitool_ramming: true,
                multitool_ramming_volume: 10.0,
                multitool_ramming_flow: 4.0,
                nozzle_diameter: 0.6,
                ..FilamentParameters::default()
            },
        );
        assert_relative_eq!(tower.filament(0).unwrap().multitool_ramming_time, 2.5);
        assert_relative_eq!(tower.perimeter_width(), 0.75);
        assert!(matches!(tower.filament(1), Err(Error::UnregisteredFilament(1))));
    }

    #[test]
    fn test_total_extrusion_length_skips_travels() {
        let tcr = ToolChangeResult {
            extrusions: vec![
                Extrusion::new(Vec2f::new(0.0, 0.0), 0.0, 0),
                Extrusion::new(Vec2f::new(10.0, 0.0), 0.5, 0),
                Extrusion::new(Vec2f::new(10.0, 5.0), 0.0, 0),
                Extrusion::new(Vec2f::new(13.0, 9.0), 0.5, 0),
            ],
            ..ToolChangeResult::default()
        };
        assert_relative_eq!(tcr.total_extrusion_length_in_plane(), 15.0);
    }

    #[test]
    fn test_merge_inserts_travel() {
        let mut first = ToolChangeResult {
            end_pos: Vec2f::new(1.0, 1.0),
            initial_tool: 0,
            new_tool: 1,
            ..ToolChangeResult::default()
        };
        first.gcode.push_str("; first\n");
        let mut second = ToolChangeResult {
            start_pos: Vec2f::new(5.0, 2.0),
            end_pos: Vec2f::new(9.0, 9.0),
            initial_tool: 1,
            new_tool: 1,
            wipe_path: vec![Vec2f::new(9.0, 9.0)],
            ..ToolChangeResult::default()
        };
        second.gcode.push_str("; second\n");

        let merged = first.merge(second);
        assert_eq!(merged.gcode.to_string(), "; first\nG1 X5.000 Y2.000 F7200\n; second\n");
        assert_eq!(merged.end_pos, Vec2f::new(9.0, 9.0));
        assert_eq!(merged.initial_tool, 0);
        assert_eq!(merged.wipe_path.len(), 1);
    }

    #[test]
    fn test_merge_without_gap_has_no_travel() {
        let first = ToolChangeResult {
            end_pos: Vec2f::new(1.0, 1.0),
            ..ToolChangeResult::default()
        };
        let second = ToolChangeResult {
            start_pos: Vec2f::new(1.0, 1.0),
            ..ToolChangeResult::default()
        };
        assert!(first.merge(second).gcode.is_empty());
    }

    #[test]
    fn test_generate_empty_plan() {
        let mut tower = two_filament_tower(false);
        assert!(tower.generate().unwrap().is_empty());
        assert!(!tower.finished());
    }

    #[test]
    fn test_plan_rejects_unregistered_tool() {
        let mut tower = WipeTower::new(WipeTowerConfig::default(), 0);
        tower.set_extruder(0, FilamentParameters::default());
        assert!(matches!(
            tower.plan_toolchange(0.2, 0.2, 0, 3, 20.0),
            Err(Error::UnregisteredFilament(3))
        ));
    }

    #[test]
    fn test_generate_single_toolchange() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 30.0).unwrap();
        let layers = tower.generate().unwrap();

        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].len(), 1);
        let tcr = &layers[0][0];
        assert_eq!(tcr.initial_tool, 0);
        assert_eq!(tcr.new_tool, 1);
        assert!(tcr.gcode.text_lines().any(|l| l.starts_with("G1")));
        assert!(tcr.elapsed_time > 0.0);
        assert!(tower.finished());
        assert_eq!(tower.get_number_of_toolchanges(), 1);
        assert!(tower.get_used_filament()[1] > 0.0);
    }

    #[test]
    fn test_final_purge_unloads_current_tool() {
        let mut tower = two_filament_tower(true);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 30.0).unwrap();
        tower.generate().unwrap();
        let purge = tower.final_purge().unwrap();
        assert_eq!(purge.initial_tool, 1);
        assert_eq!(purge.new_tool, 1);
        assert_eq!(purge.gcode.placeholders().count(), 0);
    }
}
