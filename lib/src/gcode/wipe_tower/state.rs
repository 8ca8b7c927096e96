//! Running state of one generation pass.

/// Mutable cursor threaded through the phases of one pass over the plan.
///
/// A fresh state is created for every pass: the depth convergence dry runs
/// and the final generation never share counters, filament usage or the
/// wiping direction.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationState {
    /// Index of the current layer in the plan
    pub(crate) layer_idx: usize,
    pub(crate) z_pos: f32,
    pub(crate) layer_height: f32,
    /// Filament feed per mm at the current layer height
    pub(crate) extrusion_flow: f32,
    /// Depth already used on this layer by toolchanges
    pub(crate) depth_traversed: f32,
    pub(crate) current_tool: usize,
    pub(crate) y_shift: f32,
    pub(crate) left_to_right: bool,
    /// Internal rotation of the current layer (degrees)
    pub(crate) internal_rotation: f32,
    pub(crate) num_tool_changes: u32,
    pub(crate) num_layer_changes: u32,
    /// Height of the printed part of the tower, used by the cone
    pub(crate) current_height: f32,
    /// Last temperature written, `None` when nothing was set yet
    pub(crate) old_temperature: Option<i32>,
    pub(crate) layer_finished: bool,
    pub(crate) used_filament_length: Vec<f32>,
}

impl GenerationState {
    pub fn new(initial_tool: usize, num_filaments: usize) -> Self {
        Self {
            layer_idx: 0,
            z_pos: 0.0,
            layer_height: 0.0,
            extrusion_flow: 0.0,
            depth_traversed: 0.0,
            current_tool: initial_tool,
            y_shift: 0.0,
            left_to_right: true,
            internal_rotation: 0.0,
            num_tool_changes: 0,
            num_layer_changes: 0,
            current_height: 0.0,
            old_temperature: None,
            layer_finished: false,
            used_filament_length: vec![0.0; num_filaments],
        }
    }

    pub fn layer_idx(&self) -> usize {
        self.layer_idx
    }

    pub fn current_tool(&self) -> usize {
        self.current_tool
    }

    pub fn depth_traversed(&self) -> f32 {
        self.depth_traversed
    }

    pub fn layer_finished(&self) -> bool {
        self.layer_finished
    }

    pub fn num_tool_changes(&self) -> u32 {
        self.num_tool_changes
    }

    pub fn internal_rotation(&self) -> f32 {
        self.internal_rotation
    }

    pub fn used_filament_length(&self) -> &[f32] {
        &self.used_filament_length
    }

    /// Add consumed filament to a tool's tally.
    pub(crate) fn record_usage(&mut self, tool: usize, length: f32) {
        if tool >= self.used_filament_length.len() {
            self.used_filament_length.resize(tool + 1, 0.0);
        }
        self.used_filament_length[tool] += length;
    }
}
