//! Toolchange planning and tower depth convergence.

use super::{WipeTower, MAX_CONVERGENCE_PASSES, WT_EPSILON};
use crate::flow;
use crate::{Error, Result};
use tracing::debug;

/// One planned filament switch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolChange {
    pub old_tool: usize,
    pub new_tool: usize,
    /// Tower depth reserved for ramming and wiping
    pub required_depth: f32,
    pub ramming_depth: f32,
    /// Length of the partial wipe line left over by the ramming
    pub first_wipe_line: f32,
    /// Volume to purge on the tower (mm³)
    pub wipe_volume: f32,
    /// Volume requested by the caller, before savings from the layer finish
    pub wipe_volume_total: f32,
}

/// One layer of the plan.
#[derive(Debug, Clone, PartialEq)]
pub struct WipeTowerInfo {
    pub z: f32,
    pub height: f32,
    /// Depth of the tower at this layer
    pub depth: f32,
    /// Purge line spacing multiplier
    pub extra_spacing: f32,
    pub tool_changes: Vec<ToolChange>,
}

impl WipeTowerInfo {
    pub fn new(z: f32, height: f32, extra_spacing: f32) -> Self {
        Self {
            z,
            height,
            depth: 0.0,
            extra_spacing,
            tool_changes: Vec::new(),
        }
    }

    /// Depth used by all toolchanges of this layer.
    pub fn toolchanges_depth(&self) -> f32 {
        self.tool_changes.iter().map(|tc| tc.required_depth).sum()
    }
}

impl WipeTower {
    /// Width available to purge lines.
    fn wipe_line_width(&self) -> f32 {
        self.config.width - 3.0 * self.perimeter_width
    }

    /// Depth needed to purge `volume` at the given layer height.
    fn wipe_depth(&self, volume: f32, layer_height: f32, spacing: f32) -> f32 {
        let length = (flow::volume_to_length(volume, self.perimeter_width, layer_height) / spacing).max(0.0);
        (length / self.wipe_line_width()).ceil() * self.perimeter_width * spacing
    }

    /// Append a toolchange (or an empty layer when `old_tool == new_tool`).
    ///
    /// Layers must be planned bottom-up. A layer is opened whenever `z`
    /// rises above the last planned one.
    pub fn plan_toolchange(
        &mut self,
        z: f32,
        layer_height: f32,
        old_tool: usize,
        new_tool: usize,
        wipe_volume: f32,
    ) -> Result<()> {
        if let Some(last) = self.plan.last() {
            if z < last.z - WT_EPSILON {
                return Err(Error::NonMonotonicLayer { z, last_z: last.z });
            }
        }
        self.filament(old_tool)?;
        self.filament(new_tool)?;
        if wipe_volume < 0.0 {
            return Err(Error::NegativeWipeVolume {
                old_tool,
                new_tool,
                volume: wipe_volume,
            });
        }
        let width = self.wipe_line_width();
        if width <= 0.0 {
            return Err(Error::DegenerateGeometry(format!(
                "tower width {} leaves no room for wipe lines",
                self.config.width
            )));
        }

        if self.plan.last().map_or(true, |last| last.z + WT_EPSILON < z) {
            self.plan.push(WipeTowerInfo::new(z, layer_height, self.config.extra_spacing));
        }
        if self.first_layer_idx.is_none()
            && (!self.config.no_sparse_layers || old_tool != new_tool || self.plan.len() == 1)
        {
            self.first_layer_idx = Some(self.plan.len() - 1);
        }
        if old_tool == new_tool {
            return Ok(());
        }

        let pw = self.perimeter_width;
        let spacing = self.plan.last().map_or(self.config.extra_spacing, |l| l.extra_spacing);
        let old = &self.filpar[old_tool];

        let (ramming_depth, first_wipe_line) = if self.config.semm || old.multitool_ramming {
            let time_step = if self.config.semm {
                super::RAMMING_TIME_STEP
            } else {
                old.multitool_ramming_time
            };
            let line_width = pw * old.ramming_line_width_multiplicator;
            let length = flow::volume_to_length(old.ramming_volume(time_step), line_width, layer_height);
            let lines = (length / width).floor() + 1.0;
            (
                lines * line_width * old.ramming_step_multiplicator * spacing,
                lines * width - length,
            )
        } else {
            (0.0, 0.0)
        };

        let first_wipe_volume = flow::length_to_volume(first_wipe_line, pw * spacing, layer_height);
        let wiping_depth = self.wipe_depth(wipe_volume - first_wipe_volume, layer_height, spacing);

        debug!(
            z,
            old_tool,
            new_tool,
            wipe_volume,
            ramming_depth,
            wiping_depth,
            "planned toolchange"
        );

        if let Some(layer) = self.plan.last_mut() {
            layer.tool_changes.push(ToolChange {
                old_tool,
                new_tool,
                required_depth: ramming_depth + wiping_depth,
                ramming_depth,
                first_wipe_line,
                wipe_volume,
                wipe_volume_total: wipe_volume,
            });
        }
        Ok(())
    }

    /// Compute the tower depth and propagate layer depths downwards.
    ///
    /// A layer is never shallower than any layer above it by more than two
    /// perimeters, so the tower stays self-supporting.
    pub(crate) fn plan_tower(&mut self) {
        self.wipe_tower_depth = 0.0;
        for layer in &mut self.plan {
            layer.depth = 0.0;
        }
        self.wipe_tower_height = self.plan.last().map_or(0.0, |layer| layer.z);

        let pw = self.perimeter_width;
        for idx in (0..self.plan.len()).rev() {
            let this_depth = self.plan[idx].depth.max(self.plan[idx].toolchanges_depth());
            self.plan[idx].depth = this_depth;
            if this_depth > self.wipe_tower_depth - pw {
                self.wipe_tower_depth = this_depth + pw;
            }
            for lower in self.plan[..idx].iter_mut() {
                if lower.depth - this_depth < 2.0 * pw {
                    lower.depth = this_depth;
                }
            }
        }
    }

    /// Plan the tower, then alternate purge savings and replanning until the
    /// depths settle. Returns the number of saving passes run.
    pub(crate) fn converge_depth(&mut self) -> Result<usize> {
        self.plan_tower();
        let initial = self.depth_snapshot();
        let passes = run_until_settled(MAX_CONVERGENCE_PASSES, initial, || {
            self.save_on_last_wipe()?;
            self.plan_tower();
            Ok(self.depth_snapshot())
        })?;
        debug!(passes, depth = self.wipe_tower_depth, "tower depth converged");
        Ok(passes)
    }

    /// Shrink the last non-soluble purge of each layer by what the layer
    /// finish extrudes anyway, never below the filament's minimal purge.
    pub(crate) fn save_on_last_wipe(&mut self) -> Result<()> {
        let pw = self.perimeter_width;
        let mut state = self.new_state();

        for layer_idx in 0..self.plan.len() {
            self.begin_layer(&mut state, layer_idx)?;
            if self.plan[layer_idx].tool_changes.is_empty() {
                continue;
            }

            let finish_after = self.first_toolchange_to_nonsoluble(&self.plan[layer_idx].tool_changes);
            if finish_after.is_none() {
                self.finish_layer(&mut state)?;
            }

            for i in 0..self.plan[layer_idx].tool_changes.len() {
                let new_tool = self.plan[layer_idx].tool_changes[i].new_tool;
                self.tool_change(&mut state, Some(new_tool))?;
                if finish_after != Some(i) {
                    continue;
                }

                let height = self.plan[layer_idx].height;
                let spacing = self.plan[layer_idx].extra_spacing;
                let finish = self.finish_layer(&mut state)?;
                let volume_to_save =
                    flow::length_to_volume(finish.total_extrusion_length_in_plane(), pw, height);

                let tc = &self.plan[layer_idx].tool_changes[i];
                let minimal = self.filpar[tc.new_tool].minimal_purge_on_wipe_tower;
                let volume_left = minimal.max(tc.wipe_volume_total - volume_to_save);
                let first_line_volume = flow::length_to_volume(tc.first_wipe_line, pw * spacing, height);
                let volume_to_wipe = (volume_left - first_line_volume).max(0.0);
                let required_depth = tc.ramming_depth + self.wipe_depth(volume_to_wipe, height, spacing);

                let tc = &mut self.plan[layer_idx].tool_changes[i];
                tc.required_depth = required_depth;
                tc.wipe_volume = volume_left;
            }
        }
        Ok(())
    }
}

/// Run `pass` until it reports the same state twice in a row, at most
/// `max_passes` times. Returns the number of passes run.
fn run_until_settled<S, F>(max_passes: usize, mut before: S, mut pass: F) -> Result<usize>
where
    S: PartialEq,
    F: FnMut() -> Result<S>,
{
    for done in 1..=max_passes {
        let after = pass()?;
        if after == before {
            return Ok(done);
        }
        before = after;
    }
    Ok(max_passes)
}

#[cfg(test)]
mod tests {
    use super::super::tests::two_filament_tower;
    use super::super::{FilamentParameters, WipeTowerConfig};
    use super::*;
    use approx::assert_relative_eq;

    /// SEMM tower of three filaments, the last one soluble, with a mix of
    /// small and large purges over 30 layers.
    fn soluble_tower() -> WipeTower {
        let config = WipeTowerConfig {
            semm: true,
            ..WipeTowerConfig::default()
        };
        let mut tower = WipeTower::new(config, 0);
        for idx in 0..3 {
            tower.set_extruder(
                idx,
                FilamentParameters {
                    ramming_speed: vec![4.0, 5.0, 6.0],
                    is_soluble: idx == 2,
                    minimal_purge_on_wipe_tower: 10.0,
                    ..FilamentParameters::default()
                },
            );
        }

        let mut current = 0;
        for layer in 0..30 {
            let z = 0.2 * (layer + 1) as f32;
            if layer % 4 == 3 {
                tower.plan_toolchange(z, 0.2, current, current, 0.0).unwrap();
                continue;
            }
            let next = (current + 1) % 3;
            let volume = if layer % 5 == 0 { 180.0 } else { 45.0 };
            tower.plan_toolchange(z, 0.2, current, next, volume).unwrap();
            current = next;
        }
        tower
    }

    fn wipe_volumes(tower: &WipeTower) -> Vec<f32> {
        tower
            .plan()
            .iter()
            .flat_map(|layer| layer.tool_changes.iter().map(|tc| tc.wipe_volume))
            .collect()
    }

    #[test]
    fn test_early_exit_matches_fixed_passes() {
        let mut settled = soluble_tower();
        let mut fixed = settled.clone();

        let passes = settled.converge_depth().unwrap();
        assert!(passes >= 1 && passes <= MAX_CONVERGENCE_PASSES);

        fixed.plan_tower();
        for _ in 0..MAX_CONVERGENCE_PASSES {
            fixed.save_on_last_wipe().unwrap();
            fixed.plan_tower();
        }

        assert_eq!(settled.depth_snapshot(), fixed.depth_snapshot());
        assert_eq!(settled.get_depth(), fixed.get_depth());
        assert_eq!(wipe_volumes(&settled), wipe_volumes(&fixed));
    }

    #[test]
    fn test_generate_uses_converged_depth() {
        let mut generated = soluble_tower();
        let mut converged = generated.clone();
        converged.converge_depth().unwrap();
        generated.generate().unwrap();

        assert_eq!(generated.depth_snapshot(), converged.depth_snapshot());
        assert_eq!(generated.get_depth(), converged.get_depth());
        assert_eq!(wipe_volumes(&generated), wipe_volumes(&converged));
    }

    #[test]
    fn test_settling_stops_on_repeated_state() {
        let mut calls = 0;
        let passes = run_until_settled(5, 10, || {
            calls += 1;
            Ok(10 + calls.min(2))
        })
        .unwrap();
        // 11, 12, 12
        assert_eq!(passes, 3);
        assert_eq!(calls, 3);

        let passes = run_until_settled(5, 1.5_f32, || Ok(1.5)).unwrap();
        assert_eq!(passes, 1);
    }

    #[test]
    fn test_settling_is_capped() {
        let mut calls = 0;
        let passes = run_until_settled(MAX_CONVERGENCE_PASSES, 0, || {
            calls += 1;
            Ok(calls)
        })
        .unwrap();
        assert_eq!(passes, MAX_CONVERGENCE_PASSES);
        assert_eq!(calls, MAX_CONVERGENCE_PASSES);
    }

    #[test]
    fn test_settling_propagates_errors() {
        let err = run_until_settled(5, 0, || Err::<i32, _>(Error::Config("broken".into())))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_plan_opens_layers_by_z() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 0, 0.0).unwrap();
        tower.plan_toolchange(0.4, 0.2, 0, 1, 50.0).unwrap();
        tower.plan_toolchange(0.4, 0.2, 1, 0, 50.0).unwrap();

        assert_eq!(tower.plan().len(), 2);
        assert!(tower.plan()[0].tool_changes.is_empty());
        assert_eq!(tower.plan()[1].tool_changes.len(), 2);
        assert!(tower.is_first_layer(0));
    }

    #[test]
    fn test_plan_rejects_descending_z() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.4, 0.2, 0, 1, 50.0).unwrap();
        assert!(matches!(
            tower.plan_toolchange(0.2, 0.2, 1, 0, 50.0),
            Err(Error::NonMonotonicLayer { .. })
        ));
    }

    #[test]
    fn test_plan_rejects_negative_volume() {
        let mut tower = two_filament_tower(false);
        assert!(matches!(
            tower.plan_toolchange(0.2, 0.2, 0, 1, -1.0),
            Err(Error::NegativeWipeVolume { .. })
        ));
    }

    #[test]
    fn test_plan_rejects_narrow_tower() {
        let config = super::super::WipeTowerConfig {
            width: 1.0,
            ..Default::default()
        };
        let mut tower = WipeTower::new(config, 0);
        tower.set_extruder(0, Default::default());
        tower.set_extruder(1, Default::default());
        assert!(matches!(
            tower.plan_toolchange(0.2, 0.2, 0, 1, 10.0),
            Err(Error::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_no_sparse_layers_skips_empty_first_layers() {
        let config = super::super::WipeTowerConfig {
            no_sparse_layers: true,
            ..Default::default()
        };
        let mut tower = WipeTower::new(config, 0);
        tower.set_extruder(0, Default::default());
        tower.set_extruder(1, Default::default());
        tower.plan_toolchange(0.2, 0.2, 0, 1, 10.0).unwrap();
        assert_eq!(tower.first_layer_idx, Some(0));

        let mut tower = WipeTower::new(
            super::super::WipeTowerConfig {
                no_sparse_layers: true,
                ..Default::default()
            },
            0,
        );
        tower.set_extruder(0, Default::default());
        tower.set_extruder(1, Default::default());
        tower.plan_toolchange(0.2, 0.2, 0, 0, 0.0).unwrap();
        tower.plan_toolchange(0.4, 0.2, 0, 0, 0.0).unwrap();
        // The very first layer always counts
        assert_eq!(tower.first_layer_idx, Some(0));
    }

    #[test]
    fn test_multitool_ramming_reserves_depth() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 0.0).unwrap();
        assert_eq!(tower.plan()[0].tool_changes[0].ramming_depth, 0.0);

        let mut tower = two_filament_tower(true);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 0.0).unwrap();
        let tc = &tower.plan()[0].tool_changes[0];
        assert!(tc.ramming_depth > 0.0);
        assert!(tc.first_wipe_line > 0.0);
        assert!(tc.first_wipe_line <= tower.wipe_line_width());
    }

    #[test]
    fn test_wipe_depth_whole_lines() {
        let tower = two_filament_tower(false);
        let pw = tower.perimeter_width();
        assert_eq!(tower.wipe_depth(0.0, 0.2, 1.0), 0.0);
        assert_eq!(tower.wipe_depth(-5.0, 0.2, 1.0), 0.0);
        let depth = tower.wipe_depth(100.0, 0.2, 1.0);
        let lines = depth / pw;
        assert_relative_eq!(lines, lines.round(), epsilon = 1e-4);
    }

    #[test]
    fn test_plan_tower_propagates_depth_down() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 20.0).unwrap();
        tower.plan_toolchange(0.4, 0.2, 1, 0, 200.0).unwrap();
        tower.plan_toolchange(0.6, 0.2, 0, 0, 0.0).unwrap();
        tower.plan_tower();

        let plan = tower.plan();
        assert!(plan[0].depth >= plan[1].depth - 1e-6);
        assert!(plan[1].depth >= plan[0].tool_changes[0].required_depth);
        assert_eq!(plan[2].depth, 0.0);
        assert_relative_eq!(tower.get_depth(), plan[1].depth + tower.perimeter_width());
        assert_relative_eq!(tower.get_height(), 0.6);
    }

    #[test]
    fn test_save_on_last_wipe_respects_minimal_purge() {
        let mut tower = two_filament_tower(false);
        tower.filpar[1].minimal_purge_on_wipe_tower = 15.0;
        tower.plan_toolchange(0.2, 0.2, 0, 1, 20.0).unwrap();
        tower.plan_toolchange(0.4, 0.2, 1, 0, 20.0).unwrap();
        tower.plan_toolchange(0.6, 0.2, 0, 0, 0.0).unwrap();
        tower.plan_tower();
        tower.save_on_last_wipe().unwrap();

        let tc = &tower.plan()[0].tool_changes[0];
        assert!(tc.wipe_volume <= tc.wipe_volume_total);
        assert!(tc.wipe_volume >= 15.0);
    }
}
