//! Priming lines printed along the bed edge before the first layer.

use super::toolchange::{NORMAL_CURRENT, RAMMING_CURRENT};
use super::{GenerationState, ToolChangeResult, WipeTower, FAST_TRAVEL_FEEDRATE};
use crate::gcode::purge_volumes::PurgeVolumes;
use crate::geometry::{BedShape, BoxCoordinates, Vec2f};
use crate::Result;
use tracing::info;

/// Volume purged by every tool that is unloaded again after priming (mm³)
const PRIMING_WIPE_VOLUME: f32 = 20.0;

/// Upper bound of the width of one priming box (mm)
const MAX_PRIME_SECTION_WIDTH: f32 = 60.0;

const PRIME_BOX_DEPTH: f32 = 100.0;

impl WipeTower {
    /// Boxes holding the priming lines of `count` tools, in bed coordinates.
    ///
    /// Rectangular and custom beds get the boxes along the front edge from the
    /// left corner. On circular beds the row is centered and pushed to the
    /// front until it fits inside the circle.
    pub fn priming_boxes(&self, count: usize) -> Vec<BoxCoordinates> {
        if count == 0 {
            return Vec::new();
        }
        let bed = &self.config.bed;
        let section_width = (0.9 * bed.width / count as f32).min(MAX_PRIME_SECTION_WIDTH);

        let first = match bed.shape {
            BedShape::Circular => {
                let half = count as f32 * section_width / 2.0;
                let front = ((bed.width / 2.0).powi(2) - (1.05 * half).powi(2)).max(0.0).sqrt();
                let mut bx = BoxCoordinates::new(0.0, 0.0, section_width, PRIME_BOX_DEPTH);
                bx.translate(bed.center + Vec2f::new(-half, -front));
                bx
            }
            BedShape::Rectangular | BedShape::Custom => {
                let mut bx = BoxCoordinates::new(
                    0.02 * bed.width,
                    0.01 + self.perimeter_width / 2.0,
                    section_width,
                    PRIME_BOX_DEPTH,
                );
                bx.translate(bed.bottom_left);
                bx
            }
        };

        (0..count)
            .map(|i| {
                let mut bx = first;
                bx.translate(Vec2f::new(i as f32 * section_width, 0.0));
                bx
            })
            .collect()
    }

    /// Load every tool of `tools` once and purge it on the bed.
    ///
    /// Returns one result per tool. All tools except the last are unloaded
    /// again; the last one stays loaded and continues printing. Positions of
    /// the results are bed coordinates, no tower rotation applies.
    pub fn prime(
        &self,
        first_layer_height: f32,
        tools: &[usize],
        purge: &PurgeVolumes,
    ) -> Result<Vec<ToolChangeResult>> {
        let Some(&first_tool) = tools.first() else {
            return Ok(Vec::new());
        };
        for &tool in tools {
            self.filament(tool)?;
        }

        let mut state = GenerationState::new(first_tool, self.filpar.len());
        state.z_pos = first_layer_height;
        state.layer_height = first_layer_height;
        state.extrusion_flow = self.extrusion_flow(first_layer_height);

        let boxes = self.priming_boxes(tools.len());
        let mut results = Vec::with_capacity(tools.len());
        let mut pos = Vec2f::zero();

        for (idx, (&tool, cleaning_box)) in tools.iter().zip(&boxes).enumerate() {
            let old_tool = state.current_tool;
            let is_last = idx + 1 == tools.len();

            let mut writer = self.writer(&state);
            writer.set_initial_position(pos, 0.0, 0.0, 0.0);
            if idx == 0 {
                writer
                    .append("; CP PRIMING START\n")
                    .speed_override_backup()
                    .speed_override(100)
                    .travel_to(cleaning_box.ld, FAST_TRAVEL_FEEDRATE);
                if self.config.set_extruder_trimpot {
                    writer.set_extruder_trimpot(RAMMING_CURRENT);
                }
            }

            self.toolchange_change(&mut writer, &mut state, tool);
            self.toolchange_load(&mut writer, &state, cleaning_box);

            if is_last {
                let volume = match idx {
                    0 => PRIMING_WIPE_VOLUME,
                    _ => purge.get(tools[idx - 1], tool),
                };
                self.toolchange_wipe(&mut writer, &mut state, cleaning_box, volume);
            } else {
                self.toolchange_wipe(&mut writer, &mut state, cleaning_box, PRIMING_WIPE_VOLUME);

                // Unload above the purge lines just printed
                let mut unload_box = *cleaning_box;
                unload_box.translate(Vec2f::new(
                    0.0,
                    writer.y() - cleaning_box.ld.y + self.perimeter_width,
                ));
                let next_temperature = self.filpar[tools[idx + 1]].first_layer_temperature;
                self.toolchange_unload(&mut writer, &mut state, &unload_box, next_temperature);
                writer.travel_to(boxes[idx + 1].ld, FAST_TRAVEL_FEEDRATE);
            }

            state.num_tool_changes += 1;
            state.record_usage(tool, writer.get_and_reset_used_filament_length());

            if is_last {
                if self.config.set_extruder_trimpot {
                    writer.set_extruder_trimpot(NORMAL_CURRENT);
                }
                writer
                    .speed_override_restore()
                    .feedrate(self.config.travel_speed * 60.0)
                    .flush_planner_queue()
                    .reset_extruder()
                    .append("; CP PRIMING END\n;------------------\n\n\n");
            }

            pos = writer.pos();
            results.push(self.construct_tcr(&state, writer, true, old_tool, false));
        }

        info!(tools = tools.len(), z = first_layer_height, "priming lines generated");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::two_filament_tower;
    use super::super::{FilamentParameters, WipeTowerConfig};
    use super::*;
    use crate::geometry::BedGeometry;
    use crate::Error;

    fn circular_tower(diameter: f64, tools: usize) -> WipeTower {
        let config = WipeTowerConfig {
            bed: BedGeometry::circular(diameter, 64),
            ..WipeTowerConfig::default()
        };
        let mut tower = WipeTower::new(config, 0);
        for idx in 0..tools {
            tower.set_extruder(idx, FilamentParameters::default());
        }
        tower
    }

    #[test]
    fn test_priming_boxes_rectangular_bed() {
        let tower = two_filament_tower(false);
        let boxes = tower.priming_boxes(4);
        assert_eq!(boxes.len(), 4);
        // 0.9 * 250 / 4 = 56.25
        assert!((boxes[0].width() - 56.25).abs() < 1e-3);
        assert!((boxes[0].ld.x - 5.0).abs() < 1e-3);
        assert!((boxes[1].ld.x - boxes[0].rd.x).abs() < 1e-3);
    }

    #[test]
    fn test_priming_boxes_circular_bed_are_centered() {
        let diameter = 300.0_f32;
        let tower = circular_tower(diameter as f64, 3);
        let boxes = tower.priming_boxes(3);

        let left = boxes[0].ld.x;
        let right = boxes[2].rd.x;
        assert!((left + right).abs() < 1e-2);
        for bx in &boxes {
            assert!(bx.ld.x >= -diameter / 2.0 && bx.rd.x <= diameter / 2.0);
            assert!(bx.ld.y < 0.0);
        }
    }

    #[test]
    fn test_prime_sequence() {
        let tower = circular_tower(300.0, 3);
        let purge = PurgeVolumes::new(3, 50.0);
        let results = tower.prime(0.2, &[0, 1, 2], &purge).unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.priming));
        assert!(results[0].gcode.to_string().contains("; CP PRIMING START"));
        assert!(results[2].gcode.to_string().contains("; CP PRIMING END"));
        assert_eq!(results[2].new_tool, 2);
        for r in &results {
            assert_eq!(r.gcode.placeholders().count(), 3);
            assert!(r.extrusions.iter().all(|e| e.pos.x.abs() <= 150.0));
        }
        // Consecutive results connect
        assert!(results[0].end_pos.approx_eq(&results[1].start_pos, 1e-4));
    }

    #[test]
    fn test_prime_last_tool_is_not_unloaded() {
        let tower = two_filament_tower(true);
        let purge = PurgeVolumes::new(2, 40.0);
        let results = tower.prime(0.2, &[1, 0], &purge).unwrap();
        assert!(results[0].gcode.to_string().contains("; CP TOOLCHANGE UNLOAD"));
        assert!(!results[1].gcode.to_string().contains("; CP TOOLCHANGE UNLOAD"));
    }

    #[test]
    fn test_prime_rejects_unknown_tool() {
        let tower = two_filament_tower(false);
        let purge = PurgeVolumes::default();
        assert!(matches!(
            tower.prime(0.2, &[0, 5], &purge),
            Err(Error::UnregisteredFilament(5))
        ));
        assert!(tower.prime(0.2, &[], &purge).unwrap().is_empty());
    }
}
