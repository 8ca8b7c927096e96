//! Toolchange choreography: unload, change, load and wipe.

use super::{GenerationState, ToolChange, ToolChangeResult, WipeTower, FAST_TRAVEL_FEEDRATE, RAMMING_TIME_STEP, WT_EPSILON};
use crate::flow;
use crate::gcode::fragment::Placeholder;
use crate::gcode::writer::{WipeTowerWriter, DEFAULT_MAX_X_SPEED};
use crate::geometry::{BoxCoordinates, Vec2f};
use crate::Result;
use tracing::debug;

/// Extruder motor current while ramming.
pub(super) const RAMMING_CURRENT: i32 = 750;
pub(super) const NORMAL_CURRENT: i32 = 550;

/// First unload segment after ramming (mm).
const INITIAL_UNLOAD_DISTANCE: f32 = 15.0;

const PARKING_FEEDRATE: f32 = 2000.0;
const POST_RAMMING_FEEDRATE: f32 = 2400.0;

// TODO: confirm with the firmware team whether normal mode should restore
// with its own comment; both modes currently write the fast mode text.
const RESTORE_TEMPERATURE_COMMENT: &str = "; Restore temperature (fast skinnydip)\n";

/// One straight ramming segment along X.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RammingMove {
    /// Distance along the current direction (mm)
    pub dx: f32,
    /// Filament fed during the segment (mm)
    pub e: f32,
    /// mm/min
    pub feedrate: f32,
    /// Step to the next lane and reverse after this segment
    pub turn_after: bool,
}

/// Split a ramming profile into segments on a zig-zag of lanes.
///
/// Every sample lasts `time_step` seconds and extrudes `speed * time_step`
/// mm³. A sample crossing the end of a lane is split, the rest continues on
/// the next lane. `first_lane` is the distance left on the lane the ramming
/// starts on.
pub fn plan_ramming(
    speeds: &[f32],
    time_step: f32,
    line_width: f32,
    layer_height: f32,
    filament_area: f32,
    lane_width: f32,
    first_lane: f32,
) -> Vec<RammingMove> {
    let mut moves = Vec::new();
    if lane_width <= WT_EPSILON || time_step <= 0.0 || filament_area <= 0.0 {
        return moves;
    }

    let mut remaining = if first_lane < WT_EPSILON { lane_width } else { first_lane };
    let mut done = 0.0;
    let mut i = 0;
    while i < speeds.len() {
        let volume = speeds[i] * time_step;
        let x = flow::volume_to_length(volume, line_width, layer_height);
        if x <= WT_EPSILON {
            i += 1;
            continue;
        }
        let e = volume / filament_area;
        let dist = (x - done).min(remaining);
        remaining -= dist;

        let turn_after = remaining < WT_EPSILON;
        moves.push(RammingMove {
            dx: dist,
            e: e * dist / x,
            feedrate: x / time_step * 60.0,
            turn_after,
        });
        if turn_after {
            remaining = lane_width;
        }

        done += dist;
        if done > x - WT_EPSILON {
            i += 1;
            done = 0.0;
        }
    }
    moves
}

impl WipeTower {
    /// The planned toolchange of the state's layer switching to `new_tool`.
    fn planned_toolchange(&self, state: &GenerationState, new_tool: usize) -> Option<&ToolChange> {
        let layer = self.plan.get(state.layer_idx)?;
        layer
            .tool_changes
            .iter()
            .find(|tc| tc.old_tool == state.current_tool && tc.new_tool == new_tool)
            .or_else(|| layer.tool_changes.iter().find(|tc| tc.new_tool == new_tool))
    }

    /// Switch to `new_tool`, or only unload the current filament for `None`.
    ///
    /// The cleaning box starts where the previous toolchange of the layer
    /// ended and spans the depth the plan reserved for this one.
    pub(crate) fn tool_change(
        &self,
        state: &mut GenerationState,
        new_tool: Option<usize>,
    ) -> Result<ToolChangeResult> {
        let old_tool = state.current_tool;
        self.filament(old_tool)?;
        if let Some(tool) = new_tool {
            self.filament(tool)?;
        }

        let pw = self.perimeter_width;
        let (wipe_volume, wipe_area) = new_tool
            .and_then(|tool| self.planned_toolchange(state, tool))
            .map_or((0.0, 0.0), |tc| (tc.wipe_volume, tc.required_depth));

        let box_depth = match new_tool {
            Some(_) => wipe_area + state.depth_traversed - 0.5 * pw,
            None => self.wipe_tower_depth - pw,
        };
        let cleaning_box = BoxCoordinates::new(0.5 * pw, 0.5 * pw, self.config.width - pw, box_depth);

        let mut writer = self.writer(state);
        writer
            .set_y_shift(state.y_shift)
            .append(";--------------------\n; CP TOOLCHANGE START\n")
            .comment_with_value(" toolchange #", state.num_tool_changes + 1);
        if let Some(tool) = new_tool {
            writer
                .append(&format!(
                    "; material : {} -> {}\n",
                    self.filpar[old_tool].material, self.filpar[tool].material
                ))
                .append(";--------------------\n");
        }

        writer.speed_override_backup().speed_override(100);
        let initial_position = cleaning_box.ld + Vec2f::new(0.0, state.depth_traversed);
        writer.set_initial_position(
            initial_position,
            self.config.width,
            self.wipe_tower_depth,
            state.internal_rotation,
        );
        if self.config.set_extruder_trimpot {
            writer.set_extruder_trimpot(RAMMING_CURRENT);
        }

        match new_tool {
            Some(tool) => {
                let new = &self.filpar[tool];
                let temperature = if self.is_first_layer(state.layer_idx) {
                    new.first_layer_temperature
                } else {
                    new.temperature
                };
                self.toolchange_unload(&mut writer, state, &cleaning_box, temperature);
                self.toolchange_change(&mut writer, state, tool);
                self.toolchange_load(&mut writer, state, &cleaning_box);
                let (x, y) = (writer.x(), writer.y());
                writer.travel(x, y - pw, 0.0);
                self.toolchange_wipe(&mut writer, state, &cleaning_box, wipe_volume);
                state.num_tool_changes += 1;
            }
            None => {
                let temperature = self.filpar[old_tool].temperature;
                self.toolchange_unload(&mut writer, state, &cleaning_box, temperature);
            }
        }

        state.depth_traversed += wipe_area;

        if self.config.set_extruder_trimpot {
            writer.set_extruder_trimpot(NORMAL_CURRENT);
        }
        writer
            .speed_override_restore()
            .feedrate(self.config.travel_speed * 60.0)
            .flush_planner_queue()
            .reset_extruder()
            .append("; CP TOOLCHANGE END\n;------------------\n\n\n");

        let tool = state.current_tool;
        state.record_usage(tool, writer.get_and_reset_used_filament_length());

        debug!(
            layer = state.layer_idx,
            from = old_tool,
            to = ?new_tool,
            wipe_volume,
            depth_traversed = state.depth_traversed,
            "toolchange emitted"
        );
        Ok(self.construct_tcr(state, writer, false, old_tool, false))
    }

    /// Length of the first wipe line to print before ramming.
    ///
    /// Returns `Some` when the ramming block would end past the part of the
    /// layer below that carries toolchanges, i.e. over sparse infill.
    fn midair_first_wipe_line(&self, state: &GenerationState, y_step: f32, spacing: f32) -> Option<f32> {
        let pw = self.perimeter_width;
        if state.layer_idx == 0 || (state.layer_idx == 1 && self.config.first_layer_solid_infill) {
            return None;
        }
        let below = self.plan.get(state.layer_idx - 1)?;
        let layer = self.plan.get(state.layer_idx)?;

        let sparse_beginning_y = below.toolchanges_depth() + pw;
        let mut sum_of_depths = 0.0;
        for tc in &layer.tool_changes {
            if tc.old_tool == state.current_tool {
                sum_of_depths += tc.ramming_depth;
                let ramming_end_y = sum_of_depths - (y_step / spacing - pw) / 2.0;
                return (ramming_end_y > sparse_beginning_y + 0.5 * pw).then_some(tc.first_wipe_line);
            }
            sum_of_depths += tc.required_depth;
        }
        None
    }

    /// Ram the old filament out and park it.
    pub(super) fn toolchange_unload(
        &self,
        writer: &mut WipeTowerWriter,
        state: &mut GenerationState,
        cleaning_box: &BoxCoordinates,
        new_temperature: i32,
    ) {
        let pw = self.perimeter_width;
        let semm = self.config.semm;
        let spacing = self.layer_spacing(state);
        let current = &self.filpar[state.current_tool];

        let xl = cleaning_box.ld.x + pw;
        let xr = cleaning_box.rd.x - pw;
        let line_width = pw * current.ramming_line_width_multiplicator;
        let y_step = line_width * current.ramming_step_multiplicator * spacing;
        let do_ramming = semm || current.multitool_ramming;

        writer
            .append("; CP TOOLCHANGE UNLOAD\n")
            .change_analyzer_line_width(line_width);

        let ramming_start = Vec2f::new(xl, cleaning_box.ld.y + state.depth_traversed + y_step / 2.0);
        if do_ramming {
            writer
                .travel_to(ramming_start, FAST_TRAVEL_FEEDRATE)
                .disable_linear_advance();
        } else {
            writer.set_position(ramming_start);
        }
        state.left_to_right = true;

        let mut remaining = xr - xl;
        if do_ramming {
            if let Some(first_wipe_line) = self.midair_first_wipe_line(state, y_step, spacing) {
                let y = writer.y();
                writer.extrude(xl + first_wipe_line - pw, y, 0.0);
                remaining -= first_wipe_line - pw;
            }

            let time_step = if semm {
                RAMMING_TIME_STEP
            } else {
                current.multitool_ramming_time
            };
            let moves = plan_ramming(
                &current.ramming_speed,
                time_step,
                line_width,
                state.layer_height,
                current.filament_area,
                xr - xl,
                remaining,
            );
            for mv in moves {
                let x = writer.x();
                let target = if state.left_to_right { x + mv.dx } else { x - mv.dx };
                writer.ram(x, target, 0.0, 0.0, mv.e, mv.feedrate);
                if mv.turn_after {
                    let (x, y) = (writer.x(), writer.y());
                    writer.travel(x, y + y_step, FAST_TRAVEL_FEEDRATE);
                    state.left_to_right = !state.left_to_right;
                }
            }
        }
        let end_of_ramming = writer.pos();
        writer.change_analyzer_line_width(pw);

        let mut old_x = writer.x();
        let mut turning_point = if state.left_to_right { xr } else { xl };

        let ctr = self.config.cooling_tube_retraction;
        let ctl = self.config.cooling_tube_length;
        if semm && (ctr != 0.0 || ctl != 0.0) {
            let total = ctr + ctl / 2.0 - INITIAL_UNLOAD_DISTANCE;
            writer
                .suppress_preview()
                .retract(INITIAL_UNLOAD_DISTANCE, current.unloading_speed_start * 60.0)
                .retract(0.70 * total, current.unloading_speed * 60.0)
                .retract(0.20 * total, 0.5 * current.unloading_speed * 60.0)
                .retract(0.10 * total, 0.3 * current.unloading_speed * 60.0)
                .resume_preview();
        }

        let dip = &current.skinnydip;
        let toolchange_temperature = dip.toolchange_temperature;
        let use_toolchange_temperature = semm && toolchange_temperature > 0;
        let part_fan = semm && (use_toolchange_temperature || dip.enabled) && dip.toolchange_part_fan_speed >= 0;

        // Multi-nozzle printers manage their temperatures outside the tower
        if semm
            && !use_toolchange_temperature
            && new_temperature != 0
            && (state.old_temperature != Some(new_temperature) || self.is_first_layer(state.layer_idx))
        {
            writer.set_extruder_temp(new_temperature, false);
            state.old_temperature = Some(new_temperature);
        }

        if use_toolchange_temperature && !dip.fast {
            writer
                .append("; Toolchange temperature\n")
                .set_extruder_temp(toolchange_temperature, true);
        }
        if part_fan {
            writer.set_fan(dip.toolchange_part_fan_speed as u32);
        }

        let cooling_moves = current.cooling_moves;
        if semm && cooling_moves > 0 {
            let initial_speed = current.cooling_initial_speed;
            let speed_inc = (current.cooling_final_speed - initial_speed) / (2.0 * cooling_moves as f32 - 1.0);
            let (x, y) = (writer.x(), writer.y());
            writer.suppress_preview().travel(x, y + y_step, 0.0);
            old_x = writer.x();
            turning_point = if xr - old_x > old_x - xl { xr } else { xl };
            for i in 0..cooling_moves {
                let speed = initial_speed + speed_inc * 2.0 * i as f32;
                writer
                    .load_move_x_advanced(turning_point, ctl, speed, DEFAULT_MAX_X_SPEED)
                    .load_move_x_advanced(old_x, -ctl, speed + speed_inc, DEFAULT_MAX_X_SPEED);
            }
        }

        if use_toolchange_temperature && dip.fast {
            writer
                .append("; Toolchange temperature FAST\n")
                .set_extruder_temp(toolchange_temperature, false);
        }

        if semm && dip.enabled {
            let distance = dip.distance as f32;
            writer
                .append("; SKINNYDIP START\n")
                .suppress_preview()
                .load_move_x_advanced(turning_point, distance, dip.insertion_speed as f32, DEFAULT_MAX_X_SPEED)
                .wait(dip.melt_zone_pause as f32 / 1000.0)
                .load_move_x_advanced(old_x, -distance, dip.extraction_speed as f32, DEFAULT_MAX_X_SPEED)
                .wait(dip.cooling_zone_pause as f32 / 1000.0)
                .append("; SKINNYDIP END\n");
        }

        if use_toolchange_temperature {
            writer
                .append(RESTORE_TEMPERATURE_COMMENT)
                .set_extruder_temp(new_temperature, false);
            state.old_temperature = Some(new_temperature);
        }
        if part_fan {
            writer.set_fan(0);
        }

        if semm {
            writer.wait(current.delay);
            // Back at the cooling tube entry, move on to the parking position
            let e = -ctl / 2.0 + self.config.parking_pos_retraction - ctr;
            if e != 0.0 {
                writer.retract(e, PARKING_FEEDRATE);
            }
        }

        // Align the following wipe lines with the ramming lines
        let pos = Vec2f::new(
            end_of_ramming.x,
            end_of_ramming.y + (y_step / spacing - pw) / 2.0 + pw,
        );
        if do_ramming {
            writer.travel_to(pos, POST_RAMMING_FEEDRATE);
        } else {
            writer.set_position(pos);
        }
        writer.resume_preview().flush_planner_queue();
    }

    /// Hand over to the consumer's toolchange G-code and adopt the new tool.
    pub(super) fn toolchange_change(&self, writer: &mut WipeTowerWriter, state: &mut GenerationState, new_tool: usize) {
        let old_tool = state.current_tool;
        state.record_usage(old_tool, writer.get_and_reset_used_filament_length());

        // The custom G-code may leave the head anywhere, restate the position
        writer
            .placeholder(Placeholder::ToolchangeGcode {
                from: old_tool,
                to: new_tool,
            })
            .resync_position(self.config.travel_speed * 60.0)
            .placeholder(Placeholder::Deretraction)
            .placeholder(Placeholder::ZResync { z: state.z_pos })
            .set_tool(new_tool)
            .flush_planner_queue();
        state.current_tool = new_tool;
    }

    /// Push the new filament from the parking position into the nozzle.
    pub(super) fn toolchange_load(&self, writer: &mut WipeTowerWriter, state: &GenerationState, cleaning_box: &BoxCoordinates) {
        let edist = self.config.parking_pos_retraction + self.config.extra_loading_move;
        if !self.config.semm || edist == 0.0 {
            return;
        }
        let pw = self.perimeter_width;
        let current = &self.filpar[state.current_tool];
        let xl = cleaning_box.ld.x + 0.75 * pw;
        let xr = cleaning_box.rd.x - 0.75 * pw;
        let old_x = writer.x();
        let turning_point = if old_x - xl < xr - old_x { xr } else { xl };

        writer
            .append("; CP TOOLCHANGE LOAD\n")
            .suppress_preview()
            .load(0.2 * edist, 60.0 * current.loading_speed_start)
            .load_move_x_advanced(turning_point, 0.7 * edist, current.loading_speed, DEFAULT_MAX_X_SPEED)
            .load_move_x_advanced(old_x, 0.1 * edist, 0.1 * current.loading_speed, DEFAULT_MAX_X_SPEED);
        // The last move may have been shortened by the X speed cap
        let y = writer.y();
        writer.travel(old_x, y, 0.0).resume_preview();

        if self.config.set_extruder_trimpot {
            writer.set_extruder_trimpot(NORMAL_CURRENT);
        }
    }

    /// Purge the new filament with back-and-forth lines.
    ///
    /// Wiping continues until `wipe_volume` is used up or the cleaning box is
    /// full, whichever comes first.
    pub(super) fn toolchange_wipe(
        &self,
        writer: &mut WipeTowerWriter,
        state: &mut GenerationState,
        cleaning_box: &BoxCoordinates,
        wipe_volume: f32,
    ) {
        let pw = self.perimeter_width;
        let first_layer = self.is_first_layer(state.layer_idx);
        let spacing = self.layer_spacing(state);

        writer
            .set_extrusion_flow(state.extrusion_flow * if first_layer { 1.18 } else { 1.0 })
            .append("; CP TOOLCHANGE WIPE\n");

        let xl = cleaning_box.ld.x;
        let xr = cleaning_box.rd.x;
        let mut x_to_wipe = flow::volume_to_length(wipe_volume, pw, state.layer_height) / spacing;
        // No extra spacing on the first layer
        let dy = if first_layer { 1.0 } else { spacing } * pw;

        let base_speed = if first_layer || (state.num_tool_changes <= 1 && self.config.no_sparse_layers) {
            self.config.first_layer_speed
        } else {
            self.config.infill_speed
        };
        let target_speed =
            base_speed * 60.0 * self.filpar[state.current_tool].wipe_speed_factor(state.z_pos);
        let mut wipe_speed = 0.33 * target_speed;

        // Too close to the edge, start on the next line
        let to_edge = if state.left_to_right { xr - writer.x() } else { writer.x() - xl };
        if to_edge < 2.5 * pw {
            let x = if state.left_to_right { xr - pw } else { xl + pw };
            let y = writer.y() + dy;
            writer.travel(x, y, 0.0);
            state.left_to_right = !state.left_to_right;
        }

        for i in 0usize.. {
            if i != 0 {
                wipe_speed = if wipe_speed < 0.34 * target_speed {
                    0.375 * target_speed
                } else if wipe_speed < 0.377 * target_speed {
                    0.458 * target_speed
                } else if wipe_speed < 0.46 * target_speed {
                    0.875 * target_speed
                } else {
                    target_speed.min(wipe_speed + 50.0)
                };
            }

            let line_start = writer.x();
            let y = writer.y();
            if state.left_to_right {
                let inset = if i % 4 == 0 { 0.0 } else { 1.5 * pw };
                writer.extrude(xr - inset, y, wipe_speed);
            } else {
                let inset = if i % 4 == 1 { 0.0 } else { 1.5 * pw };
                writer.extrude(xl + inset, y, wipe_speed);
            }

            if writer.y() + WT_EPSILON > cleaning_box.lu.y - 0.5 * pw {
                break;
            }

            x_to_wipe -= (line_start - writer.x()).abs();
            if x_to_wipe < WT_EPSILON {
                let x = if state.left_to_right { xl + 1.5 * pw } else { xr - 1.5 * pw };
                writer.travel(x, y, FAST_TRAVEL_FEEDRATE);
                break;
            }

            let direction = match i % 4 {
                0 => -1.0,
                1 => 1.0,
                _ => 0.0,
            };
            let x = writer.x() + direction * 1.5 * pw;
            writer.extrude(x, y + dy, 0.0);
            state.left_to_right = !state.left_to_right;
        }

        // Path for the consumer's own wipe, replaced when the layer finish follows
        let (x, y) = (writer.x(), writer.y());
        writer
            .add_wipe_point(x, y)
            .add_wipe_point(x, y - dy)
            .add_wipe_point(if state.left_to_right { 0.0 } else { self.config.width }, y - dy);

        let last_new_tool = self
            .plan
            .get(state.layer_idx)
            .and_then(|layer| layer.tool_changes.last())
            .map(|tc| tc.new_tool);
        if last_new_tool.is_some_and(|tool| tool != state.current_tool) {
            state.left_to_right = !state.left_to_right;
        }

        writer.set_extrusion_flow(state.extrusion_flow);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::two_filament_tower;
    use super::super::FilamentParameters;
    use super::*;
    use crate::config::SkinnydipConfig;
    use approx::assert_relative_eq;

    fn prepared(tower: &mut WipeTower) -> GenerationState {
        tower.plan_tower();
        let mut state = tower.new_state();
        tower.begin_layer(&mut state, 0).unwrap();
        state
    }

    fn line_index(text: &str, needle: &str) -> usize {
        text.find(needle).unwrap_or_else(|| panic!("missing {needle:?}"))
    }

    #[test]
    fn test_ramming_length_accounting() {
        let speeds = [6.6, 6.8, 7.2, 7.6, 7.9, 8.2, 8.7, 9.4];
        let (lw, h) = (0.6, 0.2);
        let moves = plan_ramming(&speeds, RAMMING_TIME_STEP, lw, h, flow::filament_area(1.75), 57.0, 57.0);

        let travelled: f32 = moves.iter().map(|m| m.dx).sum();
        let expected = flow::volume_to_length(speeds.iter().sum::<f32>() * RAMMING_TIME_STEP, lw, h);
        assert_relative_eq!(travelled, expected, max_relative = 1e-4);

        let fed: f32 = moves.iter().map(|m| m.e).sum();
        let volume: f32 = speeds.iter().sum::<f32>() * RAMMING_TIME_STEP;
        assert_relative_eq!(fed, volume / flow::filament_area(1.75), max_relative = 1e-4);
    }

    #[test]
    fn test_ramming_turns_at_lane_end() {
        let moves = plan_ramming(&[20.0; 4], RAMMING_TIME_STEP, 0.5, 0.2, 2.4, 10.0, 4.0);
        let first_turn = moves.iter().position(|m| m.turn_after).unwrap();
        let first_lane: f32 = moves[..=first_turn].iter().map(|m| m.dx).sum();
        assert_relative_eq!(first_lane, 4.0, epsilon = 1e-4);
        assert!(moves.iter().all(|m| m.dx <= 10.0 + 1e-4));
    }

    #[test]
    fn test_ramming_skips_empty_samples() {
        let moves = plan_ramming(&[0.0, 5.0, 0.0], 0.25, 0.5, 0.2, 2.4, 50.0, 50.0);
        assert_eq!(moves.len(), 1);
        assert!(moves[0].feedrate > 0.0);
        assert!(plan_ramming(&[5.0], 0.25, 0.5, 0.2, 2.4, 0.0, 0.0).is_empty());
    }

    #[test]
    fn test_toolchange_phase_order() {
        let mut tower = two_filament_tower(true);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        let mut state = prepared(&mut tower);

        let tcr = tower.tool_change(&mut state, Some(1)).unwrap();
        let text = tcr.gcode.to_string();
        let start = line_index(&text, "; CP TOOLCHANGE START");
        let unload = line_index(&text, "; CP TOOLCHANGE UNLOAD");
        let change = line_index(&text, "[toolchange_gcode_from_wipe_tower_generator]");
        let load = line_index(&text, "; CP TOOLCHANGE LOAD");
        let wipe = line_index(&text, "; CP TOOLCHANGE WIPE");
        let end = line_index(&text, "; CP TOOLCHANGE END");
        assert!(start < unload && unload < change && change < load && load < wipe && wipe < end);

        let placeholders: Vec<_> = tcr.gcode.placeholders().collect();
        assert_eq!(placeholders.len(), 3);
        assert_eq!(*placeholders[0], Placeholder::ToolchangeGcode { from: 0, to: 1 });
        assert_eq!(*placeholders[1], Placeholder::Deretraction);
        assert_eq!(state.current_tool(), 1);
        assert_eq!(state.num_tool_changes(), 1);
        assert!(text.contains("; toolchange #1\n"));
    }

    #[test]
    fn test_toolchange_advances_depth() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        tower.plan_toolchange(0.2, 0.2, 1, 0, 40.0).unwrap();
        let mut state = prepared(&mut tower);

        tower.tool_change(&mut state, Some(1)).unwrap();
        let first = tower.plan()[0].tool_changes[0].required_depth;
        assert_relative_eq!(state.depth_traversed(), first);
        tower.tool_change(&mut state, Some(0)).unwrap();
        assert_relative_eq!(state.depth_traversed(), tower.plan()[0].toolchanges_depth());
    }

    #[test]
    fn test_multi_nozzle_toolchange_has_no_load() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        let mut state = prepared(&mut tower);
        let text = tower.tool_change(&mut state, Some(1)).unwrap().gcode.to_string();
        assert!(!text.contains("; CP TOOLCHANGE LOAD"));
        assert!(!text.contains("M104"));
        assert!(!text.contains("M900"));
    }

    #[test]
    fn test_semm_unload_retracts_and_cools() {
        let mut tower = two_filament_tower(true);
        tower.filpar[0].cooling_moves = 2;
        tower.filpar[0].unloading_speed_start = 100.0;
        tower.filpar[0].unloading_speed = 90.0;
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        let mut state = prepared(&mut tower);
        let text = tower.tool_change(&mut state, Some(1)).unwrap().gcode.to_string();

        assert!(text.contains("M900 K0\n"));
        assert!(text.contains("G1 E-15.0000 F6000\n"));
        // First layer always sets the temperature
        assert!(text.contains("M104 S215\n"));
        assert_eq!(state.old_temperature, Some(215));
    }

    #[test]
    fn test_wipe_stays_in_box() {
        let mut tower = two_filament_tower(false);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 80.0).unwrap();
        let mut state = prepared(&mut tower);
        let tcr = tower.tool_change(&mut state, Some(1)).unwrap();

        assert!(!tcr.extrusions.is_empty());
        assert_eq!(tcr.wipe_path.len(), 3);
        let width = tower.width();
        for ex in &tcr.extrusions {
            assert!(ex.pos.x >= -1e-3 && ex.pos.x <= width + 1e-3);
        }
        assert!(tcr.extrusions.iter().any(|ex| ex.tool == 1 && ex.width > 0.0));
    }

    #[test]
    fn test_skinnydip_normal_mode_waits_before_cooling() {
        let mut tower = two_filament_tower(true);
        tower.filpar[0].cooling_moves = 1;
        tower.filpar[0].skinnydip = SkinnydipConfig {
            enabled: true,
            distance: 30.0,
            melt_zone_pause: 500,
            cooling_zone_pause: 250,
            insertion_speed: 30.0,
            extraction_speed: 60.0,
            toolchange_temperature: 190,
            toolchange_part_fan_speed: 50,
            ..SkinnydipConfig::default()
        };
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        let mut state = prepared(&mut tower);
        let text = tower.tool_change(&mut state, Some(1)).unwrap().gcode.to_string();

        let wait = line_index(&text, "M109 S190\n");
        let dip = line_index(&text, "; SKINNYDIP START");
        let restore = line_index(&text, RESTORE_TEMPERATURE_COMMENT);
        assert!(wait < dip && dip < restore);
        assert!(text.contains("G4 S0.500\n"));
        assert!(text.contains("M106 S127\n"));
        assert!(text[restore..].contains("M104 S215\n"));
        assert!(text[restore..].contains("M107\n"));
    }

    #[test]
    fn test_skinnydip_fast_mode_sets_temperature_after_cooling() {
        let mut tower = two_filament_tower(true);
        tower.filpar[0].skinnydip = SkinnydipConfig {
            fast: true,
            toolchange_temperature: 190,
            toolchange_part_fan_speed: -1,
            ..SkinnydipConfig::default()
        };
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        let mut state = prepared(&mut tower);
        let text = tower.tool_change(&mut state, Some(1)).unwrap().gcode.to_string();

        assert!(!text.contains("M109"));
        assert!(text.contains("; Toolchange temperature FAST\nM104 S190\n"));
        assert!(text.contains(RESTORE_TEMPERATURE_COMMENT));
        assert!(!text.contains("M106"));
    }

    #[test]
    fn test_unload_only() {
        let mut tower = two_filament_tower(true);
        tower.plan_toolchange(0.2, 0.2, 0, 1, 40.0).unwrap();
        let mut state = prepared(&mut tower);
        let tcr = tower.tool_change(&mut state, None).unwrap();
        assert_eq!(tcr.gcode.placeholders().count(), 0);
        assert!(!tcr.gcode.to_string().contains("; CP TOOLCHANGE WIPE"));
        assert_eq!(state.current_tool(), 0);
        assert_eq!(state.num_tool_changes(), 0);
    }

    #[test]
    fn test_unregistered_target_tool() {
        let mut tower = two_filament_tower(false);
        tower.set_extruder(3, FilamentParameters::default());
        tower.registered[3] = false;
        let mut state = tower.new_state();
        assert!(tower.tool_change(&mut state, Some(3)).is_err());
    }
}
