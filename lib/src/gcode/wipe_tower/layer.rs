//! Layer finish: sparse infill, tower perimeter, stabilization cone and brim.

use super::{GenerationState, ToolChangeResult, WipeTower, WT_EPSILON};
use crate::clipper;
use crate::flow;
use crate::gcode::writer::{closest_vertex, WipeTowerWriter};
use crate::geometry::{BoxCoordinates, Vec2f};
use crate::{Error, Result};
use tracing::{debug, warn};

/// Number of segments approximating each cone arc.
const CONE_ARC_STEPS: usize = 40;

/// Base radius of the stabilization cone and the X stretch keeping its base
/// over the whole tower footprint.
///
/// The footprint is approximated by a box two thirds of the tower width
/// wide. While the cone base is smaller than the diagonal of that box no
/// stretch is needed and the scale is `1.0`.
pub fn get_wipe_tower_cone_base(width: f32, height: f32, depth: f32, angle_deg: f32) -> (f32, f32) {
    let radius = (angle_deg / 2.0).to_radians().tan() * height;
    let fake_width = 0.66 * width;
    let diag = (fake_width / 2.0).hypot(depth / 2.0);

    let mut support_scale = 1.0;
    if radius > diag {
        let sin = 0.5 * depth / diag;
        let tan = depth / fake_width;
        let t = (radius - diag) * sin;
        support_scale = (fake_width / 2.0 + t / tan + t * tan) / (fake_width / 2.0);
    }
    (radius, support_scale)
}

impl WipeTower {
    fn brim_loops(&self, spacing: f32) -> usize {
        if spacing <= 0.0 {
            return 0;
        }
        ((self.config.brim_width + spacing / 2.0) / spacing).max(0.0) as usize
    }

    /// Width of the brim printed around the first tower layer.
    pub(crate) fn planned_brim_width(&self) -> f32 {
        let Some(layer) = self.first_layer_idx.and_then(|idx| self.plan.get(idx)) else {
            return 0.0;
        };
        let spacing = flow::bead_spacing(self.perimeter_width, layer.height);
        self.brim_loops(spacing) as f32 * spacing
    }

    /// Outline of the tower box, widened by the cone silhouette if any.
    fn tower_outline(&self, state: &GenerationState, wt_box: &BoxCoordinates) -> Vec<Vec2f> {
        let rect = wt_box.corners().to_vec();
        let angle = self.config.cone_angle;
        if angle <= 0.0 {
            return rect;
        }

        let (_, support_scale) = get_wipe_tower_cone_base(
            self.config.width,
            self.wipe_tower_height,
            self.wipe_tower_depth,
            angle,
        );
        let z = if self.config.no_sparse_layers {
            state.current_height + state.layer_height
        } else {
            state.z_pos
        };
        let r = (angle / 2.0).to_radians().tan() * (self.wipe_tower_height - z);
        let w = wt_box.width();

        // The cone is narrower than the tower here
        if r <= 0.5 * w + 0.01 {
            if self.is_first_layer(state.layer_idx) {
                warn!(angle, radius = r, "cone angle too small to widen the tower base");
            }
            return rect;
        }

        let center = wt_box.center();
        let alpha = (0.5 * w * support_scale / r).min(1.0).asin();
        let arc = |i: usize| {
            let t = alpha - 2.0 * alpha * i as f32 / CONE_ARC_STEPS as f32;
            Vec2f::new(r * t.sin() / support_scale, r * t.cos())
        };

        let mut outline = Vec::with_capacity(2 * CONE_ARC_STEPS + 6);
        outline.push(wt_box.ru);
        outline.extend((0..=CONE_ARC_STEPS).map(|i| center + arc(i)));
        outline.push(wt_box.lu);
        outline.push(wt_box.ld);
        outline.extend((0..=CONE_ARC_STEPS).map(|i| {
            let p = arc(i);
            center + Vec2f::new(-p.x, -p.y)
        }));
        outline.push(wt_box.rd);

        debug!(z, radius = r, support_scale, "cone outline");
        clipper::union_outline(&outline, &rect)
    }

    /// Fill the part of the layer no toolchange used.
    ///
    /// The fill is solid under soluble toolchanges of the next layer and on
    /// the first layer when it must be solid, sparse vertical lines otherwise.
    fn sparse_infill(
        &self,
        writer: &mut WipeTowerWriter,
        state: &GenerationState,
        fill_box: &BoxCoordinates,
        first_layer: bool,
        feedrate: f32,
    ) {
        let pw = self.perimeter_width;
        let dy = fill_box.height() - pw;
        if dy <= pw {
            return;
        }
        let mut left = fill_box.lu.x + 2.0 * pw;
        let mut right = fill_box.ru.x - 2.0 * pw;

        writer
            .travel_to(fill_box.ld + Vec2f::new(2.0 * pw, 0.0), 0.0)
            .append(";--------------------\n; CP EMPTY GRID START\n")
            .comment_with_value(" layer #", state.num_layer_changes + 1);

        let soluble_above = self.plan.get(state.layer_idx + 1).is_some_and(|next| {
            next.tool_changes
                .iter()
                .any(|tc| self.filpar[tc.new_tool].is_soluble || self.filpar[tc.old_tool].is_soluble)
        });

        if soluble_above || (first_layer && self.config.first_layer_solid_infill) {
            let mut sparse_factor = 1.5;
            if first_layer {
                // Touch the perimeters
                left -= pw;
                right += pw;
                sparse_factor = 1.0;
            }
            let n = ((dy / (pw * sparse_factor)) as usize).max(2);
            let step = (dy - pw) / (n - 1) as f32;
            let mut y = fill_box.ld.y + pw;
            for i in 0..n {
                let x = writer.x();
                writer
                    .extrude(x, y, feedrate)
                    .extrude(if i % 2 == 1 { left } else { right }, y, 0.0);
                y += step;
            }
            let x = writer.x();
            writer.extrude(x, fill_box.lu.y, 0.0);
        } else {
            // Inverse U on the left, then lines spanning the bridging distance
            writer.extrude_to(fill_box.lu + Vec2f::new(2.0 * pw, 0.0), feedrate);
            let bridging = self.config.bridging.max(pw);
            let n = 1 + ((right - left) / bridging).max(0.0) as usize;
            let dx = (right - left) / n as f32;
            for i in 1..=n {
                let x = left + dx * i as f32;
                let y = writer.y();
                writer
                    .travel(x, y, 0.0)
                    .extrude(x, if i % 2 == 1 { fill_box.rd.y } else { fill_box.ru.y }, 0.0);
            }
        }

        writer.append("; CP EMPTY GRID END\n;------------------\n\n\n\n\n\n\n");
    }

    /// Close the current layer: infill, perimeter and, on the first layer,
    /// the brim.
    pub(crate) fn finish_layer(&self, state: &mut GenerationState) -> Result<ToolChangeResult> {
        let layer = self.plan.get(state.layer_idx).ok_or_else(|| {
            Error::DegenerateGeometry(format!("layer {} is not in the plan", state.layer_idx))
        })?;
        state.layer_finished = true;

        let old_tool = state.current_tool;
        let pw = self.perimeter_width;
        let width = self.config.width;

        let mut writer = self.writer(state);
        writer.set_y_shift(state.y_shift);

        // Without sparse layers the tower starts at the first toolchange
        let first_layer = self.is_first_layer(state.layer_idx)
            || (state.num_tool_changes <= 1 && self.config.no_sparse_layers);
        let feedrate = 60.0
            * if first_layer {
                self.config.first_layer_speed
            } else {
                self.config.infill_speed
            };

        let toolchanges_depth = layer.toolchanges_depth();
        let current_depth = layer.depth - toolchanges_depth;
        if current_depth < -WT_EPSILON {
            warn!(
                layer = state.layer_idx,
                depth = layer.depth,
                toolchanges_depth,
                "layer depth smaller than its toolchanges"
            );
        }
        let fill_box = BoxCoordinates::new(
            pw,
            layer.depth - (current_depth - pw),
            width - 2.0 * pw,
            current_depth - pw,
        );

        // Start in a corner so there is no diagonal travel
        let start = if state.left_to_right { fill_box.ru } else { fill_box.lu };
        writer.set_initial_position(start, width, self.wipe_tower_depth, state.internal_rotation);

        if fill_box.height() > pw - WT_EPSILON {
            writer.rectangle_box(&fill_box, feedrate);
        }
        if writer.x() > fill_box.ld.x + WT_EPSILON {
            let y = writer.y();
            writer.travel(fill_box.ld.x, y, 0.0);
        }
        if writer.y() > fill_box.ld.y + WT_EPSILON {
            let x = writer.x();
            writer.travel(x, fill_box.ld.y, 0.0);
        }

        self.sparse_infill(&mut writer, state, &fill_box, first_layer, feedrate);

        let wt_box = BoxCoordinates::new(0.0, 0.0, width, layer.depth + pw);
        let mut outline = self.tower_outline(state, &wt_box);
        let perimeter_feedrate = 60.0
            * if first_layer {
                self.config.first_layer_speed
            } else {
                self.config.perimeter_speed
            };
        writer.polygon(&outline, perimeter_feedrate);

        if self.is_first_layer(state.layer_idx) {
            let spacing = flow::bead_spacing(pw, state.layer_height);
            for _ in 0..self.brim_loops(spacing) {
                outline = clipper::offset_outline(&outline, spacing);
                writer.polygon(&outline, perimeter_feedrate);
            }
        }

        // Wipe along the perimeter when leaving the tower
        if let Some(closest) = closest_vertex(&outline, writer.pos()) {
            let previous = outline[if closest == 0 { outline.len() - 1 } else { closest - 1 }];
            let pos = writer.pos();
            writer
                .add_wipe_point(pos.x, pos.y)
                .add_wipe_point(previous.x, previous.y);
        }

        let toolchanges_on_layer = toolchanges_depth > WT_EPSILON;
        if !self.config.no_sparse_layers || toolchanges_on_layer || first_layer {
            let tool = state.current_tool;
            state.record_usage(tool, writer.get_and_reset_used_filament_length());
            state.current_height += layer.height;
        }

        Ok(self.construct_tcr(state, writer, false, old_tool, true))
    }
}
