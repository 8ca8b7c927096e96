//! Motion program writer for the wipe tower.
//!
//! [`WipeTowerWriter`] turns moves expressed in tower-local coordinates into
//! G-code, while keeping a parallel log of extrusion segments for the
//! preview, the accumulated filament usage and a rough time estimate.
//!
//! Tower-local coordinates are rotated about the tower centre by the
//! internal angle (alternating 180° per layer) and shifted by `y_shift`
//! before being written out.

use super::flavor::CommandFormatter;
use super::fragment::{GCodeFragment, Placeholder};
use super::wipe_tower::FilamentParameters;
use crate::config::GCodeFlavor;
use crate::flow;
use crate::geometry::{BoxCoordinates, Vec2f};

/// Moves shorter than this are not written out on an axis.
const AXIS_EPSILON: f32 = 1e-4;

/// Default speed cap for the X motion accompanying a load (mm/s).
pub const DEFAULT_MAX_X_SPEED: f32 = 50.0;

/// Extrusion record for path preview
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrusion {
    /// End position of this extrusion
    pub pos: Vec2f,
    /// Width of the extrusion (0 for the start anchor of a segment)
    pub width: f32,
    /// Current extruder index
    pub tool: usize,
}

impl Extrusion {
    pub fn new(pos: Vec2f, width: f32, tool: usize) -> Self {
        Self { pos, width, tool }
    }
}

/// Builder-style G-code writer.
///
/// All methods taking a feedrate interpret `0` as "keep the current feedrate".
#[derive(Debug, Clone)]
pub struct WipeTowerWriter {
    formatter: &'static dyn CommandFormatter,
    start_pos: Vec2f,
    current_pos: Vec2f,
    current_z: f32,
    current_feedrate: f32,
    current_tool: usize,
    layer_height: f32,
    extrusion_flow: f32,
    preview_suppressed: bool,
    gcode: GCodeFragment,
    extrusions: Vec<Extrusion>,
    wipe_path: Vec<Vec2f>,
    elapsed_time: f32,
    /// Internal rotation (degrees)
    internal_angle: f32,
    y_shift: f32,
    wipe_tower_width: f32,
    wipe_tower_depth: f32,
    last_fan_speed: u32,
    current_analyzer_line_width: f32,
    used_filament_length: f32,
    filament_area: f32,
    max_e_speeds: Vec<f32>,
}

impl WipeTowerWriter {
    /// Create a writer for one layer.
    ///
    /// The preview width of every extrusion is computed with the first
    /// filament's cross-section. Volumetric limits are taken per tool.
    pub fn new(
        layer_height: f32,
        line_width: f32,
        gcode_flavor: GCodeFlavor,
        filament_parameters: &[FilamentParameters],
    ) -> Self {
        let filament_area = filament_parameters
            .first()
            .map(|f| f.filament_area)
            .unwrap_or_else(|| flow::filament_area(1.75));

        let mut writer = Self {
            formatter: gcode_flavor.formatter(),
            start_pos: Vec2f::zero(),
            current_pos: Vec2f::zero(),
            current_z: 0.0,
            current_feedrate: 0.0,
            current_tool: 0,
            layer_height,
            extrusion_flow: 0.0,
            preview_suppressed: false,
            gcode: GCodeFragment::new(),
            extrusions: Vec::new(),
            wipe_path: Vec::new(),
            elapsed_time: 0.0,
            internal_angle: 0.0,
            y_shift: 0.0,
            wipe_tower_width: 0.0,
            wipe_tower_depth: 0.0,
            last_fan_speed: 0,
            current_analyzer_line_width: 0.0,
            used_filament_length: 0.0,
            filament_area,
            max_e_speeds: filament_parameters.iter().map(|f| f.max_e_speed).collect(),
        };

        // Layer height is tagged explicitly, priming happens before any layer change
        writer.gcode.push_str(&format!(";HEIGHT:{}\n;TYPE:Wipe tower\n", layer_height));
        writer.change_analyzer_line_width(line_width);
        writer
    }

    pub fn set_extrusion_flow(&mut self, flow: f32) -> &mut Self {
        self.extrusion_flow = flow;
        self
    }

    pub fn set_z(&mut self, z: f32) -> &mut Self {
        self.current_z = z;
        self
    }

    pub fn set_initial_tool(&mut self, tool: usize) -> &mut Self {
        self.current_tool = tool;
        self
    }

    /// Position the writer and fix the rotation used for this program.
    pub fn set_initial_position(
        &mut self,
        pos: Vec2f,
        width: f32,
        depth: f32,
        internal_angle: f32,
    ) -> &mut Self {
        self.wipe_tower_width = width;
        self.wipe_tower_depth = depth;
        self.internal_angle = internal_angle;
        self.start_pos = self.rotate(pos);
        self.current_pos = pos;
        self
    }

    /// Set the position without rotation, used by priming.
    pub fn set_position(&mut self, pos: Vec2f) -> &mut Self {
        self.current_pos = pos;
        self
    }

    /// Shift the whole program along Y, keeping the physical position.
    pub fn set_y_shift(&mut self, shift: f32) -> &mut Self {
        self.current_pos.y -= shift - self.y_shift;
        self.y_shift = shift;
        self
    }

    pub fn suppress_preview(&mut self) -> &mut Self {
        self.preview_suppressed = true;
        self
    }

    pub fn resume_preview(&mut self) -> &mut Self {
        self.preview_suppressed = false;
        self
    }

    pub fn change_analyzer_line_width(&mut self, line_width: f32) -> &mut Self {
        if line_width != self.current_analyzer_line_width {
            self.current_analyzer_line_width = line_width;
            self.gcode.push_str(&format!(";WIDTH:{}\n", line_width));
        }
        self
    }

    pub fn feedrate(&mut self, f: f32) -> &mut Self {
        if f != self.current_feedrate {
            let line = format!("G1{}\n", self.set_format_f(f));
            self.gcode.push_str(&line);
        }
        self
    }

    pub fn x(&self) -> f32 {
        self.current_pos.x
    }

    pub fn y(&self) -> f32 {
        self.current_pos.y
    }

    pub fn z(&self) -> f32 {
        self.current_z
    }

    pub fn pos(&self) -> Vec2f {
        self.current_pos
    }

    pub fn start_pos_rotated(&self) -> Vec2f {
        self.start_pos
    }

    pub fn pos_rotated(&self) -> Vec2f {
        self.rotate(self.current_pos)
    }

    pub fn current_feedrate(&self) -> f32 {
        self.current_feedrate
    }

    pub fn current_tool(&self) -> usize {
        self.current_tool
    }

    pub fn elapsed_time(&self) -> f32 {
        self.elapsed_time
    }

    pub fn gcode(&self) -> &GCodeFragment {
        &self.gcode
    }

    pub fn extrusions(&self) -> &[Extrusion] {
        &self.extrusions
    }

    pub fn wipe_path(&self) -> &[Vec2f] {
        &self.wipe_path
    }

    pub fn get_and_reset_used_filament_length(&mut self) -> f32 {
        std::mem::take(&mut self.used_filament_length)
    }

    /// Consume the writer, returning G-code, extrusions and wipe path.
    pub fn into_parts(self) -> (GCodeFragment, Vec<Extrusion>, Vec<Vec2f>) {
        (self.gcode, self.extrusions, self.wipe_path)
    }

    /// Extrude (or travel, for `e == 0`) to `(x, y)`.
    ///
    /// Nothing is written when neither the position nor the feedrate change
    /// and `e` is zero. With `limit_volumetric_flow` the feedrate is lowered
    /// so that the filament feed stays within the tool's `max_e_speed`.
    pub fn extrude_explicit(
        &mut self,
        x: f32,
        y: f32,
        e: f32,
        f: f32,
        record_length: bool,
        limit_volumetric_flow: bool,
    ) -> &mut Self {
        if x == self.current_pos.x
            && y == self.current_pos.y
            && e == 0.0
            && (f == 0.0 || f == self.current_feedrate)
        {
            return self;
        }

        let len = (Vec2f::new(x, y) - self.current_pos).norm();
        if record_length {
            self.used_filament_length += e;
        }

        let rotated_current_pos = self.pos_rotated();
        let rot = self.rotate(Vec2f::new(x, y));

        if !self.preview_suppressed && e > 0.0 && len > 0.0 {
            let width = flow::squashed_width(e, self.filament_area, len, self.layer_height);
            if self.extrusions.last().map(|ex| ex.pos) != Some(rotated_current_pos) {
                self.extrusions
                    .push(Extrusion::new(rotated_current_pos, 0.0, self.current_tool));
            }
            self.extrusions.push(Extrusion::new(rot, width, self.current_tool));
        }

        let mut line = String::from("G1");
        if (rot.x - rotated_current_pos.x).abs() > AXIS_EPSILON {
            line.push_str(&format!(" X{:.3}", rot.x));
        }
        if (rot.y - rotated_current_pos.y).abs() > AXIS_EPSILON {
            line.push_str(&format!(" Y{:.3}", rot.y));
        }
        if e != 0.0 {
            line.push_str(&format!(" E{:.4}", e));
        }

        // Distance that determines the move duration
        let travelled = if len == 0.0 { e.abs() } else { len };
        if f != 0.0 {
            let mut f = f;
            if limit_volumetric_flow && travelled > 0.0 {
                let e_speed = e / (travelled / f * 60.0);
                f /= (e_speed / self.max_e_speed()).max(1.0);
            }
            if f != self.current_feedrate {
                let formatted = self.set_format_f(f);
                line.push_str(&formatted);
            }
        }

        // Only write the line when at least one of X, Y, E, F is present
        if line.len() > 2 {
            line.push('\n');
            self.gcode.push_str(&line);
        }

        self.current_pos = Vec2f::new(x, y);

        if self.current_feedrate > 0.0 {
            self.elapsed_time += travelled / self.current_feedrate * 60.0;
        }
        self
    }

    pub fn travel(&mut self, x: f32, y: f32, f: f32) -> &mut Self {
        self.extrude_explicit(x, y, 0.0, f, false, true)
    }

    pub fn travel_to(&mut self, dest: Vec2f, f: f32) -> &mut Self {
        self.travel(dest.x, dest.y, f)
    }

    /// Extrude with the configured extrusion flow.
    pub fn extrude(&mut self, x: f32, y: f32, f: f32) -> &mut Self {
        let len = (Vec2f::new(x, y) - self.current_pos).norm();
        let e = len * self.extrusion_flow;
        self.extrude_explicit(x, y, e, f, true, true)
    }

    pub fn extrude_to(&mut self, dest: Vec2f, f: f32) -> &mut Self {
        self.extrude(dest.x, dest.y, f)
    }

    /// Ramming segment: approach `x1` (optionally stepping `dy`), then ram to `x2`.
    pub fn ram(&mut self, x1: f32, x2: f32, dy: f32, e0: f32, e: f32, f: f32) -> &mut Self {
        let y = self.current_pos.y + dy;
        self.extrude_explicit(x1, y, e0, f, true, false);
        let y = self.current_pos.y;
        self.extrude_explicit(x2, y, e, 0.0, true, false)
    }

    /// Filament feed without XY motion.
    pub fn load(&mut self, e: f32, f: f32) -> &mut Self {
        if e == 0.0 && (f == 0.0 || f == self.current_feedrate) {
            return self;
        }
        let mut line = String::from("G1");
        if e != 0.0 {
            line.push_str(&format!(" E{:.4}", e));
        }
        if f != 0.0 && f != self.current_feedrate {
            let formatted = self.set_format_f(f);
            line.push_str(&formatted);
        }
        line.push('\n');
        self.gcode.push_str(&line);

        if self.current_feedrate > 0.0 {
            self.elapsed_time += e.abs() / self.current_feedrate * 60.0;
        }
        self
    }

    pub fn retract(&mut self, e: f32, f: f32) -> &mut Self {
        self.load(-e, f)
    }

    /// Feed `loading_dist` at `loading_speed` while moving towards `farthest_x`.
    ///
    /// The X motion never exceeds `max_x_speed`. When covering the whole
    /// distance in the loading time would require more, the X move is
    /// shortened instead of stretching the load.
    pub fn load_move_x_advanced(
        &mut self,
        farthest_x: f32,
        loading_dist: f32,
        loading_speed: f32,
        max_x_speed: f32,
    ) -> &mut Self {
        if loading_speed <= 0.0 || loading_dist == 0.0 {
            return self;
        }
        let time = (loading_dist / loading_speed).abs();
        let mut x_distance = (farthest_x - self.x()).abs();
        let mut x_speed = x_distance / time;

        if x_speed > max_x_speed {
            x_distance = max_x_speed * time;
            x_speed = max_x_speed;
        }
        if x_distance <= AXIS_EPSILON {
            return self.load(loading_dist, loading_speed * 60.0);
        }

        let direction = if farthest_x > self.x() { 1.0 } else { -1.0 };
        let end_point = self.x() + direction * x_distance;
        let y = self.y();
        self.extrude_explicit(end_point, y, loading_dist, x_speed * 60.0, false, false)
    }

    /// Extrude the perimeter of a box, starting at the corner closest to
    /// the current position.
    pub fn rectangle(&mut self, ld: Vec2f, width: f32, height: f32, f: f32) -> &mut Self {
        let corners = [
            ld,
            ld + Vec2f::new(width, 0.0),
            ld + Vec2f::new(width, height),
            ld + Vec2f::new(0.0, height),
        ];

        let mut index_of_closest = 0;
        if self.x() - ld.x > ld.x + width - self.x() {
            index_of_closest = 1;
        }
        if self.y() - ld.y > ld.y + height - self.y() {
            index_of_closest = if index_of_closest == 0 { 3 } else { 2 };
        }

        let closest = corners[index_of_closest];
        let y = self.y();
        self.travel(closest.x, y, 0.0);
        let x = self.x();
        self.travel(x, closest.y, 0.0);

        let mut i = index_of_closest;
        loop {
            i = (i + 1) % 4;
            self.extrude_to(corners[i], f);
            if i == index_of_closest {
                break;
            }
        }
        self
    }

    pub fn rectangle_box(&mut self, bx: &BoxCoordinates, f: f32) -> &mut Self {
        self.rectangle(bx.ld, bx.ru.x - bx.lu.x, bx.ru.y - bx.rd.y, f)
    }

    /// Extrude a closed loop starting at the vertex closest to the current position.
    pub fn polygon(&mut self, outline: &[Vec2f], f: f32) -> &mut Self {
        let Some(start) = closest_vertex(outline, self.pos()) else {
            return self;
        };
        self.travel_to(outline[start], 0.0);
        for offset in 1..=outline.len() {
            let next = outline[(start + offset) % outline.len()];
            self.extrude_to(next, f);
        }
        self
    }

    pub fn set_tool(&mut self, tool: usize) -> &mut Self {
        self.current_tool = tool;
        self
    }

    pub fn set_extruder_temp(&mut self, temperature: i32, wait: bool) -> &mut Self {
        let line = self.formatter.set_temperature(temperature, wait);
        self.gcode.push_str(&line);
        self
    }

    /// Dwell for `seconds`, nothing is written for non-positive times.
    pub fn wait(&mut self, seconds: f32) -> &mut Self {
        if seconds > 0.0 {
            let line = self.formatter.dwell(seconds);
            self.gcode.push_str(&line);
            self.elapsed_time += seconds;
        }
        self
    }

    pub fn set_extruder_trimpot(&mut self, current: i32) -> &mut Self {
        let line = self.formatter.set_extruder_current(current);
        self.gcode.push_str(&line);
        self
    }

    pub fn speed_override(&mut self, percent: i32) -> &mut Self {
        let line = self.formatter.speed_override(percent);
        self.gcode.push_str(&line);
        self
    }

    pub fn speed_override_backup(&mut self) -> &mut Self {
        if let Some(line) = self.formatter.speed_override_backup() {
            self.gcode.push_str(&line);
        }
        self
    }

    pub fn speed_override_restore(&mut self) -> &mut Self {
        if let Some(line) = self.formatter.speed_override_restore() {
            self.gcode.push_str(&line);
        }
        self
    }

    /// Part fan speed in percent. Repeated speeds are not written again.
    pub fn set_fan(&mut self, speed: u32) -> &mut Self {
        if speed != self.last_fan_speed {
            let line = self.formatter.set_fan(speed);
            self.gcode.push_str(&line);
            self.last_fan_speed = speed;
        }
        self
    }

    pub fn disable_linear_advance(&mut self) -> &mut Self {
        let line = self.formatter.disable_linear_advance(self.current_tool);
        self.gcode.push_str(&line);
        self
    }

    pub fn flush_planner_queue(&mut self) -> &mut Self {
        let line = self.formatter.flush_planner_queue();
        self.gcode.push_str(&line);
        self
    }

    pub fn reset_extruder(&mut self) -> &mut Self {
        self.gcode.push_str("G92 E0\n");
        self
    }

    pub fn append(&mut self, text: &str) -> &mut Self {
        self.gcode.push_str(text);
        self
    }

    pub fn comment_with_value(&mut self, comment: &str, value: impl std::fmt::Display) -> &mut Self {
        self.gcode.push_str(&format!(";{}{}\n", comment, value));
        self
    }

    pub fn placeholder(&mut self, placeholder: Placeholder) -> &mut Self {
        self.gcode.push_placeholder(placeholder);
        self
    }

    /// Unconditionally re-state the current (rotated) XY position.
    pub fn resync_position(&mut self, f: f32) -> &mut Self {
        let rotated = self.pos_rotated();
        self.gcode.push_str(&format!(
            "G1 X{:.3} Y{:.3} F{}\n",
            rotated.x,
            rotated.y,
            (f + 0.5).floor() as i64
        ));
        self.current_feedrate = f;
        self
    }

    pub fn add_wipe_point(&mut self, x: f32, y: f32) -> &mut Self {
        let rotated = self.rotate(Vec2f::new(x, y));
        self.wipe_path.push(rotated);
        self
    }

    /// Tower-local to output coordinates.
    pub fn rotate(&self, pt: Vec2f) -> Vec2f {
        let half = Vec2f::new(self.wipe_tower_width / 2.0, self.wipe_tower_depth / 2.0);
        let local = Vec2f::new(pt.x - half.x, pt.y + self.y_shift - half.y);
        local.rotate(self.internal_angle.to_radians()) + half
    }

    /// Inverse of [`rotate`](Self::rotate).
    pub fn unrotate(&self, pt: Vec2f) -> Vec2f {
        let half = Vec2f::new(self.wipe_tower_width / 2.0, self.wipe_tower_depth / 2.0);
        let local = (pt - half).rotate(-self.internal_angle.to_radians());
        Vec2f::new(local.x + half.x, local.y + half.y - self.y_shift)
    }

    fn max_e_speed(&self) -> f32 {
        self.max_e_speeds
            .get(self.current_tool)
            .copied()
            .unwrap_or(f32::MAX)
    }

    fn set_format_f(&mut self, f: f32) -> String {
        self.current_feedrate = f;
        format!(" F{}", (f + 0.5).floor() as i64)
    }
}

/// Index of the outline vertex closest to `pos`.
pub(crate) fn closest_vertex(outline: &[Vec2f], pos: Vec2f) -> Option<usize> {
    outline
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.distance_to(&pos).total_cmp(&b.distance_to(&pos)))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn writer() -> WipeTowerWriter {
        let mut w = WipeTowerWriter::new(
            0.2,
            0.5,
            GCodeFlavor::MarlinLegacy,
            &[FilamentParameters::default()],
        );
        w.set_initial_position(Vec2f::zero(), 60.0, 20.0, 0.0)
            .set_extrusion_flow(0.02)
            .set_z(0.2);
        w
    }

    fn g1_lines(w: &WipeTowerWriter) -> usize {
        w.gcode().text_lines().filter(|l| l.starts_with("G1")).count()
    }

    #[test]
    fn test_writer_header_tags() {
        let w = writer();
        let text = w.gcode().to_string();
        assert!(text.starts_with(";HEIGHT:0.2\n;TYPE:Wipe tower\n;WIDTH:0.5\n"));
    }

    #[test]
    fn test_writer_travel_and_extrude() {
        let mut w = writer();
        w.feedrate(1500.0);
        w.travel(10.0, 10.0, 0.0);
        w.extrude(20.0, 10.0, 0.0);

        let text = w.gcode().to_string();
        assert!(text.contains("G1 F1500\n"));
        assert!(text.contains("G1 X10.000 Y10.000\n"));
        assert!(text.contains("G1 X20.000 E0.2000\n"));
        assert_eq!(w.extrusions().len(), 2);
        assert_relative_eq!(w.get_and_reset_used_filament_length(), 0.2, epsilon = 1e-6);
        assert_eq!(w.get_and_reset_used_filament_length(), 0.0);
    }

    #[test]
    fn test_noop_move_is_not_written() {
        let mut w = writer();
        w.travel(5.0, 5.0, 3000.0);
        let before = w.gcode().to_string();
        let time_before = w.elapsed_time();

        w.extrude_explicit(5.0, 5.0, 0.0, 3000.0, false, true);
        w.extrude_explicit(5.0, 5.0, 0.0, 0.0, true, false);

        assert_eq!(w.gcode().to_string(), before);
        assert_eq!(w.elapsed_time(), time_before);
    }

    #[test]
    fn test_preview_width_matches_squashed_bead() {
        let area = FilamentParameters::default().filament_area;
        for (len, e) in [(10.0_f32, 0.3_f32), (2.5, 0.05), (40.0, 1.7)] {
            let mut w = writer();
            w.extrude_explicit(len, 0.0, e, 1200.0, false, false);
            let ex = w.extrusions();
            assert_eq!(ex.len(), 2);
            assert_eq!(ex[0].width, 0.0);
            let expected = e * area / (len * 0.2) + 0.2 * (1.0 - PI / 4.0);
            assert_relative_eq!(ex[1].width, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_suppressed_preview_has_no_extrusions() {
        let mut w = writer();
        w.suppress_preview();
        w.extrude(10.0, 0.0, 1200.0);
        w.resume_preview();
        assert!(w.extrusions().is_empty());
        assert_eq!(g1_lines(&w), 1);
    }

    #[test]
    fn test_volumetric_flow_clamp() {
        let params = FilamentParameters {
            max_e_speed: 2.0,
            ..FilamentParameters::default()
        };
        for requested in [3000.0_f32, 6000.0, 12000.0] {
            let mut w = WipeTowerWriter::new(0.2, 0.5, GCodeFlavor::MarlinLegacy, &[params.clone()]);
            w.set_initial_position(Vec2f::zero(), 60.0, 20.0, 0.0);
            let (len, e) = (20.0_f32, 2.0_f32);
            w.extrude_explicit(len, 0.0, e, requested, false, true);

            let time_s = len / w.current_feedrate() * 60.0;
            assert!(e / time_s <= 2.0 + 1e-4);
            assert_relative_eq!(w.elapsed_time(), time_s, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_unlimited_flow_keeps_feedrate() {
        let mut w = writer();
        w.extrude_explicit(20.0, 0.0, 5.0, 9000.0, false, false);
        assert_eq!(w.current_feedrate(), 9000.0);
    }

    #[test]
    fn test_rotation_round_trip() {
        let mut w = writer();
        w.set_initial_position(Vec2f::zero(), 60.0, 35.0, 180.0);
        w.set_y_shift(4.5);
        for p in [Vec2f::new(0.0, 0.0), Vec2f::new(12.5, 3.25), Vec2f::new(-7.0, 40.0)] {
            assert!(w.rotate(w.unrotate(p)).approx_eq(&p, 1e-4));
            assert!(w.unrotate(w.rotate(p)).approx_eq(&p, 1e-4));
        }
    }

    #[test]
    fn test_rotation_180_mirrors_about_center() {
        let mut w = writer();
        w.set_initial_position(Vec2f::zero(), 60.0, 20.0, 180.0);
        assert!(w.rotate(Vec2f::new(0.0, 0.0)).approx_eq(&Vec2f::new(60.0, 20.0), 1e-4));
    }

    #[test]
    fn test_load_move_x_advanced_respects_time() {
        let mut w = writer();
        w.travel(0.0, 1.0, 0.0);
        // 10 mm at 5 mm/s takes 2 s, covering 100 mm would need 50 mm/s
        w.load_move_x_advanced(100.0, 10.0, 5.0, 20.0);
        assert_relative_eq!(w.x(), 40.0, epsilon = 1e-4);
        assert_relative_eq!(w.current_feedrate(), 1200.0, epsilon = 1e-3);

        // Slow enough to reach the target
        let mut w = writer();
        w.load_move_x_advanced(10.0, 10.0, 5.0, 20.0);
        assert_relative_eq!(w.x(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_load_move_in_place_becomes_plain_load() {
        let mut w = writer();
        w.load_move_x_advanced(0.0, 3.0, 10.0, 50.0);
        assert!(w.gcode().to_string().contains("G1 E3.0000 F600\n"));
    }

    #[test]
    fn test_rectangle_starts_at_closest_corner() {
        let mut w = writer();
        w.travel(9.0, 9.0, 0.0);
        w.rectangle(Vec2f::zero(), 10.0, 10.0, 1200.0);
        // Four sides, one anchor
        assert_eq!(w.extrusions().len(), 5);
        assert!(w.extrusions()[0].pos.approx_eq(&Vec2f::new(10.0, 10.0), 1e-5));
        assert!(w.pos().approx_eq(&Vec2f::new(10.0, 10.0), 1e-5));
    }

    #[test]
    fn test_polygon_closes_loop() {
        let mut w = writer();
        let outline = [
            Vec2f::new(0.0, 0.0),
            Vec2f::new(5.0, 0.0),
            Vec2f::new(5.0, 5.0),
            Vec2f::new(0.0, 5.0),
        ];
        w.travel(6.0, 0.0, 0.0);
        w.polygon(&outline, 0.0);
        assert!(w.pos().approx_eq(&Vec2f::new(5.0, 0.0), 1e-6));
        assert_eq!(w.extrusions().len(), 5);
    }

    #[test]
    fn test_fan_is_idempotent() {
        let mut w = writer();
        w.set_fan(0);
        w.set_fan(50);
        w.set_fan(50);
        w.set_fan(0);
        let text = w.gcode().to_string();
        assert_eq!(text.matches("M106 S127").count(), 1);
        assert_eq!(text.matches("M107").count(), 1);
    }

    #[test]
    fn test_ram_moves_without_flow_limit() {
        let params = FilamentParameters {
            max_e_speed: 0.1,
            ..FilamentParameters::default()
        };
        let mut w = WipeTowerWriter::new(0.2, 0.5, GCodeFlavor::MarlinLegacy, &[params]);
        w.set_initial_position(Vec2f::new(1.0, 1.0), 60.0, 20.0, 0.0);
        w.ram(1.0, 11.0, 0.0, 0.0, 2.0, 600.0);
        assert_eq!(w.current_feedrate(), 600.0);
        assert!(w.pos().approx_eq(&Vec2f::new(11.0, 1.0), 1e-6));
        assert_relative_eq!(w.get_and_reset_used_filament_length(), 2.0);
    }

    #[test]
    fn test_wipe_points_are_rotated() {
        let mut w = writer();
        w.set_initial_position(Vec2f::zero(), 60.0, 20.0, 180.0);
        w.add_wipe_point(0.0, 0.0);
        assert!(w.wipe_path()[0].approx_eq(&Vec2f::new(60.0, 20.0), 1e-4));
    }
}
