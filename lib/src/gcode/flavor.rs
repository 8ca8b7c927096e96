//! Firmware-specific command formatting.
//!
//! The writer asks a [`CommandFormatter`] for every command whose syntax
//! differs between firmware families. A formatter is selected once from the
//! [`GCodeFlavor`] when the writer is created.

use crate::config::GCodeFlavor;
use std::fmt::Debug;

/// Formats firmware commands for one flavor family.
///
/// Every returned string is a complete line including the trailing newline.
pub trait CommandFormatter: Debug + Send + Sync {
    /// Family name for logging.
    fn name(&self) -> &'static str;

    fn set_temperature(&self, temperature: i32, wait: bool) -> String {
        format!("{} S{}\n", if wait { "M109" } else { "M104" }, temperature)
    }

    fn dwell(&self, seconds: f32) -> String {
        format!("G4 S{:.3}\n", seconds)
    }

    /// Block until all queued moves are executed.
    fn flush_planner_queue(&self) -> String {
        "G4 S0\n".to_string()
    }

    /// Set the extruder motor current (mA).
    fn set_extruder_current(&self, current: i32) -> String {
        format!("M907 E{}\n", current)
    }

    fn disable_linear_advance(&self, tool: usize) -> String;

    fn speed_override(&self, percent: i32) -> String {
        format!("M220 S{}\n", percent)
    }

    /// Save the user's speed override, if the firmware can.
    fn speed_override_backup(&self) -> Option<String> {
        None
    }

    fn speed_override_restore(&self) -> Option<String> {
        None
    }

    /// Part cooling fan, `speed` in percent.
    fn set_fan(&self, speed: u32) -> String {
        if speed == 0 {
            "M107\n".to_string()
        } else {
            format!("M106 S{}\n", 255 * speed.min(100) / 100)
        }
    }
}

#[derive(Debug)]
pub struct MarlinCommands;

impl CommandFormatter for MarlinCommands {
    fn name(&self) -> &'static str {
        "marlin"
    }

    fn disable_linear_advance(&self, _tool: usize) -> String {
        "M900 K0\n".to_string()
    }

    fn speed_override_backup(&self) -> Option<String> {
        Some("M220 B\n".to_string())
    }

    fn speed_override_restore(&self) -> Option<String> {
        Some("M220 R\n".to_string())
    }
}

#[derive(Debug)]
pub struct RepRapCommands;

impl CommandFormatter for RepRapCommands {
    fn name(&self) -> &'static str {
        "reprap"
    }

    fn set_extruder_current(&self, current: i32) -> String {
        format!("M906 E{}\n", current)
    }

    fn disable_linear_advance(&self, tool: usize) -> String {
        format!("M572 D{} S0\n", tool)
    }
}

#[derive(Debug)]
pub struct KlipperCommands;

impl CommandFormatter for KlipperCommands {
    fn name(&self) -> &'static str {
        "klipper"
    }

    // Klipper only accepts milliseconds for G4
    fn dwell(&self, seconds: f32) -> String {
        format!("G4 P{}\n", (seconds * 1000.0).round() as i64)
    }

    fn flush_planner_queue(&self) -> String {
        "G4 P0\n".to_string()
    }

    fn disable_linear_advance(&self, _tool: usize) -> String {
        "SET_PRESSURE_ADVANCE ADVANCE=0\n".to_string()
    }
}

/// Smoothieware, Mach3 and anything else speaking plain Marlin-like G-code.
#[derive(Debug)]
pub struct GenericCommands;

impl CommandFormatter for GenericCommands {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn disable_linear_advance(&self, _tool: usize) -> String {
        "M900 K0\n".to_string()
    }
}

static MARLIN: MarlinCommands = MarlinCommands;
static REPRAP: RepRapCommands = RepRapCommands;
static KLIPPER: KlipperCommands = KlipperCommands;
static GENERIC: GenericCommands = GenericCommands;

impl GCodeFlavor {
    /// Command formatter for this flavor's family.
    pub fn formatter(self) -> &'static dyn CommandFormatter {
        match self {
            GCodeFlavor::MarlinLegacy | GCodeFlavor::MarlinFirmware => &MARLIN,
            GCodeFlavor::RepRapSprinter | GCodeFlavor::RepRapFirmware => &REPRAP,
            GCodeFlavor::Klipper => &KLIPPER,
            GCodeFlavor::Smoothie | GCodeFlavor::Mach3 => &GENERIC,
        }
    }
}
