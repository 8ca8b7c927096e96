//! Multi-material integration module.
//!
//! This module wires the print configuration, the purge volumes and the
//! wipe tower together for a complete multi-material print.
//!
//! # Overview
//!
//! When printing with multiple filaments, the G-code pipeline needs to:
//! 1. Register every configured filament with the wipe tower
//! 2. Plan a toolchange for every switch between consecutive tools, with the
//!    purge volume of that pair
//! 3. Prime all tools on the bed before the first layer
//! 4. Generate the tower layers and unload the last filament at the end
//! 5. Substitute the user's toolchange G-code into the tower output
//!
//! [`MultiMaterialCoordinator`] orchestrates these operations.

use super::fragment::Placeholder;
use super::purge_volumes::PurgeVolumes;
use super::wipe_tower::{FilamentParameters, ToolChangeResult, WipeTower, WipeTowerConfig};
use crate::config::PrintConfig;
use crate::{Error, Result};
use tracing::{debug, info};

/// Tools printed on one layer, in printing order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiMaterialLayer {
    pub print_z: f32,
    pub layer_height: f32,
    /// Tools used on this layer, in the order they print
    pub tools: Vec<usize>,
}

impl MultiMaterialLayer {
    pub fn new(print_z: f32, layer_height: f32, tools: Vec<usize>) -> Self {
        Self {
            print_z,
            layer_height,
            tools,
        }
    }
}

/// Wipe tower bounding box on the bed, brim included.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WipeTowerBounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub height: f32,
}

impl WipeTowerBounds {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn depth(&self) -> f32 {
        self.max_y - self.min_y
    }
}

/// Everything the tower contributes to a print.
#[derive(Debug, Clone, Default)]
pub struct WipeTowerOutput {
    /// Priming lines, one result per primed tool
    pub priming: Vec<ToolChangeResult>,
    /// One entry per tower layer
    pub layers: Vec<Vec<ToolChangeResult>>,
    pub final_purge: Option<ToolChangeResult>,
    /// Filament used per tool on the tower (mm)
    pub used_filament: Vec<f32>,
    pub num_tool_changes: u32,
}

/// Coordinates multi-material printing operations.
#[derive(Debug)]
pub struct MultiMaterialCoordinator {
    config: PrintConfig,
    filaments: Vec<FilamentParameters>,
    purge_volumes: PurgeVolumes,
    layers: Vec<MultiMaterialLayer>,
    wipe_tower: Option<WipeTower>,
}

impl MultiMaterialCoordinator {
    /// Validate the configuration and resolve the filament parameters.
    pub fn new(config: PrintConfig) -> Result<Self> {
        config.validate()?;
        let filaments = (0..config.num_filaments())
            .map(|idx| FilamentParameters::from_config(&config, idx))
            .collect::<Result<Vec<_>>>()?;
        let purge_volumes = PurgeVolumes::from_config(&config);

        Ok(Self {
            config,
            filaments,
            purge_volumes,
            layers: Vec::new(),
            wipe_tower: None,
        })
    }

    pub fn config(&self) -> &PrintConfig {
        &self.config
    }

    pub fn purge_volumes(&self) -> &PurgeVolumes {
        &self.purge_volumes
    }

    /// Replace the purge volume matrix, e.g. with user-edited volumes.
    pub fn set_purge_volumes(&mut self, purge_volumes: PurgeVolumes) {
        self.purge_volumes = purge_volumes;
    }

    pub fn is_multi_material(&self) -> bool {
        self.config.num_filaments() > 1
    }

    pub fn wipe_tower(&self) -> Option<&WipeTower> {
        self.wipe_tower.as_ref()
    }

    /// Tool loaded when the print starts.
    pub fn initial_tool(&self) -> usize {
        self.layers
            .iter()
            .find_map(|layer| layer.tools.first().copied())
            .unwrap_or(0)
    }

    /// Order in which the tools are primed: every used tool once, the
    /// initial tool last so it stays loaded.
    pub fn priming_order(&self) -> Vec<usize> {
        let initial = self.initial_tool();
        let mut order: Vec<usize> = Vec::new();
        for &tool in self.layers.iter().flat_map(|layer| &layer.tools) {
            if tool != initial && !order.contains(&tool) {
                order.push(tool);
            }
        }
        order.push(initial);
        order
    }

    /// Plan the wipe tower for the given layers.
    ///
    /// Layers must be sorted by `print_z`. Every switch between two
    /// consecutive tools, also across layer boundaries, becomes a toolchange
    /// on the layer where the new tool first prints.
    pub fn plan(&mut self, layers: Vec<MultiMaterialLayer>) -> Result<&WipeTower> {
        self.layers = layers;
        let initial_tool = self.initial_tool();

        let mut tower = WipeTower::new(WipeTowerConfig::from_print_config(&self.config), initial_tool);
        for (idx, params) in self.filaments.iter().enumerate() {
            tower.set_extruder(idx, params.clone());
        }

        let mut current = initial_tool;
        for layer in &self.layers {
            let mut changed = false;
            for &tool in &layer.tools {
                if tool == current {
                    continue;
                }
                let volume = self.purge_volumes.get(current, tool);
                tower.plan_toolchange(layer.print_z, layer.layer_height, current, tool, volume)?;
                current = tool;
                changed = true;
            }
            if !changed {
                tower.plan_toolchange(layer.print_z, layer.layer_height, current, current, 0.0)?;
            }
        }

        debug!(
            layers = self.layers.len(),
            initial_tool,
            planned = tower.plan().len(),
            "multi-material plan ready"
        );
        Ok(&*self.wipe_tower.insert(tower))
    }

    /// Generate the tower: optional priming, all layers and the final purge.
    pub fn generate(&mut self, prime: bool) -> Result<WipeTowerOutput> {
        let first_layer_height = self.layers.first().map_or(0.2, |layer| layer.layer_height);
        let priming_order = self.priming_order();
        let tower = self
            .wipe_tower
            .as_mut()
            .ok_or_else(|| Error::Config("wipe tower generated before planning".into()))?;

        let priming = if prime && !self.layers.is_empty() {
            tower.prime(first_layer_height, &priming_order, &self.purge_volumes)?
        } else {
            Vec::new()
        };
        let layers = tower.generate()?;
        let final_purge = if layers.is_empty() {
            None
        } else {
            Some(tower.final_purge()?)
        };

        info!(
            primed = priming.len(),
            layers = layers.len(),
            toolchanges = tower.get_number_of_toolchanges(),
            "wipe tower output ready"
        );
        Ok(WipeTowerOutput {
            priming,
            layers,
            final_purge,
            used_filament: tower.get_used_filament().to_vec(),
            num_tool_changes: tower.get_number_of_toolchanges(),
        })
    }

    /// Footprint of the generated tower, rotation ignored.
    pub fn bounds(&self) -> Option<WipeTowerBounds> {
        let tower = self.wipe_tower.as_ref()?;
        let pos = tower.position();
        let brim = tower.get_brim_width();
        Some(WipeTowerBounds {
            min_x: pos.x - brim,
            min_y: pos.y - brim,
            max_x: pos.x + tower.width() + brim,
            max_y: pos.y + tower.get_depth() + brim,
            height: tower.get_height(),
        })
    }

    /// Render a result to text, expanding the configured toolchange G-code.
    pub fn render(&self, result: &ToolChangeResult) -> String {
        result.gcode.render_with(|placeholder| match placeholder {
            Placeholder::ToolchangeGcode { from, to } if !self.config.toolchange_gcode.is_empty() => Some(
                self.config
                    .toolchange_gcode
                    .replace("{previous_extruder}", &from.to_string())
                    .replace("{next_extruder}", &to.to_string()),
            ),
            _ => None,
        })
    }
}
