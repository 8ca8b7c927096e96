//! Purge volume lookup between filaments.

use crate::config::PrintConfig;

/// Purge volume used for pairs outside the matrix (mm³).
pub const DEFAULT_PURGE_VOLUME: f32 = 140.0;

/// Square matrix of purge volumes, `[from][to]` in mm³.
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeVolumes {
    size: usize,
    volumes: Vec<Vec<f32>>,
}

impl PurgeVolumes {
    /// Uniform matrix with a zero diagonal.
    pub fn new(size: usize, default_volume: f32) -> Self {
        let mut volumes = vec![vec![default_volume; size]; size];
        for (i, row) in volumes.iter_mut().enumerate() {
            row[i] = 0.0;
        }
        Self { size, volumes }
    }

    /// Build from the configured wiping matrix.
    ///
    /// Every entry is raised to the target filament's minimal purge. Printers
    /// with one nozzle per filament need no purge beyond that minimum, so the
    /// configured matrix is only used for single extruder MM setups.
    pub fn from_config(config: &PrintConfig) -> Self {
        let size = config.num_filaments();
        let use_matrix = config.single_extruder_multi_material
            && config.wiping_volumes_matrix.len() == size * size;

        let volumes = (0..size)
            .map(|from| {
                (0..size)
                    .map(|to| {
                        let configured = if use_matrix {
                            config.wiping_volumes_matrix[from * size + to] as f32
                        } else {
                            0.0
                        };
                        let minimal = config.filaments[to].filament_minimal_purge_on_wipe_tower as f32;
                        configured.max(minimal)
                    })
                    .collect()
            })
            .collect();

        Self { size, volumes }
    }

    pub fn get(&self, from: usize, to: usize) -> f32 {
        if from < self.size && to < self.size {
            self.volumes[from][to]
        } else {
            DEFAULT_PURGE_VOLUME
        }
    }

    pub fn set(&mut self, from: usize, to: usize, volume: f32) {
        if from < self.size && to < self.size {
            self.volumes[from][to] = volume;
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Default for PurgeVolumes {
    fn default() -> Self {
        Self::new(0, DEFAULT_PURGE_VOLUME)
    }
}
