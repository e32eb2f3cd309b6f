use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CloudError, CloudResult};

/// Cloud generation settings.
///
/// Each generation task clones this at creation time, so a job in flight
/// never observes a live edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Horizontal tile size used to align and cache generated geometry, in blocks.
    pub chunk_size: i32,
    /// Distance between grid samples, in blocks.
    pub spacing: f64,
    /// Generation radius around the viewpoint, in blocks.
    pub distance: f32,
    /// Vertical rise of the densest points, in blocks.
    pub spread_y: f32,
    /// Per-point jitter magnitude as a fraction of the spacing.
    pub jitter: f32,
    /// Softness of the density threshold.
    pub fuzziness: f32,
    /// Horizontal drift speed of the cloud layer, in blocks per second.
    pub wind_speed: f32,
    /// Keep buffer storage persistently mapped.
    pub persistent_buffers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            spacing: 4.0,
            distance: 128.0,
            spread_y: 12.0,
            jitter: 1.0,
            fuzziness: 0.25,
            wind_speed: 0.5,
            persistent_buffers: true,
        }
    }
}

impl Config {
    /// Generation radius in whole blocks.
    pub fn block_distance(&self) -> i32 {
        self.distance as i32
    }

    /// Parse settings from a TOML document. Missing fields fall back to
    /// their defaults.
    pub fn from_toml_str(text: &str) -> CloudResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> CloudResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CloudError::ConfigIo {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
