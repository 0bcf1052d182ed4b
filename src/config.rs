//! Render configuration.
//!
//! Loaded once (usually from a `render.toml`) and captured by the render
//! manager at construction; read-only afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading or validating a [`RenderConfig`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse render config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid render config: {0}")]
    Invalid(String),
}

/// Blending between low- and high-quality tiles after a selection change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlendConfig {
    /// Seconds until freshly selected main-quality tiles are fully opaque.
    pub duration_secs: f32,
    /// Weight of the newest frame interval in the smoothed frame time, in (0, 1].
    pub smoothing: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            duration_secs: 0.5,
            smoothing: 0.2,
        }
    }
}

/// Display and render parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Composite (render-to-screen) texture width.
    pub target_width: u32,
    /// Composite (render-to-screen) texture height.
    pub target_height: u32,
    /// Display output width.
    pub output_width: u32,
    /// Display output height.
    pub output_height: u32,
    /// Horizontal field of view in degrees.
    pub h_fov: f32,
    /// Vertical field of view in degrees.
    pub v_fov: f32,
    /// Pitch limit in degrees.
    pub max_pitch: f32,
    /// Rays per axis used to sample the viewport.
    pub viewport_samples: u32,
    pub coverage_grid_x: u32,
    pub coverage_grid_y: u32,
    pub blend: BlendConfig,
    pub clear_color: [f32; 4],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            target_width: 3840,
            target_height: 1920,
            output_width: 1920,
            output_height: 1080,
            h_fov: 90.0,
            v_fov: 90.0,
            max_pitch: 89.9,
            viewport_samples: 32,
            coverage_grid_x: 64,
            coverage_grid_y: 32,
            blend: BlendConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl RenderConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RenderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded render config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.target_width == 0 || self.target_height == 0 {
            return invalid(format!(
                "target size {}x{} must be non-zero",
                self.target_width, self.target_height
            ));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return invalid(format!(
                "output size {}x{} must be non-zero",
                self.output_width, self.output_height
            ));
        }
        for (name, fov) in [("h_fov", self.h_fov), ("v_fov", self.v_fov)] {
            if !(fov > 0.0 && fov < 180.0) {
                return invalid(format!("{name} {fov} must lie in (0, 180)"));
            }
        }
        if !(self.max_pitch > 0.0 && self.max_pitch < 90.0) {
            return invalid(format!("max_pitch {} must lie in (0, 90)", self.max_pitch));
        }
        if self.viewport_samples == 0 {
            return invalid("viewport_samples must be non-zero".into());
        }
        if self.coverage_grid_x == 0 || self.coverage_grid_y == 0 {
            return invalid("coverage grid must be non-zero".into());
        }
        if !(self.blend.duration_secs > 0.0) {
            return invalid(format!(
                "blend.duration_secs {} must be positive",
                self.blend.duration_secs
            ));
        }
        if !(self.blend.smoothing > 0.0 && self.blend.smoothing <= 1.0) {
            return invalid(format!(
                "blend.smoothing {} must lie in (0, 1]",
                self.blend.smoothing
            ));
        }
        Ok(())
    }

    /// Width over height of the display output.
    pub fn output_aspect(&self) -> f32 {
        self.output_width as f32 / self.output_height as f32
    }
}
