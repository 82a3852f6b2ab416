// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every key is optional; missing keys and a missing file fall back to the
// defaults below. A file that exists but does not parse is reported and
// ignored.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::RendererConfig;

/// Frames-in-flight range the renderer accepts
pub const FRAMES_IN_FLIGHT_RANGE: std::ops::RangeInclusive<usize> = 1..=3;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Test".to_string(),
            width: 800,
            height: 600,
            min_width: 400,
            min_height: 300,
            max_width: 7680,
            max_height: 4320,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub frame_cap: bool,
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            frame_cap: true,
            frames_in_flight: 2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Renderer settings. Validation additionally requires a debug build.
    pub fn renderer_config(&self) -> RendererConfig {
        let requested = self.graphics.frames_in_flight;
        let frames_in_flight = requested.clamp(
            *FRAMES_IN_FLIGHT_RANGE.start(),
            *FRAMES_IN_FLIGHT_RANGE.end(),
        );
        if frames_in_flight != requested {
            log::warn!(
                "frames_in_flight = {} out of range, using {}",
                requested,
                frames_in_flight
            );
        }

        RendererConfig {
            validation_enabled: cfg!(debug_assertions) && self.debug.validation_layers,
            frame_cap_enabled: self.graphics.frame_cap,
            frames_in_flight,
            clear_color: self.graphics.clear_color,
            vertex_shader: self.shaders.vertex.clone(),
            fragment_shader: self.shaders.fragment.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.window.title, "Vulkan Test");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!((config.window.min_width, config.window.min_height), (400, 300));
        assert_eq!((config.window.max_width, config.window.max_height), (7680, 4320));
        assert!(config.graphics.frame_cap);
        assert_eq!(config.graphics.frames_in_flight, 2);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "Triangle"

            [graphics]
            frame_cap = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Triangle");
        assert_eq!(config.window.width, 800);
        assert!(!config.graphics.frame_cap);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("hello_triangle_no_such_config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.graphics.frames_in_flight, 2);
    }

    #[test]
    fn test_renderer_config_clamps_frames_in_flight() {
        let mut config = Config::default();

        config.graphics.frames_in_flight = 0;
        assert_eq!(config.renderer_config().frames_in_flight, 1);

        config.graphics.frames_in_flight = 8;
        assert_eq!(config.renderer_config().frames_in_flight, 3);

        config.graphics.frames_in_flight = 1;
        assert_eq!(config.renderer_config().frames_in_flight, 1);
    }

    #[test]
    fn test_validation_needs_config_flag() {
        let mut config = Config::default();
        config.debug.validation_layers = false;
        assert!(!config.renderer_config().validation_enabled);

        config.debug.validation_layers = true;
        assert_eq!(
            config.renderer_config().validation_enabled,
            cfg!(debug_assertions)
        );
    }
}
