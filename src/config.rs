//! Application settings.
//!
//! Loaded from an optional `inkloop.ron` in the working directory; any
//! missing field (or the whole file) falls back to defaults.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Camera device index.
    pub camera_index: u32,
    /// Frame buffer size used until the camera reports its resolution.
    pub initial_width: u32,
    pub initial_height: u32,
    /// Number of recordable ink layers (the always-live layer is extra).
    pub recordable_layers: usize,
    /// Work cap for the render pipeline, in ticks per second.
    pub capture_hz: f64,
    /// Per-layer cap on recorded frames; recording past it drops frames.
    pub max_frames_per_layer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            initial_width: 1280,
            initial_height: 720,
            recordable_layers: 5,
            capture_hz: 35.0,
            max_frames_per_layer: 1000,
        }
    }
}

impl AppConfig {
    /// Load settings from `path`, falling back to defaults when the file
    /// is absent or malformed.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => return Self::default(),
        };

        match ron::from_str(&text) {
            Ok(config) => {
                log::info!("Loaded settings from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!(
                    "Malformed settings file {}: {} (using defaults)",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.recordable_layers, 5);
        assert_eq!(config.capture_hz, 35.0);
        assert_eq!(config.max_frames_per_layer, 1000);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: AppConfig = ron::from_str("(camera_index: 2)").unwrap();
        assert_eq!(config.camera_index, 2);
        assert_eq!(config.recordable_layers, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load(Path::new("does-not-exist.ron"));
        assert_eq!(config.camera_index, 0);
    }

    #[test]
    fn test_malformed_text_rejected() {
        assert!(ron::from_str::<AppConfig>("(camera_index: \"two\")").is_err());
    }
}
