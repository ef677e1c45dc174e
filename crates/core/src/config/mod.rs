use std::{fs, path::Path, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{control::TriggerSource, render::Color, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    /// Index into [`TriggerSource::ALL`].
    pub trigger_source: usize,
    pub video: VideoConfig,
    pub palette: PaletteConfig,
    pub remote: RemoteConfig,
    pub modes: ModesConfig,
    pub paths: PathsConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Reads the configuration at `path`, writing the defaults there first
    /// when no file exists yet. Loaded values are repaired with
    /// [`AppConfig::validate`].
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(?path, "created default config");
            return Ok(config);
        }

        let text = fs::read_to_string(path)?;
        let mut config: AppConfig = serde_json::from_str(&text)?;
        config.validate();
        tracing::info!(?path, "loaded config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Clamps values that would otherwise break the core into their valid
    /// ranges. Every repair is logged.
    pub fn validate(&mut self) {
        let defaults = AppConfig::default();

        if self.trigger_source >= TriggerSource::ALL.len() {
            tracing::warn!(value = self.trigger_source, "trigger_source out of range");
            self.trigger_source = defaults.trigger_source;
        }
        if !(0.0..=1.0).contains(&self.audio.gain) || self.audio.gain.is_nan() {
            tracing::warn!(value = self.audio.gain, "audio gain out of range");
            self.audio.gain = defaults.audio.gain;
        }
        if self.audio.window == 0 {
            self.audio.window = defaults.audio.window;
        }
        if self.audio.channels == 0 {
            self.audio.channels = defaults.audio.channels;
        }
        if self.audio.sample_rate == 0 {
            self.audio.sample_rate = defaults.audio.sample_rate;
        }
        if self.video.width == 0 || self.video.height == 0 {
            tracing::warn!(
                width = self.video.width,
                height = self.video.height,
                "invalid resolution"
            );
            self.video.width = defaults.video.width;
            self.video.height = defaults.video.height;
        }
        if self.video.fps == 0 {
            self.video.fps = defaults.video.fps;
        }
    }

    /// The trigger source the config selects.
    pub fn trigger(&self) -> TriggerSource {
        TriggerSource::from_index(self.trigger_source).unwrap_or_default()
    }
}

/// Where audio samples come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioBackend {
    /// First host device that exposes capture.
    #[default]
    Device,
    /// Generated sine input, for running without hardware.
    Synthetic { frequency: f32, amplitude: f32 },
    /// No sampler at all; every level reads zero.
    Silent,
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per RMS window.
    pub window: usize,
    /// Stored gain setting in [0, 1]; see [`derive_gain`](crate::analysis::derive_gain).
    pub gain: f32,
    pub backend: AudioBackend,
    /// Abort startup when the sampler fails instead of running silent.
    pub require_audio: bool,
    pub shutdown_grace_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            window: 8,
            gain: 0.25,
            backend: AudioBackend::Device,
            require_audio: false,
            shutdown_grace_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub auto_clear: bool,
    pub show_osd: bool,
    pub background: Color,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            auto_clear: true,
            show_osd: false,
            background: Color::BLACK,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub fg_palette: usize,
    pub bg_palette: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub listen: String,
    pub reply: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: "0.0.0.0:12345".to_string(),
            reply: "127.0.0.1:12346".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub initial: Option<String>,
    /// Advance to the next mode every this many seconds outside the menu.
    pub advance_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub grabs: PathBuf,
    /// JSON array of cosine palettes. Defaults are used when it is missing.
    pub palettes: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            grabs: PathBuf::from("grabs"),
            palettes: PathBuf::from("palettes.json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_defaults_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("system").join("config.json");

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn fills_missing_sections_from_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "audio": { "gain": 0.5 }, "trigger_source": 2 }"#).unwrap();

        let config = AppConfig::load_or_create(&path).unwrap();
        assert_eq!(config.audio.gain, 0.5);
        assert_eq!(config.audio.window, 8);
        assert_eq!(config.trigger(), TriggerSource::AudioOrNote);
        assert_eq!(config.video.fps, 30);
        assert_eq!(config.paths.palettes, PathBuf::from("palettes.json"));
    }

    #[test]
    fn repairs_out_of_range_values() {
        let mut config = AppConfig::default();
        config.trigger_source = 42;
        config.audio.gain = 3.0;
        config.video.width = 0;
        config.validate();

        assert_eq!(config.trigger_source, 0);
        assert_eq!(config.audio.gain, 0.25);
        assert_eq!(config.video.width, 1280);
    }

    #[test]
    fn rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = AppConfig::load_or_create(&path).unwrap_err();
        assert!(matches!(err, crate::LumenError::Json(_)));
    }
}
