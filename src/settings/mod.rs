use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::control::range::{DEFAULT_MAX, DEFAULT_MIN};
use crate::control::selection::Effect;

impl std::fmt::Display for AudioSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Input Port: {}", self.input_port)?;
        writeln!(f, "Output Left Port: {}", self.output_left_port)?;
        writeln!(f, "Output Right Port: {}", self.output_right_port)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub input_port: String,
    pub output_left_port: String,
    pub output_right_port: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            input_port: "system:capture_1".to_string(),
            output_left_port: "system:playback_1".to_string(),
            output_right_port: "system:playback_2".to_string(),
        }
    }
}

impl std::fmt::Display for ModulationSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Region: {}", self.region)?;
        writeln!(f, "Range Seed: {}..{}", self.range_min, self.range_max)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModulationSettings {
    /// Feature region whose vertical extent drives the effect.
    pub region: String,
    pub range_min: f32,
    pub range_max: f32,
}

impl Default for ModulationSettings {
    fn default() -> Self {
        Self {
            region: "mouth".to_string(),
            range_min: DEFAULT_MIN,
            range_max: DEFAULT_MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub modulation: ModulationSettings,
    pub ir_path: String,
    pub effect: Effect,
    pub convolution_enabled: bool,
}

impl std::fmt::Display for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "------------------------------")?;

        writeln!(f, "Audio Settings:")?;
        writeln!(f, "{}", self.audio)?;

        writeln!(f, "Modulation Settings:")?;
        writeln!(f, "{}", self.modulation)?;

        writeln!(f, "Settings:")?;
        writeln!(f, "Impulse Response: {}", self.ir_path)?;
        writeln!(f, "Effect: {}", self.effect)?;
        writeln!(f, "Convolution Enabled: {}", self.convolution_enabled)?;
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            audio: AudioSettings::default(),
            modulation: ModulationSettings::default(),
            ir_path: "./ir.wav".to_string(),
            effect: Effect::default(),
            convolution_enabled: true,
        }
    }
}

impl Settings {
    /// Reads settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Self = serde_json::from_str(&contents).context("Failed to parse settings")?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"effect": "wah", "modulation": {{"region": "lips"}}}}"#
        )
        .unwrap();

        let settings = Settings::load(file.path()).unwrap();

        assert_eq!(settings.effect, Effect::Wah);
        assert_eq!(settings.modulation.region, "lips");
        assert_eq!(settings.modulation.range_min, DEFAULT_MIN);
        assert_eq!(settings.audio, AudioSettings::default());
        assert!(settings.convolution_enabled);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(&dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Settings::load(file.path()).is_err());
    }
}
