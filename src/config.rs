use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sustain_enabled: bool,
    pub velocity_enabled: bool,
    pub tempo: f64,
    pub no_doubles: bool,
    pub hold_keys: bool,
    pub use_midi_output: bool,
    pub midi_device: Option<String>,
    pub target_window: Option<String>,
    pub keyboard_controls_enabled: bool,
    /// hotkey name -> command name, see `Command`
    pub keyboard_bindings: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let keyboard_bindings = [
            ("f1", "play"),
            ("f2", "pause"),
            ("f3", "stop"),
            ("f4", "slow_down"),
            ("f5", "speed_up"),
            ("f6", "toggle_sustain"),
            ("f7", "toggle_velocity"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            sustain_enabled: false,
            velocity_enabled: false,
            tempo: 100.0,
            no_doubles: true,
            hold_keys: false,
            use_midi_output: false,
            midi_device: None,
            target_window: None,
            keyboard_controls_enabled: true,
            keyboard_bindings,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PlayerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&text).map_err(|e| PlayerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|source| PlayerError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| PlayerError::Config(e.to_string()))?;
        fs::write(path, text).map_err(|source| PlayerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A config file kept in sync with every change
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    config: Config,
}

impl ConfigStore {
    /// Load `path`, creating it with defaults if missing. A file that cannot
    /// be read or parsed is left alone and defaults are used.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = if path.exists() {
            match Config::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Error loading config: {}. Using defaults.", e);
                    Config::default()
                }
            }
        } else {
            let config = Config::default();
            if let Err(e) = config.save(&path) {
                tracing::warn!("Could not write default config: {}", e);
            }
            config
        };

        Self { path, config }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn update(&mut self, f: impl FnOnce(&mut Config)) -> Result<()> {
        f(&mut self.config);
        self.config.save(&self.path)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.config = Config::default();
        self.config.save(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ron");

        let store = ConfigStore::open(&path);
        assert_eq!(store.config(), &Config::default());
        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");

        let mut store = ConfigStore::open(&path);
        store
            .update(|c| {
                c.tempo = 75.0;
                c.midi_device = Some("Loopback".into());
            })
            .unwrap();

        let reopened = ConfigStore::open(&path);
        assert_eq!(reopened.config().tempo, 75.0);
        assert_eq!(reopened.config().midi_device.as_deref(), Some("Loopback"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        fs::write(&path, "(hold_keys: true)").unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.hold_keys);
        assert!(config.no_doubles);
        assert_eq!(config.keyboard_bindings.get("f3").map(String::as_str), Some("stop"));
    }

    #[test]
    fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ron");
        fs::write(&path, "{{ not ron").unwrap();

        let store = ConfigStore::open(&path);
        assert_eq!(store.config(), &Config::default());
        // the broken file is not clobbered
        assert_eq!(fs::read_to_string(&path).unwrap(), "{{ not ron");
    }

    #[test]
    fn test_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ConfigStore::open(dir.path().join("config.ron"));
        store.update(|c| c.sustain_enabled = true).unwrap();
        store.reset().unwrap();
        assert!(!store.config().sustain_enabled);
    }
}
