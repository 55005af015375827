// ============================================================
//  config.rs — Réglages persistants (TOML)
//
//  <config_dir>/audio-recorder/config.toml
//  Fichier absent → valeurs par défaut ; illisible → valeurs par
//  défaut, erreur signalée, fichier jamais réécrit.
// ============================================================

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::dsp::{DEFAULT_FFT_SIZE, DEFAULT_MAX_DB, DEFAULT_MIN_DB, DEFAULT_SMOOTHING};

pub const APP_DIR: &str = "audio-recorder";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("lecture/écriture de {path} : {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration illisible : {0}")]
    Parse(#[from] toml::de::Error),
    #[error("sérialisation impossible : {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("réglage invalide : {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub audio: AudioSettings,
    pub estimator: EstimatorSettings,
    pub waveform: WaveformSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Nom du micro ; `None` = périphérique par défaut.
    pub device: Option<String>,
    /// Taille de la fenêtre d'analyse (puissance de 2) ; fft_size / 2 bins.
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_db: f32,
    pub max_db: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        AudioSettings {
            device: None,
            fft_size: DEFAULT_FFT_SIZE,
            smoothing: DEFAULT_SMOOTHING,
            min_db: DEFAULT_MIN_DB,
            max_db: DEFAULT_MAX_DB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EstimatorSettings {
    /// Premier calcul dès le début de l'enregistrement plutôt qu'au premier tick.
    pub sample_immediately: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformSettings {
    pub scrolling: bool,
    pub continuous: bool,
    pub continuous_duration_secs: f32,
    pub scroll_window_secs: f32,
}

impl Default for WaveformSettings {
    fn default() -> Self {
        WaveformSettings {
            scrolling: false,
            continuous: true,
            continuous_duration_secs: 30.0,
            scroll_window_secs: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filtre env_logger (`RUST_LOG` reste prioritaire).
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            level: "info".into(),
            file: None,
        }
    }
}

/// Réglages obtenus au démarrage.
#[derive(Debug)]
pub struct Loaded {
    pub settings: Settings,
    /// Fichier présent mais illisible : `settings` vaut les valeurs par
    /// défaut et ne doit pas être réécrit par-dessus le fichier.
    pub error: Option<ConfigError>,
}

impl Loaded {
    /// Chemin où enregistrer les changements ; `None` si le fichier
    /// existant n'a pas pu être lu.
    pub fn save_path(&self, path: &Path) -> Option<PathBuf> {
        self.error.is_none().then(|| path.to_path_buf())
    }
}

/// Destination et filtre effectifs du journal.
#[derive(Debug, Clone, PartialEq)]
pub struct LogTarget {
    pub filters: String,
    pub file: PathBuf,
}

impl LogSettings {
    /// Priorités : `RUST_LOG` > `--log-level` > `log.level` ;
    /// `--log-file` > `log.file` > fichier par défaut.
    pub fn resolve(
        &self,
        cli_level: Option<&str>,
        cli_file: Option<&Path>,
        rust_log: Option<&str>,
    ) -> LogTarget {
        let filters = rust_log
            .filter(|f| !f.trim().is_empty())
            .or(cli_level)
            .unwrap_or(self.level.as_str())
            .to_string();
        let file = cli_file
            .map(Path::to_path_buf)
            .or_else(|| self.file.clone())
            .unwrap_or_else(Settings::default_log_file);
        LogTarget { filters, file }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".config")
            })
            .join(APP_DIR)
            .join("config.toml")
    }

    pub fn default_log_file() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR)
            .join("audio-recorder.log")
    }

    /// Lit et valide le fichier ; erreurs renvoyées telles quelles.
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Chargement au démarrage. Fichier absent → valeurs par défaut.
    /// Fichier invalide : erreur si le chemin a été donné explicitement
    /// (`--config`), sinon valeurs par défaut et erreur conservée dans
    /// `Loaded::error`.
    pub fn load(path: &Path, explicit: bool) -> Result<Loaded, ConfigError> {
        if !path.exists() {
            return Ok(Loaded {
                settings: Self::default(),
                error: None,
            });
        }
        match Self::read(path) {
            Ok(settings) => Ok(Loaded {
                settings,
                error: None,
            }),
            Err(e) if explicit => Err(e),
            Err(e) => Ok(Loaded {
                settings: Self::default(),
                error: Some(e),
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;
        log::debug!("configuration enregistrée dans {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.audio;
        if !a.fft_size.is_power_of_two() || !(32..=32_768).contains(&a.fft_size) {
            return Err(ConfigError::Invalid(format!(
                "audio.fft_size = {} (puissance de 2 entre 32 et 32768 attendue)",
                a.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&a.smoothing) {
            return Err(ConfigError::Invalid(format!(
                "audio.smoothing = {} (0 à 1 attendu)",
                a.smoothing
            )));
        }
        if !(a.min_db < a.max_db) {
            return Err(ConfigError::Invalid(format!(
                "audio.min_db ({}) doit être inférieur à audio.max_db ({})",
                a.min_db, a.max_db
            )));
        }
        let w = &self.waveform;
        if !(w.continuous_duration_secs > 0.0 && w.scroll_window_secs > 0.0) {
            return Err(ConfigError::Invalid(
                "durées de forme d'onde strictement positives attendues".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("{APP_DIR}-test-{}-{name}", std::process::id()))
            .join("config.toml")
    }

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        s.validate().unwrap();
        assert_eq!(s.audio.fft_size, 2048);
        assert!(s.waveform.continuous);
        assert!(!s.waveform.scrolling);
        assert!(!s.estimator.sample_immediately);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let s: Settings = toml::from_str("[waveform]\nscrolling = true\n").unwrap();
        assert!(s.waveform.scrolling);
        assert_eq!(s.waveform.continuous_duration_secs, 30.0);
        assert_eq!(s.audio, AudioSettings::default());
    }

    #[test]
    fn rejects_bad_fft_size() {
        let mut s = Settings::default();
        s.audio.fft_size = 1000;
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
        s.audio.fft_size = 16;
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_inverted_db_range() {
        let mut s = Settings::default();
        s.audio.min_db = -20.0;
        s.audio.max_db = -30.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn save_then_read_back() {
        let path = scratch_path("save");
        let mut s = Settings::default();
        s.audio.device = Some("USB Mic".into());
        s.waveform.scrolling = true;
        s.save(&path).unwrap();

        assert_eq!(Settings::read(&path).unwrap(), s);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let path = scratch_path("broken");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "audio = 12").unwrap();

        assert!(matches!(Settings::read(&path), Err(ConfigError::Parse(_))));
        let loaded = Settings::load(&path, false).unwrap();
        assert_eq!(loaded.settings, Settings::default());
        assert!(matches!(loaded.error, Some(ConfigError::Parse(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn invalid_file_is_never_overwritten() {
        let path = scratch_path("invalid");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let original = "[audio]\nfft_size = 1000\ndevice = \"USB Mic\"\n";
        fs::write(&path, original).unwrap();

        let loaded = Settings::load(&path, false).unwrap();
        assert!(matches!(loaded.error, Some(ConfigError::Invalid(_))));
        assert_eq!(loaded.save_path(&path), None);
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn explicit_path_must_be_valid() {
        let path = scratch_path("explicit");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[audio]\nsmoothing = 4.0\n").unwrap();

        assert!(matches!(Settings::load(&path, true), Err(ConfigError::Invalid(_))));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn explicit_path_may_not_exist_yet() {
        let path = scratch_path("explicit-missing");
        let loaded = Settings::load(&path, true).unwrap();
        assert_eq!(loaded.settings, Settings::default());
        assert_eq!(loaded.save_path(&path), Some(path.clone()));
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = scratch_path("missing");
        let loaded = Settings::load(&path, false).unwrap();
        assert_eq!(loaded.settings, Settings::default());
        assert!(loaded.error.is_none());
    }

    #[test]
    fn log_level_falls_back_to_config_then_default() {
        let log = LogSettings::default();
        assert_eq!(log.resolve(None, None, None).filters, "info");

        let log = LogSettings {
            level: "debug".into(),
            file: None,
        };
        assert_eq!(log.resolve(None, None, None).filters, "debug");
        assert_eq!(log.resolve(Some("warn"), None, None).filters, "warn");
    }

    #[test]
    fn rust_log_wins_over_everything() {
        let log = LogSettings {
            level: "debug".into(),
            file: None,
        };
        let target = log.resolve(Some("warn"), None, Some("audio_recorder=trace"));
        assert_eq!(target.filters, "audio_recorder=trace");
        // Variable vide : ignorée
        assert_eq!(log.resolve(Some("warn"), None, Some("  ")).filters, "warn");
    }

    #[test]
    fn log_file_prefers_cli_then_config() {
        let log = LogSettings {
            level: "info".into(),
            file: Some(PathBuf::from("/var/tmp/config.log")),
        };
        let cli = PathBuf::from("/var/tmp/cli.log");
        assert_eq!(log.resolve(None, Some(&cli), None).file, cli);
        assert_eq!(
            log.resolve(None, None, None).file,
            PathBuf::from("/var/tmp/config.log")
        );
        assert_eq!(
            LogSettings::default().resolve(None, None, None).file,
            Settings::default_log_file()
        );
    }
}
