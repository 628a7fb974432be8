use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tempfile::NamedTempFile;

use super::data::Settings;

/// Errors that can occur when loading settings from disk.
#[derive(Debug)]
pub enum SettingsError {
    /// Failed to read the settings file.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The settings file was not valid JSON.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Read { path, source } => {
                write!(f, "Failed to read settings at {}: {}", path.display(), source)
            }
            SettingsError::Parse { path, source } => {
                write!(f, "Failed to parse settings at {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for SettingsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            SettingsError::Read { source, .. } => Some(source),
            SettingsError::Parse { source, .. } => Some(source),
        }
    }
}

impl Settings {
    /// Load the blob, merging missing fields over defaults. A missing file
    /// is not an error; it just means defaults.
    pub fn load_from_path(path: &Path) -> Result<Settings, SettingsError> {
        if !path.exists() {
            return Ok(Settings::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the blob atomically: serialize to a temp file in the target
    /// directory, then persist over the final path.
    pub fn save_to_path(&self, path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };

        temp_file.write_all(contents.as_bytes())?;
        temp_file.as_file_mut().sync_all()?;
        temp_file
            .persist(path)
            .map_err(|err| -> Box<dyn StdError> { Box::new(err) })?;
        Ok(())
    }

    pub fn load() -> Result<Settings, SettingsError> {
        Self::load_from_path(&Self::settings_path())
    }

    pub fn save(&self) -> Result<(), Box<dyn StdError>> {
        self.save_to_path(&Self::settings_path())
    }

    pub fn settings_path() -> PathBuf {
        let proj_dirs = ProjectDirs::from("org", "permacommons", "homelink")
            .expect("Failed to determine config directory");
        proj_dirs.config_dir().join("settings.json")
    }
}
