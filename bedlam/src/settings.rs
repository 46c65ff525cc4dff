//! Persistent application settings, stored as TOML in the platform
//! preference directory. A missing or unreadable file falls back to the
//! defaults, never an error.

use std::path::{Path, PathBuf};

const DOCUMENTATION: &str = "\
# bedlam settings
# Remove a key to restore its default value.

";

const FILENAME: &str = "settings.toml";

#[must_use]
pub fn preferences_dir() -> Option<PathBuf> {
    Some(dirs::preference_dir()?.join(env!("CARGO_PKG_NAME")))
}

#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Recompute in the background after every edit.
    pub background_processing: bool,
    /// Undo history budget, in mebibytes.
    pub snapshot_memory_mb: usize,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            background_processing: true,
            snapshot_memory_mb: 512,
        }
    }
}
impl Settings {
    #[must_use]
    pub fn snapshot_budget_bytes(&self) -> usize {
        self.snapshot_memory_mb.saturating_mul(1024 * 1024)
    }
    /// Read from the preference directory, defaulting on any failure.
    #[must_use]
    pub fn load() -> Self {
        let Some(dir) = preferences_dir() else {
            log::warn!("no preference directory on this platform, using default settings");
            return Self::default();
        };
        Self::load_from(&dir.join(FILENAME))
    }
    #[must_use]
    pub fn load_from(path: &Path) -> Self {
        let parsed: anyhow::Result<Self> = (|| {
            let text = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&text)?)
        })();
        match parsed {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("failed to load settings from {path:?}, using defaults: {e:?}");
                Self::default()
            }
        }
    }
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = preferences_dir()
            .ok_or_else(|| anyhow::anyhow!("no preference directory on this platform"))?;
        std::fs::DirBuilder::new().recursive(true).create(&dir)?;
        let mut text = DOCUMENTATION.to_owned();
        text.push_str(&toml::to_string_pretty(self)?);
        std::fs::write(dir.join(FILENAME), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file_keeps_the_other_defaults() {
        let dir = std::env::temp_dir().join("bedlam-settings-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(FILENAME);
        std::fs::write(&path, "snapshot_memory_mb = 64\n").unwrap();
        let settings = Settings::load_from(&path);
        assert_eq!(settings.snapshot_memory_mb, 64);
        assert!(settings.background_processing);
        assert_eq!(settings.snapshot_budget_bytes(), 64 * 1024 * 1024);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_or_garbled_files_fall_back_to_defaults() {
        let missing = Path::new("/nonexistent/bedlam/settings.toml");
        assert_eq!(Settings::load_from(missing), Settings::default());

        let dir = std::env::temp_dir().join("bedlam-settings-test-garbled");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(FILENAME);
        std::fs::write(&path, "background_processing = \"sideways\"").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
        std::fs::remove_file(&path).unwrap();
    }
}
