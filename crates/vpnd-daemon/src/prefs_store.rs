//! Хранилище настроек в JSON файле

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;
use vpnd_core::{Error, Result};
use vpnd_service::{Preferences, PreferencesStore};

/// Настройки в JSON файле (содержит ключи, права 0600)
pub struct JsonPreferencesStore {
    path: PathBuf,
}

impl JsonPreferencesStore {
    /// Хранилище в указанном файле
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Путь к файлу
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferencesStore for JsonPreferencesStore {
    fn load(&self) -> Result<Preferences> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Preferences::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| {
            Error::Other(format!(
                "ошибка разбора настроек {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, prefs: &Preferences) -> Result<()> {
        let content = serde_json::to_string_pretty(prefs)
            .map_err(|e| Error::Other(format!("ошибка сериализации настроек: {}", e)))?;

        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        // запись через временный файл, чтобы не оставить обрезанный JSON
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }
        std::fs::rename(&tmp, &self.path)?;

        debug!("Настройки сохранены: {}", self.path.display());
        Ok(())
    }
}
