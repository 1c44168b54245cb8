//! Preferences key/value store.

use std::path::{Path, PathBuf};

use super::StoreError;
use crate::state::Preferences;

pub trait PreferencesStore: Send {
    fn get(&self) -> Preferences;

    /// # Errors
    ///
    /// Returns an error if the preferences cannot be persisted.
    fn set(&mut self, preferences: Preferences) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryPreferences(Preferences);

impl MemoryPreferences {
    #[must_use]
    pub fn new(preferences: Preferences) -> Self {
        Self(preferences)
    }
}

impl PreferencesStore for MemoryPreferences {
    fn get(&self) -> Preferences {
        self.0.clone()
    }

    fn set(&mut self, preferences: Preferences) -> Result<(), StoreError> {
        self.0 = preferences;
        Ok(())
    }
}

/// Preferences kept in a JSON file.
pub struct JsonPreferences {
    path: PathBuf,
    current: Preferences,
}

impl JsonPreferences {
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let current = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            Preferences::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            current,
        })
    }
}

impl PreferencesStore for JsonPreferences {
    fn get(&self) -> Preferences {
        self.current.clone()
    }

    fn set(&mut self, preferences: Preferences) -> Result<(), StoreError> {
        std::fs::write(&self.path, serde_json::to_string_pretty(&preferences)?)?;
        self.current = preferences;
        Ok(())
    }
}
