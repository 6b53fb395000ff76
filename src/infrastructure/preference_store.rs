use crate::infrastructure::config::{read_preferences, save_preferences, Preferences};
use crate::infrastructure::error::InfraError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// User preferences read at decision time. Implementations never cache the
/// IoT flag: a change made mid-session applies to the next stop or flip.
pub trait PreferenceStore: Send + Sync {
    fn is_iot_delegation_enabled(&self) -> Result<bool, InfraError>;
    fn set_iot_delegation_enabled(&self, enabled: bool) -> Result<(), InfraError>;
    fn is_auto_sync_enabled(&self) -> Result<bool, InfraError>;
    fn set_auto_sync_enabled(&self, enabled: bool) -> Result<(), InfraError>;
    fn language(&self) -> Result<String, InfraError>;
}

#[derive(Debug)]
pub struct JsonPreferenceStore {
    config_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonPreferenceStore {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<Preferences, InfraError> {
        read_preferences(&self.config_dir)
    }

    fn update(&self, change: impl FnOnce(&mut Preferences)) -> Result<(), InfraError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|error| InfraError::Unknown(format!("preferences lock poisoned: {error}")))?;
        let mut preferences = self.load()?;
        change(&mut preferences);
        save_preferences(&self.config_dir, &preferences)
    }
}

impl PreferenceStore for JsonPreferenceStore {
    fn is_iot_delegation_enabled(&self) -> Result<bool, InfraError> {
        Ok(self.load()?.iot_enabled)
    }

    fn set_iot_delegation_enabled(&self, enabled: bool) -> Result<(), InfraError> {
        self.update(|preferences| preferences.iot_enabled = enabled)
    }

    fn is_auto_sync_enabled(&self) -> Result<bool, InfraError> {
        Ok(self.load()?.auto_sync_enabled)
    }

    fn set_auto_sync_enabled(&self, enabled: bool) -> Result<(), InfraError> {
        self.update(|preferences| preferences.auto_sync_enabled = enabled)
    }

    fn language(&self) -> Result<String, InfraError> {
        Ok(self.load()?.language)
    }
}

#[derive(Debug)]
pub struct InMemoryPreferenceStore {
    iot_enabled: AtomicBool,
    auto_sync_enabled: AtomicBool,
}

impl InMemoryPreferenceStore {
    pub fn new(iot_enabled: bool) -> Self {
        Self {
            iot_enabled: AtomicBool::new(iot_enabled),
            auto_sync_enabled: AtomicBool::new(true),
        }
    }
}

impl Default for InMemoryPreferenceStore {
    fn default() -> Self {
        Self::new(false)
    }
}

impl PreferenceStore for InMemoryPreferenceStore {
    fn is_iot_delegation_enabled(&self) -> Result<bool, InfraError> {
        Ok(self.iot_enabled.load(Ordering::SeqCst))
    }

    fn set_iot_delegation_enabled(&self, enabled: bool) -> Result<(), InfraError> {
        self.iot_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn is_auto_sync_enabled(&self) -> Result<bool, InfraError> {
        Ok(self.auto_sync_enabled.load(Ordering::SeqCst))
    }

    fn set_auto_sync_enabled(&self, enabled: bool) -> Result<(), InfraError> {
        self.auto_sync_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn language(&self) -> Result<String, InfraError> {
        Ok("en".to_string())
    }
}
