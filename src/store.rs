use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::config::PinRecord;
use crate::error::AppError;

pub const SETTINGS_KEY: &str = "gpio_configurations";

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Vec<PinRecord>, AppError>;
    fn save(&self, records: &[PinRecord]) -> Result<(), AppError>;
}

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<Vec<PinRecord>>,
}

impl MemoryStore {
    pub fn with_records(records: Vec<PinRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Vec<PinRecord>, AppError> {
        Ok(self.records.read().clone())
    }

    fn save(&self, records: &[PinRecord]) -> Result<(), AppError> {
        *self.records.write() = records.to_vec();
        Ok(())
    }
}

pub struct JsonFileStore {
    path: PathBuf, // keys other than SETTINGS_KEY survive a save
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn read_document(&self) -> Result<Map<String, Value>, AppError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| AppError::Config(format!("Failed to read settings: {e}")))?;
        if contents.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid settings json: {e}")))?
        {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::Config("Settings file must hold a JSON object".into())),
        }
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Vec<PinRecord>, AppError> {
        let mut document = self.read_document()?;

        match document.remove(SETTINGS_KEY) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| AppError::Config(format!("Invalid {SETTINGS_KEY}: {e}"))),
        }
    }

    fn save(&self, records: &[PinRecord]) -> Result<(), AppError> {
        let mut document = self.read_document()?;
        let value = serde_json::to_value(records)
            .map_err(|e| AppError::Config(format!("Failed to encode settings: {e}")))?;
        document.insert(SETTINGS_KEY.to_string(), value);

        let contents = serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|e| AppError::Config(format!("Failed to encode settings: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents)
            .map_err(|e| AppError::Config(format!("Failed to write settings: {e}")))?;
        fs::rename(&tmp, &self.path)
            .map_err(|e| AppError::Config(format!("Failed to replace settings: {e}")))
    }
}
