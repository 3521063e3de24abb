use std::{fs, path::Path, time::Duration};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::backend::sysfs::SYSFS_GPIO_ROOT;
use crate::error::GpioError;
use crate::gpio::{Direction, Value};
use crate::watcher::{DEFAULT_BROADCAST_CAPACITY, WatcherConfig};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PinConfig {
    pub name: String,
    pub direction: Direction,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub watch: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    pub pins: FxHashMap<u32, PinConfig>, // keyed by kernel gpio number
}

fn default_sysfs_root() -> String {
    SYSFS_GPIO_ROOT.to_string()
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_broadcast_capacity() -> usize {
    DEFAULT_BROADCAST_CAPACITY
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, GpioError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| GpioError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GpioError> {
        if self.poll_interval_ms == 0 {
            return Err(GpioError::Config("poll_interval_ms must be positive".into()));
        }
        if let Some((id, pin)) = self
            .pins
            .iter()
            .find(|(_, pin)| pin.watch && pin.direction != Direction::In)
        {
            return Err(GpioError::Config(format!(
                "pin {id} ({}) is an output and cannot be watched",
                pin.name
            )));
        }
        Ok(())
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            broadcast_capacity: self.broadcast_capacity,
        }
    }
}
