use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::gpio::Direction;
use crate::watcher::WatcherState;

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("Pin {0} is already in use")]
    AlreadyInUse(u32),
    #[error("Cannot {op} pin {pin}: pin is configured as {direction}")]
    DirectionMismatch {
        pin: u32,
        direction: Direction,
        op: &'static str,
    },
    #[error("Resource unavailable at {}: {source}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Pin {0} is not open")]
    NotOpen(u32),
    #[error("Watcher for pin {pin} is {state}")]
    WatcherState { pin: u32, state: WatcherState },
    #[error("Failed to spawn watcher thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GpioError {
    pub(crate) fn unavailable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        GpioError::ResourceUnavailable {
            path: path.into(),
            source,
        }
    }
}
