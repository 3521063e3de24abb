pub mod backend;
mod config;
mod error;
mod gpio;
mod watcher;

pub use backend::{GpioBackend, MockGpioBackend, SysfsBackend};
pub use config::{AppConfig, PinConfig};
pub use error::GpioError;
pub use gpio::{Direction, PinBinding, Value};
pub use watcher::{
    ChangeEvent, ChangeWatcher, DEFAULT_POLL_INTERVAL, Edge, WatcherConfig, WatcherState,
};
