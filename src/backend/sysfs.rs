use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::error::GpioError;
use crate::gpio::{Direction, Value};

use super::GpioBackend;

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

const SYSFS_EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const SYSFS_EXPORT_POLL_ATTEMPTS: u32 = 100;

/// Legacy `/sys/class/gpio` interface.
///
/// The root is configurable so the same layout can be served from a plain
/// directory.
#[derive(Debug, Clone)]
pub struct SysfsBackend {
    root: PathBuf,
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new(SYSFS_GPIO_ROOT)
    }
}

impl SysfsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn attribute(&self, pin: u32, name: &str) -> PathBuf {
        self.pin_dir(pin).join(name)
    }

    fn append(path: &Path, text: &str) -> io::Result<()> {
        OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(text.as_bytes()))
    }

    fn overwrite(path: &Path, text: &str) -> Result<(), GpioError> {
        OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .and_then(|mut f| f.write_all(text.as_bytes()))
            .map_err(|e| GpioError::unavailable(path, e))
    }

    // A busy line is claimed by another sysfs or chardev consumer.
    fn export_error(pin: u32, path: &Path, e: io::Error) -> GpioError {
        if e.kind() == io::ErrorKind::ResourceBusy {
            GpioError::AlreadyInUse(pin)
        } else {
            GpioError::unavailable(path, e)
        }
    }

    // The kernel creates the pin directory asynchronously after an export.
    fn wait_for_node(&self, pin: u32) -> Result<(), GpioError> {
        let value = self.attribute(pin, "value");
        for _ in 0..SYSFS_EXPORT_POLL_ATTEMPTS {
            if value.exists() {
                return Ok(());
            }
            thread::sleep(SYSFS_EXPORT_POLL_INTERVAL);
        }
        Err(GpioError::unavailable(
            value,
            io::Error::new(io::ErrorKind::TimedOut, "pin node did not appear after export"),
        ))
    }
}

impl GpioBackend for SysfsBackend {
    fn is_exported(&self, pin: u32) -> Result<bool, GpioError> {
        let dir = self.pin_dir(pin);
        match fs::metadata(&dir) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(GpioError::unavailable(dir, e)),
        }
    }

    fn export(&self, pin: u32) -> Result<(), GpioError> {
        debug!("exporting gpio{pin} under {}", self.root.display());
        let export = self.root.join("export");
        Self::append(&export, &pin.to_string()).map_err(|e| Self::export_error(pin, &export, e))?;

        if let Err(e) = self.wait_for_node(pin) {
            if let Err(undo) = self.unexport(pin) {
                warn!("failed to unexport gpio{pin} after export timeout: {undo}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn unexport(&self, pin: u32) -> Result<(), GpioError> {
        debug!("unexporting gpio{pin} under {}", self.root.display());
        let unexport = self.root.join("unexport");
        Self::append(&unexport, &pin.to_string()).map_err(|e| GpioError::unavailable(&unexport, e))
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), GpioError> {
        Self::overwrite(&self.attribute(pin, "direction"), direction.as_sysfs())
    }

    fn read_value(&self, pin: u32) -> Result<Value, GpioError> {
        let path = self.attribute(pin, "value");
        let text = fs::read_to_string(&path).map_err(|e| GpioError::unavailable(&path, e))?;
        Ok(Value::from_sysfs(&text))
    }

    fn write_value(&self, pin: u32, value: Value) -> Result<(), GpioError> {
        Self::overwrite(&self.attribute(pin, "value"), value.as_sysfs())
    }
}
