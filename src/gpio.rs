use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::GpioBackend;
use crate::error::GpioError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    /// Text written to the `direction` attribute.
    pub fn as_sysfs(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::In => "input",
            Direction::Out => "output",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    #[default]
    Off,
    On,
}

impl Value {
    /// Parses the content of a `value` attribute. Only a trimmed `"1"` is On.
    pub fn from_sysfs(text: &str) -> Self {
        if text.trim() == "1" {
            Value::On
        } else {
            Value::Off
        }
    }

    pub fn as_sysfs(&self) -> &'static str {
        match self {
            Value::Off => "0",
            Value::On => "1",
        }
    }

    pub fn is_on(&self) -> bool {
        matches!(self, Value::On)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        if value { Value::On } else { Value::Off }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Value::Off => "Off",
            Value::On => "On",
        })
    }
}

struct PinState {
    value: Value,
    open: bool,
}

/// Exclusive binding to one hardware pin.
///
/// The binding starts closed. [`open`](Self::open) claims the pin with the
/// backend and configures its direction; [`close`](Self::close) releases it.
/// A closed binding may be opened again. All operations take `&self`, so a
/// binding can be shared with a [`ChangeWatcher`](crate::ChangeWatcher)
/// through an `Arc`.
pub struct PinBinding<B: GpioBackend + ?Sized> {
    backend: Arc<B>,
    pin: u32,
    direction: Direction,
    default_value: Value,
    state: Mutex<PinState>,
}

impl<B: GpioBackend + ?Sized> PinBinding<B> {
    pub fn new(backend: Arc<B>, pin: u32, direction: Direction) -> Self {
        Self::with_default(backend, pin, direction, Value::Off)
    }

    /// Creates a binding whose output is driven to `default_value` on open.
    /// The default is ignored for input pins.
    pub fn with_default(
        backend: Arc<B>,
        pin: u32,
        direction: Direction,
        default_value: Value,
    ) -> Self {
        Self {
            backend,
            pin,
            direction,
            default_value,
            state: Mutex::new(PinState {
                value: default_value,
                open: false,
            }),
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn path_name(&self) -> String {
        format!("gpio{}", self.pin)
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Last value read from or written to the pin. Does no I/O.
    pub fn value(&self) -> Value {
        self.state.lock().value
    }

    pub fn open(&self) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if state.open || self.backend.is_exported(self.pin)? {
            return Err(GpioError::AlreadyInUse(self.pin));
        }

        self.backend.export(self.pin)?;
        if let Err(e) = self.configure() {
            if let Err(undo) = self.backend.unexport(self.pin) {
                warn!("failed to release pin {} after open error: {undo}", self.pin);
            }
            return Err(e);
        }

        state.open = true;
        state.value = self.default_value;
        debug!("claimed pin {} as {}", self.pin, self.direction);
        Ok(())
    }

    fn configure(&self) -> Result<(), GpioError> {
        self.backend.set_direction(self.pin, self.direction)?;
        if self.direction == Direction::Out {
            self.backend.write_value(self.pin, self.default_value)?;
        }
        Ok(())
    }

    /// Releases the claim. Closing a binding that is not open fails with
    /// [`GpioError::NotOpen`] without touching the backend.
    pub fn close(&self) -> Result<(), GpioError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(GpioError::NotOpen(self.pin));
        }
        self.backend.unexport(self.pin)?;
        state.open = false;
        debug!("released pin {}", self.pin);
        Ok(())
    }

    /// Samples the pin and refreshes the cached value.
    pub fn read(&self) -> Result<Value, GpioError> {
        if self.direction == Direction::Out {
            return Err(self.mismatch("read"));
        }
        let mut state = self.state.lock();
        if !state.open {
            return Err(GpioError::NotOpen(self.pin));
        }
        let value = self.backend.read_value(self.pin)?;
        state.value = value;
        Ok(value)
    }

    pub fn write(&self, value: Value) -> Result<(), GpioError> {
        if self.direction == Direction::In {
            return Err(self.mismatch("write"));
        }
        let mut state = self.state.lock();
        if !state.open {
            return Err(GpioError::NotOpen(self.pin));
        }
        self.backend.write_value(self.pin, value)?;
        state.value = value;
        Ok(())
    }

    fn mismatch(&self, op: &'static str) -> GpioError {
        GpioError::DirectionMismatch {
            pin: self.pin,
            direction: self.direction,
            op,
        }
    }
}

impl<B: GpioBackend + ?Sized> Drop for PinBinding<B> {
    fn drop(&mut self) {
        if self.state.get_mut().open {
            if let Err(e) = self.backend.unexport(self.pin) {
                warn!("failed to release pin {} on drop: {e}", self.pin);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_parsing_defaults_to_off() {
        assert_eq!(Value::from_sysfs("1\n"), Value::On);
        assert_eq!(Value::from_sysfs(" 1 "), Value::On);
        assert_eq!(Value::from_sysfs("0\n"), Value::Off);
        assert_eq!(Value::from_sysfs(""), Value::Off);
        assert_eq!(Value::from_sysfs("11"), Value::Off);
        assert_eq!(Value::from_sysfs("high"), Value::Off);
    }

    #[test]
    fn sysfs_text() {
        assert_eq!(Value::On.as_sysfs(), "1");
        assert_eq!(Value::Off.as_sysfs(), "0");
        assert_eq!(Direction::In.as_sysfs(), "in");
        assert_eq!(Direction::Out.as_sysfs(), "out");
    }
}
