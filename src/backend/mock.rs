use std::collections::VecDeque;
use std::io;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::GpioError;
use crate::gpio::{Direction, Value};

use super::GpioBackend;

/// In-memory control surface.
///
/// Values written to a pin are read back unchanged. Tests drive inputs with
/// [`set_value`](Self::set_value) or script successive samples with
/// [`set_input_sequence`](Self::set_input_sequence).
#[derive(Default)]
pub struct MockGpioBackend {
    pins: RwLock<FxHashMap<u32, Mutex<MockPinState>>>, // keyed by pin number
}

#[derive(Default)]
struct MockPinState {
    exported: bool,
    direction: Option<Direction>,
    value: Value,
    script: VecDeque<Value>,
    failing_reads: u32,
    failing_writes: u32,
    failing_direction: bool,
    reads: u64,
}

impl MockGpioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_pin<T>(&self, pin: u32, f: impl FnOnce(&mut MockPinState) -> T) -> T {
        {
            let pins = self.pins.read();
            if let Some(state) = pins.get(&pin) {
                return f(&mut state.lock());
            }
        }
        let mut pins = self.pins.write();
        let state = pins.entry(pin).or_default();
        f(state.get_mut())
    }

    // Unknown pins are seen as fresh, unexported ones without being stored.
    fn inspect<T>(&self, pin: u32, f: impl FnOnce(&MockPinState) -> T) -> T {
        match self.pins.read().get(&pin) {
            Some(state) => f(&state.lock()),
            None => f(&MockPinState::default()),
        }
    }

    fn with_exported<T>(
        &self,
        pin: u32,
        attribute: &str,
        f: impl FnOnce(&mut MockPinState) -> Result<T, GpioError>,
    ) -> Result<T, GpioError> {
        let pins = self.pins.read();
        match pins.get(&pin) {
            Some(state) => {
                let mut state = state.lock();
                if !state.exported {
                    return Err(Self::missing(pin, attribute));
                }
                f(&mut state)
            }
            None => Err(Self::missing(pin, attribute)),
        }
    }

    fn injected(pin: u32, attribute: &str, what: &str) -> GpioError {
        GpioError::unavailable(
            format!("mock/gpio{pin}/{attribute}"),
            io::Error::other(format!("injected {what} failure")),
        )
    }

    fn missing(pin: u32, attribute: &str) -> GpioError {
        GpioError::unavailable(
            format!("mock/gpio{pin}/{attribute}"),
            io::Error::new(io::ErrorKind::NotFound, "pin not exported"),
        )
    }

    /// Drives the level seen by subsequent reads and discards any script.
    pub fn set_value(&self, pin: u32, value: Value) {
        self.with_pin(pin, |state| {
            state.script.clear();
            state.value = value;
        });
    }

    /// Each read consumes one entry; the last entry stays in effect.
    pub fn set_input_sequence(&self, pin: u32, values: impl IntoIterator<Item = Value>) {
        self.with_pin(pin, |state| state.script = values.into_iter().collect());
    }

    /// Makes the next `count` reads of `pin` fail.
    pub fn fail_reads(&self, pin: u32, count: u32) {
        self.with_pin(pin, |state| state.failing_reads = count);
    }

    /// Makes the next `count` value writes to `pin` fail.
    pub fn fail_writes(&self, pin: u32, count: u32) {
        self.with_pin(pin, |state| state.failing_writes = count);
    }

    /// Makes every direction change on `pin` fail while `fail` is set.
    pub fn fail_direction(&self, pin: u32, fail: bool) {
        self.with_pin(pin, |state| state.failing_direction = fail);
    }

    pub fn direction(&self, pin: u32) -> Option<Direction> {
        self.inspect(pin, |state| state.direction)
    }

    /// Current level without consuming scripted samples.
    pub fn peek_value(&self, pin: u32) -> Value {
        self.inspect(pin, |state| state.value)
    }

    pub fn read_count(&self, pin: u32) -> u64 {
        self.inspect(pin, |state| state.reads)
    }

    pub fn tracked_pins(&self) -> usize {
        self.pins.read().len()
    }
}

impl GpioBackend for MockGpioBackend {
    fn is_exported(&self, pin: u32) -> Result<bool, GpioError> {
        Ok(self.inspect(pin, |state| state.exported))
    }

    fn export(&self, pin: u32) -> Result<(), GpioError> {
        self.with_pin(pin, |state| {
            if state.exported {
                return Err(GpioError::AlreadyInUse(pin));
            }
            state.exported = true;
            Ok(())
        })
    }

    fn unexport(&self, pin: u32) -> Result<(), GpioError> {
        self.with_exported(pin, "unexport", |state| {
            state.exported = false;
            state.direction = None;
            Ok(())
        })
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), GpioError> {
        self.with_exported(pin, "direction", |state| {
            if state.failing_direction {
                return Err(Self::injected(pin, "direction", "direction"));
            }
            state.direction = Some(direction);
            Ok(())
        })
    }

    fn read_value(&self, pin: u32) -> Result<Value, GpioError> {
        self.with_exported(pin, "value", |state| {
            state.reads += 1;
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                return Err(Self::injected(pin, "value", "read"));
            }
            if let Some(next) = state.script.pop_front() {
                state.value = next;
            }
            Ok(state.value)
        })
    }

    fn write_value(&self, pin: u32, value: Value) -> Result<(), GpioError> {
        self.with_exported(pin, "value", |state| {
            if state.failing_writes > 0 {
                state.failing_writes -= 1;
                return Err(Self::injected(pin, "value", "write"));
            }
            state.script.clear();
            state.value = value;
            Ok(())
        })
    }
}
