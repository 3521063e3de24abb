pub mod mock;
pub mod sysfs;

pub use mock::MockGpioBackend;
pub use sysfs::SysfsBackend;

use crate::error::GpioError;
use crate::gpio::{Direction, Value};

/// Pin control surface. Pins are addressed by their kernel GPIO number.
pub trait GpioBackend: Send + Sync {
    fn is_exported(&self, pin: u32) -> Result<bool, GpioError>;
    fn export(&self, pin: u32) -> Result<(), GpioError>;
    fn unexport(&self, pin: u32) -> Result<(), GpioError>;
    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), GpioError>;
    fn read_value(&self, pin: u32) -> Result<Value, GpioError>;
    fn write_value(&self, pin: u32, value: Value) -> Result<(), GpioError>;
}
