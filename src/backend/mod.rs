#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::MockGpioBackend;

use crate::config::{BoardPin, Direction};
use crate::error::AppError;

/// A line claimed from the hardware. Dropping it releases the claim.
pub trait HardwareLine: Send {
    fn set_level(&mut self, level: bool) -> Result<(), AppError>;
    fn get_level(&mut self) -> Result<bool, AppError>;
}

pub trait GpioBackend: Send + Sync {
    fn acquire(
        &self,
        pin: &BoardPin,
        direction: Direction,
    ) -> Result<Box<dyn HardwareLine>, AppError>;
}
