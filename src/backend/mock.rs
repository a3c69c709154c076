use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{GpioBackend, HardwareLine};
use crate::config::{BoardPin, Direction};
use crate::error::AppError;

#[derive(Default)]
pub struct MockGpioBackend {
    pins: Arc<Mutex<HashMap<String, MockPinState>>>, // keyed by board pin name
    bus: Mutex<()>,
}

#[derive(Clone, Default)]
struct MockPinState {
    claimed: Option<Direction>,
    driven: bool,
    sensed: bool,
    acquisitions: usize,
    releases: usize,
}

struct MockLine {
    name: String,
    direction: Direction,
    pins: Arc<Mutex<HashMap<String, MockPinState>>>,
}

impl MockGpioBackend {
    pub fn level(&self, pin: &str) -> Option<bool> {
        self.with_pin(pin, |state| state.driven)
    }

    pub fn claimed(&self, pin: &str) -> Option<Direction> {
        self.with_pin(pin, |state| state.claimed).flatten()
    }

    pub fn acquisitions(&self, pin: &str) -> usize {
        self.with_pin(pin, |state| state.acquisitions).unwrap_or(0)
    }

    pub fn releases(&self, pin: &str) -> usize {
        self.with_pin(pin, |state| state.releases).unwrap_or(0)
    }

    pub fn total_acquisitions(&self) -> usize {
        lock(&self.pins).values().map(|state| state.acquisitions).sum()
    }

    pub fn set_input_level(&self, pin: &str, level: bool) {
        lock(&self.pins).entry(pin.to_string()).or_default().sensed = level;
    }

    /// Blocks every `acquire` until the guard is dropped.
    pub fn hold_bus(&self) -> MutexGuard<'_, ()> {
        lock(&self.bus)
    }

    fn with_pin<T>(&self, pin: &str, f: impl FnOnce(&MockPinState) -> T) -> Option<T> {
        lock(&self.pins).get(pin).map(f)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GpioBackend for MockGpioBackend {
    fn acquire(
        &self,
        pin: &BoardPin,
        direction: Direction,
    ) -> Result<Box<dyn HardwareLine>, AppError> {
        let _bus = lock(&self.bus);
        let mut pins = self
            .pins
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;

        let state = pins.entry(pin.name.clone()).or_default();
        if let Some(current) = state.claimed {
            return Err(AppError::PinUnavailable(format!(
                "line {} busy as {current}",
                pin.name
            )));
        }

        state.claimed = Some(direction);
        state.acquisitions += 1;
        if direction == Direction::Output {
            state.driven = false;
        }

        Ok(Box::new(MockLine {
            name: pin.name.clone(),
            direction,
            pins: self.pins.clone(),
        }))
    }
}

impl HardwareLine for MockLine {
    fn set_level(&mut self, level: bool) -> Result<(), AppError> {
        if self.direction != Direction::Output {
            return Err(AppError::WrongDirection(format!(
                "line {} is an input",
                self.name
            )));
        }

        let mut pins = self
            .pins
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        pins.entry(self.name.clone()).or_default().driven = level;
        Ok(())
    }

    fn get_level(&mut self) -> Result<bool, AppError> {
        let pins = self
            .pins
            .lock()
            .map_err(|e| AppError::Gpio(format!("lock poisoned: {e}")))?;
        let state = pins
            .get(&self.name)
            .ok_or_else(|| AppError::Gpio(format!("line {} vanished", self.name)))?;

        Ok(match self.direction {
            Direction::Output => state.driven,
            Direction::Input => state.sensed,
        })
    }
}

impl Drop for MockLine {
    fn drop(&mut self) {
        let mut pins = lock(&self.pins);
        if let Some(state) = pins.get_mut(&self.name) {
            state.claimed = None;
            state.releases += 1;
        }
    }
}
