use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{GpioBackend, HardwareLine};
use crate::config::{BoardPin, Direction, SymbolicPin};
use crate::error::AppError;

#[derive(Debug, PartialEq, Eq)]
pub struct LineHandle {
    pin: String,
    direction: Direction,
    token: u64,
}

impl LineHandle {
    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

struct ClaimedLine {
    direction: Direction,
    driven: bool,
    holders: FxHashSet<u64>,
    hardware: Box<dyn HardwareLine>, // released on drop
}

pub struct PinRegistry<B: GpioBackend> {
    backend: Arc<B>,
    board: Vec<BoardPin>,
    vocabulary: FxHashMap<String, usize>,
    lines: Mutex<FxHashMap<String, ClaimedLine>>,
    next_token: AtomicU64,
}

impl<B: GpioBackend> PinRegistry<B> {
    pub fn new(backend: Arc<B>, board: &[BoardPin]) -> Self {
        let vocabulary = board
            .iter()
            .enumerate()
            .map(|(idx, pin)| (pin.name.clone(), idx))
            .collect();

        Self {
            backend,
            board: board.to_vec(),
            vocabulary,
            lines: Mutex::new(FxHashMap::default()),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn board(&self) -> &[BoardPin] {
        &self.board
    }

    pub fn resolve(&self, pin: &SymbolicPin) -> Option<&BoardPin> {
        if pin.is_unassigned() {
            return None;
        }
        self.vocabulary.get(pin.as_str()).map(|idx| &self.board[*idx])
    }

    pub fn acquire(&self, pin: &SymbolicPin, direction: Direction) -> Result<LineHandle, AppError> {
        let board_pin = self.resolve(pin).ok_or_else(|| {
            AppError::PinUnavailable(format!("'{pin}' is not a pin of this board"))
        })?;

        let mut lines = self.lines.lock();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        match lines.get_mut(board_pin.name.as_str()) {
            // only inputs may be shared, an output line has a single owner
            Some(claimed)
                if claimed.direction == Direction::Input && direction == Direction::Input =>
            {
                claimed.holders.insert(token);
            }
            Some(claimed) => {
                return Err(AppError::PinUnavailable(format!(
                    "{pin} is already claimed as {}",
                    claimed.direction
                )));
            }
            None => {
                let hardware = self.backend.acquire(board_pin, direction)?;
                let mut holders = FxHashSet::default();
                holders.insert(token);
                lines.insert(
                    board_pin.name.clone(),
                    ClaimedLine {
                        direction,
                        driven: false,
                        holders,
                        hardware,
                    },
                );
            }
        }

        Ok(LineHandle {
            pin: board_pin.name.clone(),
            direction,
            token,
        })
    }

    pub fn release(&self, handle: &LineHandle) -> bool {
        let mut lines = self.lines.lock();
        let Some(claimed) = lines.get_mut(handle.pin.as_str()) else {
            return false;
        };
        if !claimed.holders.remove(&handle.token) {
            return false;
        }
        if claimed.holders.is_empty() {
            lines.remove(handle.pin.as_str());
            return true;
        }
        false
    }

    pub fn set_output_level(&self, handle: &LineHandle, level: bool) -> Result<(), AppError> {
        let mut lines = self.lines.lock();
        let claimed = Self::claimed_mut(&mut lines, handle)?;

        if claimed.direction != Direction::Output {
            return Err(AppError::WrongDirection(format!(
                "{} is claimed as {}, cannot drive it",
                handle.pin, claimed.direction
            )));
        }

        claimed.hardware.set_level(level)?;
        claimed.driven = level;
        Ok(())
    }

    pub fn read_level(&self, handle: &LineHandle) -> Result<bool, AppError> {
        let mut lines = self.lines.lock();
        let claimed = Self::claimed_mut(&mut lines, handle)?;

        match claimed.direction {
            Direction::Output => Ok(claimed.driven),
            Direction::Input => claimed.hardware.get_level(),
        }
    }

    pub fn claimed_direction(&self, pin: &str) -> Option<Direction> {
        self.lines.lock().get(pin).map(|claimed| claimed.direction)
    }

    pub fn claimed_count(&self) -> usize {
        self.lines.lock().len()
    }

    fn claimed_mut<'a>(
        lines: &'a mut FxHashMap<String, ClaimedLine>,
        handle: &LineHandle,
    ) -> Result<&'a mut ClaimedLine, AppError> {
        lines
            .get_mut(handle.pin.as_str())
            .filter(|claimed| claimed.holders.contains(&handle.token))
            .ok_or_else(|| AppError::PinUnavailable(format!("{} has been released", handle.pin)))
    }
}
