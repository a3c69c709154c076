use std::fmt;

use serde::{Serialize, Serializer};

use crate::config::{DefaultState, Polarity};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalState {
    On,
    Off,
}

impl From<DefaultState> for LogicalState {
    fn from(state: DefaultState) -> Self {
        match state {
            DefaultState::DefaultOn => LogicalState::On,
            DefaultState::DefaultOff => LogicalState::Off,
        }
    }
}

impl fmt::Display for LogicalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PinState::from(*self).as_str())
    }
}

impl std::str::FromStr for LogicalState {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "on" => Ok(LogicalState::On),
            "off" => Ok(LogicalState::Off),
            other => Err(AppError::InvalidValue(format!(
                "State must be 'on' or 'off', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    On,
    Off,
    Empty,
}

impl PinState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinState::On => "on",
            PinState::Off => "off",
            PinState::Empty => "",
        }
    }
}

impl From<LogicalState> for PinState {
    fn from(state: LogicalState) -> Self {
        match state {
            LogicalState::On => PinState::On,
            LogicalState::Off => PinState::Off,
        }
    }
}

impl Serialize for PinState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

pub fn physical_level_for_logical_state(state: LogicalState, polarity: Polarity) -> bool {
    match (polarity, state) {
        (Polarity::ActiveLow, LogicalState::On) => false,
        (Polarity::ActiveLow, LogicalState::Off) => true,
        (Polarity::ActiveHigh, LogicalState::On) => true,
        (Polarity::ActiveHigh, LogicalState::Off) => false,
    }
}

pub fn logical_state_for_physical_level(level: bool, polarity: Polarity) -> LogicalState {
    match (polarity, level) {
        (Polarity::ActiveLow, false) => LogicalState::On,
        (Polarity::ActiveLow, true) => LogicalState::Off,
        (Polarity::ActiveHigh, true) => LogicalState::On,
        (Polarity::ActiveHigh, false) => LogicalState::Off,
    }
}
