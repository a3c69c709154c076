use std::{fmt, fs, path::Path};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct BoardPin {
    pub name: String,
    pub chip: String,
    pub line: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReadbackMode {
    #[default]
    Driven,
    SharedInput,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Output,
    Input,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Output => f.write_str("output"),
            Direction::Input => f.write_str("input"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::ActiveLow => f.write_str("active_low"),
            Polarity::ActiveHigh => f.write_str("active_high"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DefaultState {
    DefaultOn,
    DefaultOff,
}

impl fmt::Display for DefaultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultState::DefaultOn => f.write_str("default_on"),
            DefaultState::DefaultOff => f.write_str("default_off"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SymbolicPin(String); // empty when unassigned

impl SymbolicPin {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.starts_with('-') {
            Self::unassigned()
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn unassigned() -> Self {
        Self(String::new())
    }

    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolicPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SymbolicPin {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Serialize for SymbolicPin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SymbolicPin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Index(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Name(name) => SymbolicPin::new(name),
            Raw::Index(index) if index < 0 => SymbolicPin::unassigned(),
            Raw::Index(index) => SymbolicPin(index.to_string()),
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PinRecord {
    #[serde(default, alias = "bpin")]
    pub pin: SymbolicPin,
    #[serde(default)]
    pub direction: Direction,
    pub active_mode: Polarity,
    pub default_state: DefaultState,
    #[serde(default)]
    pub name: String,
}

impl fmt::Display for PinRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPIO {}: {}, {} ({})",
            self.pin, self.active_mode, self.default_state, self.name
        )
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default = "default_board")]
    pub board: Vec<BoardPin>,
    #[serde(default = "default_input_pin")]
    pub input_pin: SymbolicPin,
    #[serde(default)]
    pub readback: ReadbackMode,
    #[serde(default)]
    pub settings_path: Option<String>,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let mut seen = FxHashSet::default();
        for pin in &self.board {
            if SymbolicPin::new(pin.name.as_str()).is_unassigned() {
                return Err(AppError::Config(format!(
                    "Board pin name '{}' is reserved for unassigned pins",
                    pin.name
                )));
            }
            if !seen.insert(pin.name.as_str()) {
                return Err(AppError::Config(format!(
                    "Duplicate board pin name '{}'",
                    pin.name
                )));
            }
        }
        if self.broadcast_capacity == 0 {
            return Err(AppError::Config(
                "broadcast_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

const DEFAULT_CHIP: &str = "/dev/gpiochip0";

// FT232H breakout: ACBUS (C0..C7) follows ADBUS (D0..D7) on the same chip,
// D0..D3 are taken by the MPSSE serial engine.
const DEFAULT_BOARD: [(&str, u32); 12] = [
    ("D4", 4),
    ("D5", 5),
    ("D6", 6),
    ("D7", 7),
    ("C0", 8),
    ("C1", 9),
    ("C2", 10),
    ("C3", 11),
    ("C4", 12),
    ("C5", 13),
    ("C6", 14),
    ("C7", 15),
];

pub fn default_board() -> Vec<BoardPin> {
    DEFAULT_BOARD
        .iter()
        .map(|(name, line)| BoardPin {
            name: name.to_string(),
            chip: DEFAULT_CHIP.to_string(),
            line: *line,
        })
        .collect()
}

fn default_input_pin() -> SymbolicPin {
    SymbolicPin::new("C7")
}

fn default_broadcast_capacity() -> usize {
    64
}
