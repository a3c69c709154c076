pub mod access;
pub mod backend;
pub mod config;
pub mod error;
pub mod gpio;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;

pub use access::{AccessGrant, AccessPolicy};
pub use backend::{GpioBackend, HardwareLine};
pub use config::{
    AppConfig, BoardPin, DefaultState, Direction, HttpConfig, PinRecord, Polarity, ReadbackMode,
    SymbolicPin,
};
pub use error::AppError;
pub use gpio::{GpioManager, PinDescriptor, StateChange};
pub use registry::{LineHandle, PinRegistry};
pub use routes::AppState;
pub use state::{
    LogicalState, PinState, logical_state_for_physical_level, physical_level_for_logical_state,
};
pub use store::{JsonFileStore, MemoryStore, SettingsStore};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
