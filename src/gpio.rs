use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::access::AccessGrant;
use crate::backend::GpioBackend;
use crate::config::{AppConfig, Direction, PinRecord, ReadbackMode, SymbolicPin};
use crate::error::AppError;
use crate::registry::{LineHandle, PinRegistry};
use crate::state::{
    LogicalState, PinState, logical_state_for_physical_level, physical_level_for_logical_state,
};
use crate::store::SettingsStore;

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub id: usize,
    pub pin: SymbolicPin,
    pub state: PinState,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinDescriptor {
    pub id: usize,
    #[serde(flatten)]
    pub record: PinRecord,
    pub state: PinState,
}

#[derive(Debug, Clone, Copy)]
enum ApplyPass {
    Configured,
    Reconfigured,
    Restored,
}

impl fmt::Display for ApplyPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyPass::Configured => f.write_str("Configured"),
            ApplyPass::Reconfigured => f.write_str("Reconfigured"),
            ApplyPass::Restored => f.write_str("Restored"),
        }
    }
}

struct ConfiguredPin {
    record: PinRecord,
    line: Option<LineHandle>, // None: unassigned, or degraded at apply time
}

#[derive(Default)]
struct ActiveConfiguration {
    pins: Vec<ConfiguredPin>,
    shared_input: Option<LineHandle>,
}

struct ReconfigurationGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ReconfigurationGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct GpioManager<B: GpioBackend> {
    registry: PinRegistry<B>,
    store: Box<dyn SettingsStore>,
    input_pin: SymbolicPin,
    readback: ReadbackMode,
    active: RwLock<ActiveConfiguration>,
    reconfiguring: AtomicBool,
    event_tx: broadcast::Sender<StateChange>,
}

impl<B: GpioBackend> GpioManager<B> {
    pub fn new(
        config: &AppConfig,
        backend: Arc<B>,
        store: Box<dyn SettingsStore>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(config.broadcast_capacity);

        Ok(Self {
            registry: PinRegistry::new(backend, &config.board),
            store,
            input_pin: config.input_pin.clone(),
            readback: config.readback,
            active: RwLock::new(ActiveConfiguration::default()),
            reconfiguring: AtomicBool::new(false),
            event_tx,
        })
    }

    pub fn registry(&self) -> &PinRegistry<B> {
        &self.registry
    }

    pub fn is_reconfiguring(&self) -> bool {
        self.reconfiguring.load(Ordering::Acquire)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateChange> {
        self.event_tx.subscribe()
    }

    pub fn start(&self) -> Result<(), AppError> {
        let _guard = self.begin_reconfiguration()?;
        let records = self.store.load()?;

        let mut active = self.active.write();
        self.teardown(&mut active);
        self.release_shared_input(&mut active);

        active.pins = records.into_iter().map(ConfiguredPin::new).collect();
        self.apply(&mut active, ApplyPass::Configured);
        self.acquire_shared_input(&mut active);

        Ok(())
    }

    pub fn save_configuration(
        &self,
        _grant: &AccessGrant,
        records: Vec<PinRecord>,
    ) -> Result<(), AppError> {
        let _guard = self.begin_reconfiguration()?;
        let mut active = self.active.write();

        self.teardown(&mut active);
        self.release_shared_input(&mut active);

        if let Err(e) = self.store.save(&records) {
            error!("Failed to persist GPIO configuration: {e}");
            self.apply(&mut active, ApplyPass::Restored);
            self.acquire_shared_input(&mut active);
            return Err(e);
        }

        active.pins = records.into_iter().map(ConfiguredPin::new).collect();
        self.apply(&mut active, ApplyPass::Reconfigured);
        self.acquire_shared_input(&mut active);

        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), AppError> {
        let _guard = self.begin_reconfiguration()?;
        let mut active = self.active.write();

        self.teardown(&mut active);
        self.release_shared_input(&mut active);
        Ok(())
    }

    pub fn configuration(&self) -> Result<Vec<PinRecord>, AppError> {
        let active = self.read_active()?;
        Ok(active.pins.iter().map(|pin| pin.record.clone()).collect())
    }

    pub fn turn_on(&self, grant: &AccessGrant, pin_id: usize) -> Result<(), AppError> {
        self.set_state(grant, pin_id, LogicalState::On)
    }

    pub fn turn_off(&self, grant: &AccessGrant, pin_id: usize) -> Result<(), AppError> {
        self.set_state(grant, pin_id, LogicalState::Off)
    }

    pub fn set_state(
        &self,
        _grant: &AccessGrant,
        pin_id: usize,
        state: LogicalState,
    ) -> Result<(), AppError> {
        let active = self.read_active()?;
        let pin = Self::pin(&active, pin_id)?;

        let Some(line) = &pin.line else {
            return Ok(());
        };
        if pin.record.direction != Direction::Output {
            return Err(AppError::WrongDirection(format!(
                "GPIO {} ({}) is an input",
                pin.record.pin, pin.record.name
            )));
        }

        let level = physical_level_for_logical_state(state, pin.record.active_mode);
        self.registry.set_output_level(line, level)?;
        info!("Turned {state} GPIO {}", pin.record.pin);

        self.notify(pin_id, &pin.record, state.into());
        Ok(())
    }

    pub fn get_state(&self, pin_id: usize) -> Result<PinState, AppError> {
        let active = self.read_active()?;
        let pin = Self::pin(&active, pin_id)?;
        self.read_pin(&active, pin)
    }

    pub fn get_all_states(&self) -> Result<Vec<PinState>, AppError> {
        let active = self.read_active()?;
        active
            .pins
            .iter()
            .map(|pin| self.read_pin(&active, pin))
            .collect()
    }

    pub fn describe(&self, pin_id: usize) -> Result<PinDescriptor, AppError> {
        let active = self.read_active()?;
        let pin = Self::pin(&active, pin_id)?;

        Ok(PinDescriptor {
            id: pin_id,
            record: pin.record.clone(),
            state: self.read_pin(&active, pin)?,
        })
    }

    fn begin_reconfiguration(&self) -> Result<ReconfigurationGuard<'_>, AppError> {
        self.reconfiguring
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::ConfigurationInFlight)?;

        Ok(ReconfigurationGuard {
            flag: &self.reconfiguring,
        })
    }

    fn read_active(&self) -> Result<RwLockReadGuard<'_, ActiveConfiguration>, AppError> {
        if self.is_reconfiguring() {
            return Err(AppError::ConfigurationInFlight);
        }
        self.active
            .try_read()
            .ok_or(AppError::ConfigurationInFlight)
    }

    fn pin(active: &ActiveConfiguration, pin_id: usize) -> Result<&ConfiguredPin, AppError> {
        active.pins.get(pin_id).ok_or(AppError::UnknownPinId(pin_id))
    }

    fn read_pin(
        &self,
        active: &ActiveConfiguration,
        pin: &ConfiguredPin,
    ) -> Result<PinState, AppError> {
        let Some(own) = &pin.line else {
            return Ok(PinState::Empty);
        };

        let line = match self.readback {
            ReadbackMode::Driven => own,
            ReadbackMode::SharedInput => active.shared_input.as_ref().unwrap_or(own),
        };

        let level = self.registry.read_level(line)?;
        Ok(logical_state_for_physical_level(level, pin.record.active_mode).into())
    }

    fn teardown(&self, active: &mut ActiveConfiguration) {
        for pin in active.pins.iter_mut() {
            if let Some(line) = pin.line.take() {
                self.registry.release(&line);
                info!("Cleaned {}", pin.record);
            }
        }
    }

    fn apply(&self, active: &mut ActiveConfiguration, pass: ApplyPass) {
        for (pin_id, pin) in active.pins.iter_mut().enumerate() {
            if pin.record.pin.is_unassigned() {
                continue;
            }

            info!("{pass} {}", pin.record);
            match self.claim(&pin.record) {
                Ok(line) => {
                    pin.line = Some(line);
                    if pin.record.direction == Direction::Output {
                        self.notify(
                            pin_id,
                            &pin.record,
                            LogicalState::from(pin.record.default_state).into(),
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        "GPIO {} ({}) left unassigned: {e}",
                        pin.record.pin, pin.record.name
                    );
                }
            }
        }
    }

    fn claim(&self, record: &PinRecord) -> Result<LineHandle, AppError> {
        let line = self.registry.acquire(&record.pin, record.direction)?;

        if record.direction == Direction::Output {
            let level =
                physical_level_for_logical_state(record.default_state.into(), record.active_mode);
            if let Err(e) = self.registry.set_output_level(&line, level) {
                self.registry.release(&line);
                return Err(e);
            }
        }

        Ok(line)
    }

    fn acquire_shared_input(&self, active: &mut ActiveConfiguration) {
        if self.input_pin.is_unassigned() {
            return;
        }

        match self.registry.acquire(&self.input_pin, Direction::Input) {
            Ok(line) => {
                info!("Configured GPIO {} as shared input", self.input_pin);
                active.shared_input = Some(line);
            }
            Err(e) => warn!("Shared input GPIO {} unavailable: {e}", self.input_pin),
        }
    }

    fn release_shared_input(&self, active: &mut ActiveConfiguration) {
        if let Some(line) = active.shared_input.take() {
            self.registry.release(&line);
        }
    }

    fn notify(&self, pin_id: usize, record: &PinRecord, state: PinState) {
        let _ = self.event_tx.send(StateChange {
            id: pin_id,
            pin: record.pin.clone(),
            state,
        });
    }
}

impl ConfiguredPin {
    fn new(record: PinRecord) -> Self {
        Self { record, line: None }
    }
}
