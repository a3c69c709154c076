use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use gpioctl::{
    AccessGrant, AccessPolicy, AppConfig, AppError, DefaultState, Direction, GpioManager,
    LogicalState, MemoryStore, MockGpioBackend, PinRecord, PinState, Polarity, SettingsStore,
    SymbolicPin,
};

fn sample_config() -> AppConfig {
    serde_json::from_str(
        r#"
        {
            "http": {
                "host": "localhost:8080",
                "path": "/api/v1"
            },
            "broadcast_capacity": 16
        }
        "#,
    )
    .expect("valid sample config")
}

fn record(pin: &str, active_mode: Polarity, default_state: DefaultState, name: &str) -> PinRecord {
    PinRecord {
        pin: SymbolicPin::new(pin),
        direction: Direction::Output,
        active_mode,
        default_state,
        name: name.to_string(),
    }
}

fn light() -> PinRecord {
    record("D4", Polarity::ActiveLow, DefaultState::DefaultOff, "Light")
}

fn grant() -> AccessGrant {
    AccessPolicy::open().check(None).expect("open policy grants access")
}

fn start_with(
    config: &AppConfig,
    records: Vec<PinRecord>,
) -> (Arc<MockGpioBackend>, Arc<GpioManager<MockGpioBackend>>) {
    let backend = Arc::new(MockGpioBackend::default());
    let store = Box::new(MemoryStore::with_records(records));
    let manager = Arc::new(GpioManager::new(config, backend.clone(), store).unwrap());
    manager.start().expect("start applies configuration");
    (backend, manager)
}

fn start(records: Vec<PinRecord>) -> (Arc<MockGpioBackend>, Arc<GpioManager<MockGpioBackend>>) {
    start_with(&sample_config(), records)
}

fn wait_for_reconfiguration(manager: &GpioManager<MockGpioBackend>) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !manager.is_reconfiguring() {
        assert!(Instant::now() < deadline, "reconfiguration never started");
        thread::yield_now();
    }
}

#[test]
fn active_low_default_off_drives_high() {
    let (backend, manager) = start(vec![light()]);

    assert_eq!(backend.level("D4"), Some(true));
    assert_eq!(backend.claimed("D4"), Some(Direction::Output));
    assert_eq!(manager.get_state(0).unwrap(), PinState::Off);
}

#[test]
fn turn_on_active_low_drives_low() {
    let (backend, manager) = start(vec![light()]);

    manager.turn_on(&grant(), 0).unwrap();

    assert_eq!(backend.level("D4"), Some(false));
    assert_eq!(manager.get_state(0).unwrap(), PinState::On);
}

#[test]
fn turn_on_is_idempotent() {
    let (backend, manager) = start(vec![light()]);

    manager.turn_on(&grant(), 0).unwrap();
    let once = backend.level("D4");
    manager.turn_on(&grant(), 0).unwrap();

    assert_eq!(backend.level("D4"), once);
    assert_eq!(manager.get_state(0).unwrap(), PinState::On);
    assert_eq!(backend.acquisitions("D4"), 1);
}

#[test]
fn turn_off_after_on_restores_level() {
    let (backend, manager) = start(vec![record(
        "C2",
        Polarity::ActiveHigh,
        DefaultState::DefaultOn,
        "Fan",
    )]);
    assert_eq!(backend.level("C2"), Some(true));

    manager.turn_off(&grant(), 0).unwrap();

    assert_eq!(backend.level("C2"), Some(false));
    assert_eq!(manager.get_state(0).unwrap(), PinState::Off);
}

#[test]
fn unassigned_pin_is_a_noop() {
    let (backend, manager) = start(vec![record(
        "",
        Polarity::ActiveLow,
        DefaultState::DefaultOn,
        "Spare",
    )]);
    // only the shared input sensor has been claimed
    assert_eq!(backend.total_acquisitions(), 1);

    assert_eq!(manager.get_state(0).unwrap(), PinState::Empty);
    manager.turn_on(&grant(), 0).unwrap();
    manager.turn_off(&grant(), 0).unwrap();

    assert_eq!(backend.total_acquisitions(), 1);
    assert_eq!(manager.get_state(0).unwrap(), PinState::Empty);
}

#[test]
fn unknown_pin_id_is_rejected() {
    let (_backend, manager) = start(vec![
        light(),
        record("D5", Polarity::ActiveHigh, DefaultState::DefaultOff, "Fan"),
    ]);

    assert!(matches!(
        manager.turn_on(&grant(), 5),
        Err(AppError::UnknownPinId(5))
    ));
    assert!(matches!(
        manager.get_state(2),
        Err(AppError::UnknownPinId(2))
    ));
}

#[test]
fn dropped_pin_is_released_exactly_once() {
    let (backend, manager) = start(vec![
        light(),
        record("D5", Polarity::ActiveHigh, DefaultState::DefaultOff, "Fan"),
    ]);

    manager.save_configuration(&grant(), vec![light()]).unwrap();

    assert_eq!(backend.releases("D5"), 1);
    assert_eq!(backend.claimed("D5"), None);
    assert_eq!(manager.registry().claimed_direction("D5"), None);

    assert_eq!(backend.releases("D4"), 1);
    assert_eq!(backend.acquisitions("D4"), 2);
    assert_eq!(backend.claimed("D4"), Some(Direction::Output));
    assert_eq!(manager.configuration().unwrap(), vec![light()]);
}

#[test]
fn all_states_follow_configuration_order() {
    let (_backend, manager) = start(vec![
        record("D4", Polarity::ActiveHigh, DefaultState::DefaultOn, "Light"),
        record("", Polarity::ActiveHigh, DefaultState::DefaultOn, "Spare"),
        record("D6", Polarity::ActiveLow, DefaultState::DefaultOff, "Pump"),
    ]);

    let states = manager.get_all_states().unwrap();

    assert_eq!(states, vec![PinState::On, PinState::Empty, PinState::Off]);
    for (id, state) in states.iter().enumerate() {
        assert_eq!(manager.get_state(id).unwrap(), *state);
    }
}

#[test]
fn out_of_vocabulary_pin_degrades_without_stopping_apply() {
    let (backend, manager) = start(vec![
        record("Z9", Polarity::ActiveHigh, DefaultState::DefaultOn, "Bogus"),
        record("D5", Polarity::ActiveHigh, DefaultState::DefaultOn, "Fan"),
    ]);

    assert_eq!(manager.get_state(0).unwrap(), PinState::Empty);
    manager.turn_on(&grant(), 0).unwrap();
    assert_eq!(manager.get_state(1).unwrap(), PinState::On);
    assert_eq!(backend.level("D5"), Some(true));
}

#[test]
fn conflicting_direction_degrades_second_pin() {
    let mut sensor = record("D4", Polarity::ActiveHigh, DefaultState::DefaultOff, "Sensor");
    sensor.direction = Direction::Input;
    let (_backend, manager) = start(vec![light(), sensor]);

    assert_eq!(manager.get_state(0).unwrap(), PinState::Off);
    assert_eq!(manager.get_state(1).unwrap(), PinState::Empty);
}

#[test]
fn input_pin_reports_sensed_level_and_refuses_drive() {
    let mut door = record("C0", Polarity::ActiveLow, DefaultState::DefaultOff, "Door");
    door.direction = Direction::Input;
    let (backend, manager) = start(vec![door]);

    backend.set_input_level("C0", false);
    assert_eq!(manager.get_state(0).unwrap(), PinState::On);
    backend.set_input_level("C0", true);
    assert_eq!(manager.get_state(0).unwrap(), PinState::Off);

    assert!(matches!(
        manager.turn_on(&grant(), 0),
        Err(AppError::WrongDirection(_))
    ));
}

#[test]
fn shared_input_readback_reads_the_sensor() {
    let mut config = sample_config();
    config.readback = gpioctl::ReadbackMode::SharedInput;
    let (backend, manager) = start_with(
        &config,
        vec![
            record("D4", Polarity::ActiveHigh, DefaultState::DefaultOff, "Light"),
            record("D5", Polarity::ActiveLow, DefaultState::DefaultOff, "Fan"),
        ],
    );
    assert_eq!(manager.registry().claimed_direction("C7"), Some(Direction::Input));

    backend.set_input_level("C7", true);

    assert_eq!(
        manager.get_all_states().unwrap(),
        vec![PinState::On, PinState::Off]
    );
}

#[test]
fn driven_readback_ignores_the_sensor() {
    let (backend, manager) = start(vec![record(
        "D4",
        Polarity::ActiveHigh,
        DefaultState::DefaultOff,
        "Light",
    )]);

    backend.set_input_level("C7", true);

    assert_eq!(manager.get_state(0).unwrap(), PinState::Off);
}

#[test]
fn commands_during_reconfiguration_are_rejected() {
    let (backend, manager) = start(vec![light()]);

    let bus = backend.hold_bus();
    let worker = {
        let manager = manager.clone();
        thread::spawn(move || {
            let next = vec![record(
                "D6",
                Polarity::ActiveHigh,
                DefaultState::DefaultOn,
                "Pump",
            )];
            manager.save_configuration(&grant(), next)
        })
    };
    wait_for_reconfiguration(&manager);

    assert!(matches!(
        manager.get_state(0),
        Err(AppError::ConfigurationInFlight)
    ));
    assert!(matches!(
        manager.turn_on(&grant(), 0),
        Err(AppError::ConfigurationInFlight)
    ));
    assert!(matches!(
        manager.get_all_states(),
        Err(AppError::ConfigurationInFlight)
    ));
    assert!(matches!(
        manager.save_configuration(&grant(), vec![light()]),
        Err(AppError::ConfigurationInFlight)
    ));

    drop(bus);
    worker.join().expect("worker thread").unwrap();

    assert!(!manager.is_reconfiguring());
    assert_eq!(manager.get_all_states().unwrap(), vec![PinState::On]);
    assert_eq!(backend.level("D6"), Some(true));
    assert_eq!(backend.claimed("D4"), None);
}

struct FailingStore {
    records: Vec<PinRecord>,
}

impl SettingsStore for FailingStore {
    fn load(&self) -> Result<Vec<PinRecord>, AppError> {
        Ok(self.records.clone())
    }

    fn save(&self, _records: &[PinRecord]) -> Result<(), AppError> {
        Err(AppError::Config("disk full".into()))
    }
}

#[test]
fn failed_persist_restores_previous_configuration() {
    let backend = Arc::new(MockGpioBackend::default());
    let store = Box::new(FailingStore {
        records: vec![light()],
    });
    let manager = GpioManager::new(&sample_config(), backend.clone(), store).unwrap();
    manager.start().unwrap();
    manager.turn_on(&grant(), 0).unwrap();

    let next = vec![record(
        "D6",
        Polarity::ActiveHigh,
        DefaultState::DefaultOn,
        "Pump",
    )];
    assert!(matches!(
        manager.save_configuration(&grant(), next),
        Err(AppError::Config(_))
    ));

    assert_eq!(manager.configuration().unwrap(), vec![light()]);
    assert_eq!(backend.claimed("D4"), Some(Direction::Output));
    assert_eq!(backend.claimed("D6"), None);
    assert_eq!(manager.get_state(0).unwrap(), PinState::Off);
}

#[test]
fn shutdown_releases_every_line() {
    let (backend, manager) = start(vec![
        light(),
        record("C1", Polarity::ActiveHigh, DefaultState::DefaultOn, "Fan"),
    ]);
    assert_eq!(manager.registry().claimed_count(), 3);

    manager.shutdown().unwrap();

    assert_eq!(manager.registry().claimed_count(), 0);
    assert_eq!(backend.releases("D4"), 1);
    assert_eq!(backend.releases("C1"), 1);
    assert_eq!(backend.releases("C7"), 1);
}

#[test]
fn drives_are_published_to_subscribers() {
    let (_backend, manager) = start(vec![light()]);
    let mut rx = manager.subscribe_events();

    manager.set_state(&grant(), 0, LogicalState::On).unwrap();

    let change = rx.try_recv().expect("state change published");
    assert_eq!(change.id, 0);
    assert_eq!(change.pin.as_str(), "D4");
    assert_eq!(change.state, PinState::On);
}

#[test]
fn second_output_on_same_line_degrades() {
    let (backend, manager) = start(vec![
        record("D4", Polarity::ActiveHigh, DefaultState::DefaultOn, "Light"),
        record("D4", Polarity::ActiveHigh, DefaultState::DefaultOff, "Shadow"),
    ]);

    assert_eq!(
        manager.get_all_states().unwrap(),
        vec![PinState::On, PinState::Empty]
    );
    assert_eq!(backend.acquisitions("D4"), 1);
    assert_eq!(backend.level("D4"), Some(true));

    manager.turn_off(&grant(), 1).unwrap();
    assert_eq!(manager.get_state(0).unwrap(), PinState::On);
    assert_eq!(backend.level("D4"), Some(true));
}

#[test]
fn zero_broadcast_capacity_is_rejected() {
    let mut config = sample_config();
    config.broadcast_capacity = 0;
    let store = Box::new(MemoryStore::default());

    assert!(matches!(
        GpioManager::new(&config, Arc::new(MockGpioBackend::default()), store),
        Err(AppError::Config(_))
    ));
}

#[test]
fn concurrent_commands_settle_on_last_write() {
    let (backend, manager) = start(vec![
        light(),
        record("C1", Polarity::ActiveHigh, DefaultState::DefaultOff, "Fan"),
        record("C2", Polarity::ActiveLow, DefaultState::DefaultOn, "Pump"),
        record("C3", Polarity::ActiveHigh, DefaultState::DefaultOn, "Heater"),
    ]);

    let workers: Vec<_> = (1..=3)
        .map(|id| {
            let manager = manager.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    if round % 2 == 0 {
                        manager.turn_on(&grant(), id)?;
                    } else {
                        manager.turn_off(&grant(), id)?;
                    }
                    manager.turn_on(&grant(), 0)?;
                    manager.get_state(id)?;
                    manager.get_state(0)?;
                    manager.get_all_states()?;
                }
                manager.turn_on(&grant(), id)
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker thread").unwrap();
    }
    manager.turn_off(&grant(), 0).unwrap();

    assert_eq!(
        manager.get_all_states().unwrap(),
        vec![PinState::Off, PinState::On, PinState::On, PinState::On]
    );
    assert_eq!(backend.level("D4"), Some(true));
    assert_eq!(backend.level("C1"), Some(true));
    assert_eq!(backend.level("C2"), Some(false));
    assert_eq!(backend.level("C3"), Some(true));
}
