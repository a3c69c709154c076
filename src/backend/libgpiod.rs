use log::debug;
use std::path::PathBuf;

use libgpiod::{chip::Chip, line, request};

use crate::backend::{GpioBackend, HardwareLine};
use crate::config::{BoardPin, Direction};
use crate::error::AppError;

pub struct LibgpiodBackend {
    consumer: String,
}

struct GpiodLine {
    chip: String,
    offset: u32,
    direction: Direction,
    request: request::Request, // line is released when the request drops
}

impl LibgpiodBackend {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            consumer: env!("CARGO_PKG_NAME").to_string(),
        })
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::Gpio(format!("open chip {path}: {e}")))
    }

    fn make_line_settings(direction: Direction) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;

        match direction {
            Direction::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| AppError::Gpio(format!("set drive: {e}")))?;
            }
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                ls.set_bias(None)
                    .map_err(|e| AppError::Gpio(format!("set bias: {e}")))?;
            }
        }

        // polarity is handled above the backend, the kernel must not invert
        ls.set_active_low(false);

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    fn request_line(
        &self,
        chip: &Chip,
        line_cfg: &line::Config,
    ) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(&self.consumer)
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::PinUnavailable(format!("request lines: {e}")))
    }
}

impl GpioBackend for LibgpiodBackend {
    fn acquire(
        &self,
        pin: &BoardPin,
        direction: Direction,
    ) -> Result<Box<dyn HardwareLine>, AppError> {
        let chip = Self::open_chip(&pin.chip)?;
        let line_settings = Self::make_line_settings(direction)?;
        let line_cfg = Self::make_line_config(pin.line, line_settings)?;
        let request = self.request_line(&chip, &line_cfg)?;

        debug!("requested {}:{} as {direction}", pin.chip, pin.line);

        Ok(Box::new(GpiodLine {
            chip: pin.chip.clone(),
            offset: pin.line,
            direction,
            request,
        }))
    }
}

impl HardwareLine for GpiodLine {
    fn set_level(&mut self, level: bool) -> Result<(), AppError> {
        if self.direction != Direction::Output {
            return Err(AppError::WrongDirection(format!(
                "{}:{} is requested as input",
                self.chip, self.offset
            )));
        }

        let value = if level {
            line::Value::Active
        } else {
            line::Value::InActive
        };
        self.request
            .set_value(self.offset, value)
            .map_err(|e| AppError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    fn get_level(&mut self) -> Result<bool, AppError> {
        let value = self
            .request
            .value(self.offset)
            .map_err(|e| AppError::Gpio(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => false,
            line::Value::Active => true,
        })
    }
}

impl Drop for GpiodLine {
    fn drop(&mut self) {
        debug!("released {}:{}", self.chip, self.offset);
    }
}
