//! ISP lines on the Linux GPIO character device.
use anyhow::{Context, Result};
use gpiocdev::line::{Bias, Offset, Value};
use gpiocdev::request::{Config, Request};

use super::IspPins;
use crate::config::PinConfig;

fn level(high: bool) -> Value {
    if high { Value::Active } else { Value::Inactive }
}

pub struct LinuxGpioPins {
    request: Request,
    sck: Offset,
    mosi: Offset,
    miso: Offset,
    reset: Offset,
}

impl LinuxGpioPins {
    pub fn open(config: &PinConfig) -> Result<Self> {
        log::info!(
            "Opening {} (sck={}, miso={}, mosi={}, reset={})",
            config.chip,
            config.sck,
            config.miso,
            config.mosi,
            config.reset
        );

        // SCK/MOSI low, reset released, MISO pulled up so an absent target reads 0xFF
        let mut req_config = Config::default();
        req_config.with_line(config.sck).as_output(Value::Inactive);
        req_config.with_line(config.mosi).as_output(Value::Inactive);
        req_config.with_line(config.reset).as_output(Value::Active);
        req_config
            .with_line(config.miso)
            .as_input()
            .with_bias(Bias::PullUp);

        let request = Request::from_config(req_config)
            .on_chip(&config.chip)
            .with_consumer("tinyisp")
            .request()
            .with_context(|| format!("requesting lines on {}", config.chip))?;

        Ok(LinuxGpioPins {
            request,
            sck: config.sck,
            mosi: config.mosi,
            miso: config.miso,
            reset: config.reset,
        })
    }
}

impl IspPins for LinuxGpioPins {
    fn set_sck(&mut self, high: bool) -> Result<()> {
        self.request.set_value(self.sck, level(high))?;
        Ok(())
    }

    fn set_mosi(&mut self, high: bool) -> Result<()> {
        self.request.set_value(self.mosi, level(high))?;
        Ok(())
    }

    fn miso(&mut self) -> Result<bool> {
        Ok(self.request.value(self.miso)? == Value::Active)
    }

    fn set_reset(&mut self, high: bool) -> Result<()> {
        self.request.set_value(self.reset, level(high))?;
        Ok(())
    }
}
