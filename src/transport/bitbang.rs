//! Software driven ISP link over four logic lines.
use std::time::Duration;

use anyhow::Result;

use super::Transport;
use crate::config::Timing;

/// The four lines of the ISP header, as seen from the programmer.
pub trait IspPins {
    /// Set clock line value
    fn set_sck(&mut self, high: bool) -> Result<()>;

    /// Set the programmer's data output (target MOSI)
    fn set_mosi(&mut self, high: bool) -> Result<()>;

    /// Get the programmer's data input (target MISO)
    fn miso(&mut self) -> Result<bool>;

    /// Set the reset line level. The target is held in reset while low.
    fn set_reset(&mut self, high: bool) -> Result<()>;
}

/// Bit-banged transport on top of any [`IspPins`]
pub struct BitBangTransport<P: IspPins> {
    pins: P,
    half_period: Duration,
}

impl<P: IspPins> BitBangTransport<P> {
    /// Drive the idle levels (SCK and MOSI low, reset released) and let the lines settle.
    pub fn new(mut pins: P, timing: &Timing) -> Result<Self> {
        pins.set_sck(false)?;
        pins.set_mosi(false)?;
        pins.set_reset(true)?;
        std::thread::sleep(timing.idle_settle());
        log::debug!(
            "ISP lines idle, SCK half period {}us",
            timing.sck_half_period_us
        );
        Ok(BitBangTransport {
            pins,
            half_period: timing.sck_half_period(),
        })
    }

    pub fn pins(&self) -> &P {
        &self.pins
    }

    pub fn into_pins(self) -> P {
        self.pins
    }

    fn half_period_delay(&self) {
        if !self.half_period.is_zero() {
            std::thread::sleep(self.half_period);
        }
    }
}

impl<P: IspPins> Transport for BitBangTransport<P> {
    fn transfer_byte(&mut self, byte: u8) -> Result<u8> {
        let mut read = 0u8;
        for bit in (0..8).rev() {
            self.pins.set_mosi((byte >> bit) & 1 != 0)?;
            self.half_period_delay();
            // MISO is stable at the end of the low phase
            read = (read << 1) | self.pins.miso()? as u8;
            self.pins.set_sck(true)?;
            self.half_period_delay();
            self.pins.set_sck(false)?;
        }
        Ok(read)
    }

    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        self.pins.set_reset(!asserted)
    }
}
