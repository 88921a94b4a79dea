//! Fuse access with the write guard.
//!
//! Fuse bits are active low: a programmed bit reads 0. The guard refuses
//! any write after which the part would no longer answer on the ISP lines,
//! i.e. SPIEN unprogrammed, RSTDISBL programmed or DWEN programmed. The
//! rule is applied to the value being written and to the other fuse as it
//! currently stands.
use std::fmt;

use anyhow::Result;
use bitfield::bitfield;

use crate::error::IspError;
use crate::protocol::{Command, Fuse};
use crate::session::Session;
use crate::transport::Transport;

bitfield! {
    /// ATtiny13 low fuse byte
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct LowFuse(u8);
    impl Debug;
    u8;
    pub u8, cksel, set_cksel: 1, 0;
    pub u8, sut, set_sut: 3, 2;
    pub ckdiv8, set_ckdiv8: 4;
    pub wdton, set_wdton: 5;
    pub eesave, set_eesave: 6;
    pub spien, set_spien: 7;
}

bitfield! {
    /// ATtiny13 high fuse byte
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct HighFuse(u8);
    impl Debug;
    u8;
    pub rstdisbl, set_rstdisbl: 0;
    pub u8, bodlevel, set_bodlevel: 2, 1;
    pub dwen, set_dwen: 3;
    pub selfprgen, set_selfprgen: 4;
}

/// Clock selection of the low fuse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    External,
    InternalRc4_8MHz,
    InternalRc9_6MHz,
    Watchdog128kHz,
}

impl ClockSource {
    fn frequency_khz(&self) -> Option<u32> {
        match self {
            ClockSource::External => None,
            ClockSource::InternalRc4_8MHz => Some(4_800),
            ClockSource::InternalRc9_6MHz => Some(9_600),
            ClockSource::Watchdog128kHz => Some(128),
        }
    }
}

impl LowFuse {
    pub fn serial_programming_enabled(&self) -> bool {
        !self.spien()
    }

    pub fn clock_divided(&self) -> bool {
        !self.ckdiv8()
    }

    pub fn clock_source(&self) -> ClockSource {
        match self.cksel() {
            0b00 => ClockSource::External,
            0b01 => ClockSource::InternalRc4_8MHz,
            0b10 => ClockSource::InternalRc9_6MHz,
            _ => ClockSource::Watchdog128kHz,
        }
    }

    /// CPU clock in kHz, `None` for an external clock.
    pub fn cpu_khz(&self) -> Option<u32> {
        let base = self.clock_source().frequency_khz()?;
        Some(if self.clock_divided() { base / 8 } else { base })
    }
}

impl HighFuse {
    pub fn reset_pin_enabled(&self) -> bool {
        self.rstdisbl()
    }

    pub fn debugwire_enabled(&self) -> bool {
        !self.dwen()
    }
}

/// Why the given low fuse would lock out the programmer, if it would.
pub fn low_fuse_hazard(value: u8) -> Option<&'static str> {
    if !LowFuse(value).serial_programming_enabled() {
        Some("serial programming would be disabled")
    } else {
        None
    }
}

/// Why the given high fuse would lock out the programmer, if it would.
pub fn high_fuse_hazard(value: u8) -> Option<&'static str> {
    let high = HighFuse(value);
    if !high.reset_pin_enabled() {
        Some("reset pin would be disabled")
    } else if high.debugwire_enabled() {
        Some("debugWIRE would take over the reset pin")
    } else {
        None
    }
}

/// The three configuration bytes, read in one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseReport {
    pub low: u8,
    pub high: u8,
    pub lock: u8,
}

impl fmt::Display for FuseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let low = LowFuse(self.low);
        let high = HighFuse(self.high);
        writeln!(f, "Low Fuse:  0x{:02X}", self.low)?;
        writeln!(f, "High Fuse: 0x{:02X}", self.high)?;
        writeln!(f, "Lock Bits: 0x{:02X}", self.lock)?;
        writeln!(f, "  CKSEL[1:0]: {:#04b} ({:?})", low.cksel(), low.clock_source())?;
        writeln!(f, "  SUT[1:0]:   {:#04b} (startup time)", low.sut())?;
        writeln!(
            f,
            "  CKDIV8:     {} ({})",
            low.ckdiv8() as u8,
            if low.clock_divided() {
                "clock divided by 8"
            } else {
                "no clock division"
            }
        )?;
        writeln!(
            f,
            "  SPIEN:      {} ({})",
            low.spien() as u8,
            if low.serial_programming_enabled() {
                "serial programming enabled"
            } else {
                "SERIAL PROGRAMMING DISABLED"
            }
        )?;
        writeln!(
            f,
            "  RSTDISBL:   {} ({})",
            high.rstdisbl() as u8,
            if high.reset_pin_enabled() {
                "reset pin enabled"
            } else {
                "RESET PIN DISABLED"
            }
        )?;
        writeln!(
            f,
            "  DWEN:       {} ({})",
            high.dwen() as u8,
            if high.debugwire_enabled() {
                "DEBUGWIRE ENABLED"
            } else {
                "debugWIRE off"
            }
        )?;
        match low.cpu_khz() {
            Some(khz) if khz >= 1000 => write!(f, "  CPU clock:  {}.{} MHz", khz / 1000, khz % 1000 / 100)?,
            Some(khz) => write!(f, "  CPU clock:  {} kHz", khz)?,
            None => write!(f, "  CPU clock:  external")?,
        }
        for hazard in [low_fuse_hazard(self.low), high_fuse_hazard(self.high)]
            .into_iter()
            .flatten()
        {
            write!(f, "\n  WARNING: {}, the part may be unrecoverable over ISP", hazard.replace(" would be", " is"))?;
        }
        Ok(())
    }
}

impl<T: Transport> Session<'_, T> {
    pub fn read_fuse(&mut self, fuse: Fuse) -> Result<u8> {
        Ok(self.command(Command::ReadFuse(fuse))?.data())
    }

    pub fn read_fuses(&mut self) -> Result<FuseReport> {
        Ok(FuseReport {
            low: self.read_fuse(Fuse::Low)?,
            high: self.read_fuse(Fuse::High)?,
            lock: self.read_fuse(Fuse::Lock)?,
        })
    }

    /// Write a fuse after checking it cannot lock out the programmer.
    ///
    /// Nothing is written when the check fails. The value is read back after
    /// the write delay and must match.
    pub fn propose_fuse_write(&mut self, fuse: Fuse, value: u8) -> Result<()> {
        let hazard = match fuse {
            Fuse::Low => {
                let high = self.read_fuse(Fuse::High)?;
                low_fuse_hazard(value).or_else(|| high_fuse_hazard(high))
            }
            Fuse::High => {
                let low = self.read_fuse(Fuse::Low)?;
                high_fuse_hazard(value).or_else(|| low_fuse_hazard(low))
            }
            Fuse::Lock => Some("lock bits are never written"),
        };
        if let Some(reason) = hazard {
            return Err(IspError::UnsafeFuse {
                fuse,
                value,
                reason,
            }
            .into());
        }

        log::info!("Writing {}: 0x{:02x}", fuse, value);
        self.command(Command::write_fuse(fuse, value))?;
        self.count_fuse_write();
        let wait = self.timing().fuse_write();
        self.delay(wait);

        let actual = self.read_fuse(fuse)?;
        if actual != value {
            return Err(IspError::FuseReadback {
                fuse,
                expected: value,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Select the chip's full speed internal oscillator.
    ///
    /// Fuses already holding the wanted value are not rewritten. The high
    /// fuse is never written: a value other than the known-safe default is
    /// kept as long as it leaves reset and ISP usable.
    pub fn configure_clock(&mut self) -> Result<FuseReport> {
        let defaults = self.chip().fuses;
        let current = self.read_fuses()?;
        log::debug!("Fuses before clock setup: {:?}", current);

        let target = LowFuse(defaults.low);
        if !matches!(
            target.clock_source(),
            ClockSource::InternalRc9_6MHz | ClockSource::InternalRc4_8MHz
        ) {
            return Err(IspError::UnsafeFuse {
                fuse: Fuse::Low,
                value: defaults.low,
                reason: "clock source is not an internal RC oscillator",
            }
            .into());
        }
        if let Some(reason) = high_fuse_hazard(defaults.high) {
            return Err(IspError::UnsafeFuse {
                fuse: Fuse::High,
                value: defaults.high,
                reason,
            }
            .into());
        }

        if current.high != defaults.high {
            if let Some(reason) = high_fuse_hazard(current.high) {
                return Err(IspError::UnsafeFuse {
                    fuse: Fuse::High,
                    value: current.high,
                    reason,
                }
                .into());
            }
            log::warn!(
                "High fuse 0x{:02x} differs from the default 0x{:02x}, keeping it",
                current.high,
                defaults.high
            );
        }

        if current.low == defaults.low {
            log::info!("Low fuse already 0x{:02x}", current.low);
            return Ok(current);
        }
        self.propose_fuse_write(Fuse::Low, defaults.low)?;
        Ok(FuseReport {
            low: defaults.low,
            ..current
        })
    }
}
