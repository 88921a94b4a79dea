//! Top level operations. Each one runs in its own programming session.

use anyhow::Result;

#[cfg(target_os = "linux")]
use crate::config::Config;
#[cfg(target_os = "linux")]
use crate::transport::{BitBangTransport, LinuxGpioPins};
use crate::{
    config::Timing,
    device::ChipDB,
    error::IspError,
    flash::check_image,
    format::encode_dump,
    fuse::FuseReport,
    image::MemoryImage,
    progress::Observer,
    session::Session,
    Chip, Transport,
};

pub struct Flashing<T: Transport> {
    transport: T,
    chip: Chip,
    timing: Timing,
}

#[cfg(target_os = "linux")]
impl Flashing<BitBangTransport<LinuxGpioPins>> {
    pub fn new_from_gpio(config: &Config) -> Result<Self> {
        let pins = LinuxGpioPins::open(&config.pins)?;
        let transport = BitBangTransport::new(pins, &config.timing)?;
        Ok(Flashing::new(transport, Chip::attiny13()?, config.timing.clone()))
    }
}

/// Release the session, keeping the operation's error if both fail.
fn finish<T: Transport, R>(session: Session<'_, T>, result: Result<R>) -> Result<R> {
    match (result, session.close()) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                log::error!("Failed to leave programming mode: {}", close_err);
            }
            Err(e)
        }
    }
}

impl<T: Transport> Flashing<T> {
    pub fn new(transport: T, chip: Chip, timing: Timing) -> Self {
        Flashing {
            transport,
            chip,
            timing,
        }
    }

    pub fn chip(&self) -> &Chip {
        &self.chip
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    fn with_session<R>(&mut self, op: impl FnOnce(&mut Session<'_, T>) -> Result<R>) -> Result<R> {
        let mut session = Session::enter(&mut self.transport, &self.chip, &self.timing)?;
        let result = op(&mut session);
        finish(session, result)
    }

    /// Read the signature without checking it against the expected part.
    pub fn identify(&mut self) -> Result<[u8; 3]> {
        self.with_session(|s| s.read_signature())
    }

    pub fn read_fuses(&mut self) -> Result<FuseReport> {
        self.with_session(|s| {
            s.check_signature()?;
            s.read_fuses()
        })
    }

    pub fn dump_info(&mut self) -> Result<()> {
        let (signature, report) = self.with_session(|s| Ok((s.read_signature()?, s.read_fuses()?)))?;
        match ChipDB::find_chip(signature) {
            Ok(chip) => log::info!("Chip: {} ({} bytes flash, {} byte pages)", chip, chip.flash_size, chip.page_size),
            Err(_) => log::warn!("Unknown chip, signature 0x{}", hex::encode(signature)),
        }
        for line in report.to_string().lines() {
            log::info!("{}", line);
        }
        Ok(())
    }

    pub fn erase(&mut self) -> Result<()> {
        self.with_session(|s| {
            s.check_signature()?;
            s.erase_chip()
        })
    }

    /// Erase, program and verify `image`, selecting the internal oscillator first.
    ///
    /// Programming mode is always left again, whichever step fails. Nothing
    /// is erased unless the signature matches and the fuses are safe.
    pub fn program_image(&mut self, image: &MemoryImage, observer: &mut dyn Observer) -> Result<()> {
        check_image(image, &self.chip)?;
        log::info!(
            "Firmware: {} bytes, 0x{:04x}..=0x{:04x}",
            image.len(),
            image.min_address().unwrap_or_default(),
            image.max_address().unwrap_or_default()
        );
        self.with_session(|s| {
            s.check_signature()?;
            s.configure_clock()?;
            s.erase_chip()?;
            s.write_image(image, observer)?;
            s.verify(image, observer)
        })
    }

    /// Compare flash with `image`. An empty image verifies trivially.
    pub fn verify_image(&mut self, image: &MemoryImage, observer: &mut dyn Observer) -> Result<()> {
        if !image.is_empty() {
            check_image(image, &self.chip)?;
        }
        self.with_session(|s| {
            s.check_signature()?;
            s.verify(image, observer)
        })
    }

    /// Read the whole flash as Intel HEX text.
    ///
    /// Returns `None` when the target does not answer the programming enable
    /// instruction.
    pub fn dump_image(&mut self, observer: &mut dyn Observer) -> Result<Option<String>> {
        let mut session = match Session::enter(&mut self.transport, &self.chip, &self.timing) {
            Ok(session) => session,
            Err(e) if matches!(IspError::of(&e), Some(IspError::Handshake { .. })) => {
                log::warn!("{}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let content = session.read_flash_memory(observer);
        let content = finish(session, content)?;
        Ok(Some(encode_dump(&content)?))
    }
}
