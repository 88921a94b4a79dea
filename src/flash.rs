//! Page oriented flash erase, write and read.
use anyhow::Result;

use crate::constants::{BYTES_PER_RECORD, ERASED_BYTE};
use crate::device::Chip;
use crate::error::IspError;
use crate::image::MemoryImage;
use crate::progress::{Observer, Phase, ProgressEvent};
use crate::protocol::Command;
use crate::session::{Session, SessionState};
use crate::transport::Transport;

/// Reject images the chip cannot hold.
pub fn check_image(image: &MemoryImage, chip: &Chip) -> Result<()> {
    let Some(max) = image.max_address() else {
        return Err(IspError::EmptyImage.into());
    };
    if max >= chip.flash_size {
        return Err(IspError::AddressOutOfRange {
            address: max,
            flash_size: chip.flash_size,
        }
        .into());
    }
    Ok(())
}

impl<T: Transport> Session<'_, T> {
    /// Erase flash and lock bits. Fuses are left alone.
    pub fn erase_chip(&mut self) -> Result<()> {
        log::info!("Erasing chip");
        self.command(Command::ChipErase)?;
        let wait = self.timing().chip_erase();
        self.delay(wait);
        self.set_state(SessionState::Erased);
        Ok(())
    }

    /// Load one page into the page buffer and commit it.
    ///
    /// `base` must be page aligned. Bytes past the end of `data` are loaded
    /// as 0xFF.
    pub fn write_page(&mut self, base: u32, data: &[u8]) -> Result<()> {
        let page_size = self.chip().page_size;
        anyhow::ensure!(
            base % page_size == 0,
            "page base 0x{:04x} is not aligned to {} bytes",
            base,
            page_size
        );
        anyhow::ensure!(
            data.len() <= page_size as usize,
            "{} bytes do not fit a {} byte page",
            data.len(),
            page_size
        );

        log::trace!("Writing page at 0x{:04x}", base);
        let words_per_page = self.chip().words_per_page();
        for word in 0..words_per_page {
            let offset = word as usize * 2;
            let low = data.get(offset).copied().unwrap_or(ERASED_BYTE);
            let high = data.get(offset + 1).copied().unwrap_or(ERASED_BYTE);
            self.command(Command::load_page(word as u8, false, low))?;
            self.command(Command::load_page(word as u8, true, high))?;
        }
        self.command(Command::write_page((base / 2) as u16))?;
        let wait = self.timing().page_write();
        self.delay(wait);
        Ok(())
    }

    pub fn read_byte(&mut self, address: u32) -> Result<u8> {
        let high = address % 2 == 1;
        let resp = self.command(Command::read_flash((address / 2) as u16, high))?;
        Ok(resp.data())
    }

    /// Both bytes of a flash word, low byte first.
    pub fn read_word(&mut self, word_address: u32) -> Result<(u8, u8)> {
        let low = self.command(Command::read_flash(word_address as u16, false))?;
        let high = self.command(Command::read_flash(word_address as u16, true))?;
        Ok((low.data(), high.data()))
    }

    /// Program the pages spanned by `image`, lowest first.
    ///
    /// The chip should be erased beforehand; a page commit can only clear
    /// bits. Cancellation is honoured between pages.
    pub fn write_image(&mut self, image: &MemoryImage, observer: &mut dyn Observer) -> Result<()> {
        check_image(image, self.chip())?;
        let page_size = self.chip().page_size;
        let Some(range) = image.page_range(page_size, self.chip().flash_size) else {
            return Err(IspError::EmptyImage.into());
        };
        let total = (range.len() / page_size as usize).max(1);
        log::info!(
            "Programming {} bytes in {} pages (0x{:04x}..0x{:04x})",
            image.len(),
            total,
            range.start,
            range.end
        );

        for (done, base) in range.step_by(page_size as usize).enumerate() {
            if observer.is_cancelled() {
                return Err(IspError::Cancelled.into());
            }
            let data = image.padded(base, page_size);
            self.write_page(base, &data)?;
            observer.progress(ProgressEvent::new(Phase::Programming, done + 1, total));
        }
        self.set_state(SessionState::Programmed);
        Ok(())
    }

    /// Read the whole flash, one record worth of words at a time.
    pub fn read_flash_memory(&mut self, observer: &mut dyn Observer) -> Result<Vec<u8>> {
        let flash_size = self.chip().flash_size;
        let records = (flash_size as usize).div_ceil(BYTES_PER_RECORD);
        let mut content = Vec::with_capacity(flash_size as usize);

        for record in 0..records {
            if observer.is_cancelled() {
                return Err(IspError::Cancelled.into());
            }
            let start = (record * BYTES_PER_RECORD) as u32;
            let end = (start + BYTES_PER_RECORD as u32).min(flash_size);
            for word in (start / 2)..end.div_ceil(2) {
                let (low, high) = self.read_word(word)?;
                content.push(low);
                if word * 2 + 1 < end {
                    content.push(high);
                }
            }
            observer.progress(ProgressEvent::new(Phase::Reading, record + 1, records));
        }
        Ok(content)
    }
}
