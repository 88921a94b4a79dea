//! Read-back comparison of flash against an image.
use anyhow::Result;

use crate::error::{IspError, Mismatch};
use crate::flash::check_image;
use crate::image::MemoryImage;
use crate::progress::{Observer, Phase, ProgressEvent};
use crate::session::{Session, SessionState};
use crate::transport::Transport;

impl<T: Transport> Session<'_, T> {
    /// Compare flash with the bytes present in `image`.
    ///
    /// Flash is read a word at a time, each touched word once. Gives up with
    /// [`IspError::FlashMismatch`] as soon as `verify_mismatch_limit` bytes
    /// differ. An empty image verifies without any reads; one reaching past
    /// the end of flash is refused before the first read.
    pub fn verify(&mut self, image: &MemoryImage, observer: &mut dyn Observer) -> Result<()> {
        if image.is_empty() {
            log::info!("Nothing to verify");
            self.set_state(SessionState::Verified);
            return Ok(());
        }
        check_image(image, self.chip())?;
        let page_size = self.chip().page_size;
        let Some(range) = image.page_range(page_size, self.chip().flash_size) else {
            return Err(IspError::EmptyImage.into());
        };
        let first_page = range.start / page_size;
        let total = (range.len() / page_size as usize).max(1);
        let limit = self.timing().verify_mismatch_limit;

        log::info!("Verifying {} bytes", image.len());
        let mut mismatches = Vec::new();
        let mut current_page = None;
        for word in image.word_addresses() {
            let page = word * 2 / page_size;
            if current_page != Some(page) {
                if current_page.is_some() {
                    let done = (page - first_page) as usize;
                    observer.progress(ProgressEvent::new(Phase::Verifying, done, total));
                }
                if observer.is_cancelled() {
                    return Err(IspError::Cancelled.into());
                }
                current_page = Some(page);
            }

            let (low, high) = self.read_word(word)?;
            for (address, actual) in [(word * 2, low), (word * 2 + 1, high)] {
                let Some(expected) = image.get(address) else {
                    continue;
                };
                if expected == actual {
                    continue;
                }
                log::warn!(
                    "Mismatch at 0x{:04x}: expected 0x{:02x}, read 0x{:02x}",
                    address,
                    expected,
                    actual
                );
                mismatches.push(Mismatch {
                    address,
                    expected,
                    actual,
                });
                if limit > 0 && mismatches.len() >= limit {
                    log::error!("Stopping verification after {} mismatches", mismatches.len());
                    return Err(IspError::FlashMismatch {
                        mismatches,
                        stopped_early: true,
                    }
                    .into());
                }
            }
        }
        observer.progress(ProgressEvent::new(Phase::Verifying, total, total));

        if !mismatches.is_empty() {
            return Err(IspError::FlashMismatch {
                mismatches,
                stopped_early: false,
            }
            .into());
        }
        log::info!("Verify OK");
        self.set_state(SessionState::Verified);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timing;
    use crate::device::Chip;
    use crate::progress::Silent;
    use crate::transport::SimTarget;

    fn verify_against(sim: &mut SimTarget, image: &MemoryImage) -> Result<()> {
        let chip = Chip::attiny13().unwrap();
        let timing = Timing::default();
        let mut session = Session::enter(sim, &chip, &timing)?;
        session.verify(image, &mut Silent)
    }

    #[test]
    fn image_past_flash_end_reads_nothing() {
        let chip = Chip::attiny13().unwrap();
        let mut sim = SimTarget::new(&chip).with_flash(0, &[0xaa]);
        let image: MemoryImage = [(0x2_0000, 0xaa)].into_iter().collect();
        let err = verify_against(&mut sim, &image).unwrap_err();
        assert!(matches!(
            IspError::of(&err),
            Some(IspError::AddressOutOfRange {
                address: 0x2_0000,
                flash_size: 1024
            })
        ));
        assert_eq!(sim.frames(), 1);
    }

    #[test]
    fn empty_image_reads_nothing() {
        let chip = Chip::attiny13().unwrap();
        let mut sim = SimTarget::new(&chip);
        verify_against(&mut sim, &MemoryImage::new()).unwrap();
        // programming enable only
        assert_eq!(sim.frames(), 1);
    }

    #[test]
    fn shared_words_are_read_once() {
        let chip = Chip::attiny13().unwrap();
        let mut sim = SimTarget::new(&chip).with_flash(0, &[1, 2, 3, 4]);
        let image = MemoryImage::from_bytes(0, &[1, 2, 3]).unwrap();
        verify_against(&mut sim, &image).unwrap();
        // enable, then two words of two reads each
        assert_eq!(sim.frames(), 5);
    }

    #[test]
    fn absent_bytes_are_not_compared() {
        let chip = Chip::attiny13().unwrap();
        let mut sim = SimTarget::new(&chip).with_flash(0x10, &[0xaa, 0x00]);
        let image: MemoryImage = [(0x10, 0xaa)].into_iter().collect();
        verify_against(&mut sim, &image).unwrap();
    }

    #[test]
    fn stops_at_mismatch_limit() {
        let chip = Chip::attiny13().unwrap();
        let mut sim = SimTarget::new(&chip);
        let image = MemoryImage::from_bytes(0x100, &[0x00; 25]).unwrap();
        let err = verify_against(&mut sim, &image).unwrap_err();
        match IspError::of(&err) {
            Some(IspError::FlashMismatch {
                mismatches,
                stopped_early: true,
            }) => {
                assert_eq!(mismatches.len(), 20);
                assert_eq!(mismatches[0].address, 0x100);
                assert_eq!(mismatches[19].actual, 0xff);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn reports_every_mismatch_below_limit() {
        let chip = Chip::attiny13().unwrap();
        let mut sim = SimTarget::new(&chip)
            .with_flash(0, &[0x55; 64])
            .with_stuck_byte(5, 0x00)
            .with_stuck_byte(40, 0x00);
        let image = MemoryImage::from_bytes(0, &[0x55; 64]).unwrap();
        let mut events = Vec::new();
        let timing = Timing::default();
        let err = {
            let mut session = Session::enter(&mut sim, &chip, &timing).unwrap();
            let mut observer = |e: ProgressEvent| events.push(e.percent);
            session.verify(&image, &mut observer).unwrap_err()
        };
        let Some(IspError::FlashMismatch {
            mismatches,
            stopped_early: false,
        }) = IspError::of(&err)
        else {
            panic!("unexpected {:?}", err);
        };
        let addresses: Vec<u32> = mismatches.iter().map(|m| m.address).collect();
        assert_eq!(addresses, vec![5, 40]);
        assert_eq!(events, vec![50, 100]);
    }
}
