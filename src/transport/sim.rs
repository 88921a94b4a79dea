//! In-process model of an ATtiny13 behind its ISP interface.
//!
//! The model answers at byte granularity like the real shift register: the
//! second and third response bytes echo the previous command bytes, the
//! fourth carries read results. Writes take effect when the fourth byte is
//! shifted in. Delays advance a virtual clock instead of sleeping.
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;

use super::Transport;
use crate::constants::{ERASED_BYTE, FRAME_SIZE, commands};
use crate::device::Chip;

pub struct SimTarget {
    signature: [u8; 3],
    flash: Vec<u8>,
    page_buffer: Vec<u8>,
    low_fuse: u8,
    high_fuse: u8,
    lock_bits: u8,
    /// Bytes that read back as a fixed value whatever was programmed
    stuck: BTreeMap<u32, u8>,
    absent: bool,
    reset_asserted: bool,
    programming_enabled: bool,
    frame: [u8; FRAME_SIZE],
    pos: usize,
    elapsed: Duration,
    frames: u64,
    erases: u32,
    page_writes: u32,
    fuse_writes: u32,
}

impl SimTarget {
    /// A blank part with factory fuses.
    pub fn new(chip: &Chip) -> Self {
        SimTarget {
            signature: chip.signature,
            flash: vec![ERASED_BYTE; chip.flash_size as usize],
            page_buffer: vec![ERASED_BYTE; chip.page_size as usize],
            low_fuse: chip.fuses.factory_low,
            high_fuse: chip.fuses.factory_high,
            lock_bits: 0xff,
            stuck: BTreeMap::new(),
            absent: false,
            reset_asserted: false,
            programming_enabled: false,
            frame: [0; FRAME_SIZE],
            pos: 0,
            elapsed: Duration::ZERO,
            frames: 0,
            erases: 0,
            page_writes: 0,
            fuse_writes: 0,
        }
    }

    /// Nothing connected: MISO floats high.
    pub fn absent(chip: &Chip) -> Self {
        SimTarget {
            absent: true,
            ..SimTarget::new(chip)
        }
    }

    pub fn with_signature(mut self, signature: [u8; 3]) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_fuses(mut self, low: u8, high: u8) -> Self {
        self.low_fuse = low;
        self.high_fuse = high;
        self
    }

    /// Preload flash content starting at `address`.
    pub fn with_flash(mut self, address: u32, data: &[u8]) -> Self {
        let start = address as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
        self
    }

    /// Make `address` always read back as `value`.
    pub fn with_stuck_byte(mut self, address: u32, value: u8) -> Self {
        self.stuck.insert(address, value);
        self
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn fuses(&self) -> (u8, u8, u8) {
        (self.low_fuse, self.high_fuse, self.lock_bits)
    }

    pub fn reset_asserted(&self) -> bool {
        self.reset_asserted
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn erases(&self) -> u32 {
        self.erases
    }

    pub fn page_writes(&self) -> u32 {
        self.page_writes
    }

    pub fn fuse_writes(&self) -> u32 {
        self.fuse_writes
    }

    fn read_flash(&self, address: u32) -> u8 {
        match self.stuck.get(&address) {
            Some(&value) => value,
            None => self
                .flash
                .get(address as usize)
                .copied()
                .unwrap_or(ERASED_BYTE),
        }
    }

    fn word_address(&self) -> u32 {
        u32::from(u16::from_be_bytes([self.frame[1], self.frame[2]]))
    }

    /// Fourth response byte, computed from the first three command bytes.
    fn output(&self) -> u8 {
        if !self.programming_enabled {
            return 0x00;
        }
        let [op, b, c, _] = self.frame;
        match [op, b] {
            commands::READ_LOW_FUSE => return self.low_fuse,
            commands::READ_HIGH_FUSE => return self.high_fuse,
            commands::READ_LOCK_BITS => return self.lock_bits,
            _ => (),
        }
        match op {
            commands::READ_SIGNATURE => self.signature.get(c as usize).copied().unwrap_or(0x00),
            commands::READ_FLASH_LOW => self.read_flash(self.word_address() * 2),
            commands::READ_FLASH_HIGH => self.read_flash(self.word_address() * 2 + 1),
            _ => 0x00,
        }
    }

    fn execute(&mut self) {
        self.frames += 1;
        let [op, b, c, d] = self.frame;
        if [op, b] == commands::PROGRAMMING_ENABLE {
            self.programming_enabled = true;
            return;
        }
        if !self.programming_enabled {
            return;
        }
        match [op, b] {
            commands::CHIP_ERASE => {
                self.flash.fill(ERASED_BYTE);
                self.lock_bits = 0xff;
                self.erases += 1;
                return;
            }
            commands::WRITE_LOW_FUSE => {
                self.low_fuse = d;
                self.fuse_writes += 1;
                return;
            }
            commands::WRITE_HIGH_FUSE => {
                self.high_fuse = d;
                self.fuse_writes += 1;
                return;
            }
            _ => (),
        }
        let words = self.page_buffer.len() / 2;
        match op {
            commands::LOAD_PAGE_LOW | commands::LOAD_PAGE_HIGH => {
                let slot = (c as usize % words) * 2 + (op == commands::LOAD_PAGE_HIGH) as usize;
                self.page_buffer[slot] = d;
            }
            commands::WRITE_PAGE => {
                let page_size = self.page_buffer.len();
                let base = (self.word_address() as usize * 2) / page_size * page_size;
                if let Some(page) = self.flash.get_mut(base..base + page_size) {
                    // programming can only clear bits
                    for (cell, &value) in page.iter_mut().zip(self.page_buffer.iter()) {
                        *cell &= value;
                    }
                }
                self.page_buffer.fill(ERASED_BYTE);
                self.page_writes += 1;
            }
            _ => (),
        }
    }
}

impl Transport for SimTarget {
    fn transfer_byte(&mut self, byte: u8) -> Result<u8> {
        if self.absent || !self.reset_asserted {
            return Ok(0xff);
        }
        let idx = self.pos;
        self.frame[idx] = byte;
        let out = match idx {
            0 => 0x00,
            1 => self.frame[0],
            2 => self.frame[1],
            _ => self.output(),
        };
        if idx == FRAME_SIZE - 1 {
            self.execute();
            self.pos = 0;
        } else {
            self.pos += 1;
        }
        Ok(out)
    }

    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        if !asserted {
            self.programming_enabled = false;
            self.pos = 0;
        }
        self.reset_asserted = asserted;
        Ok(())
    }

    fn delay(&mut self, duration: Duration) {
        self.elapsed += duration;
    }
}
