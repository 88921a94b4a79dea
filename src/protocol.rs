//! The serial programming instruction set of the AVR ISP interface

use std::fmt;

use anyhow::Result;
use scroll::Pwrite;

use crate::constants::{FRAME_SIZE, commands};

/// Fuse and lock bytes of the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fuse {
    Low,
    High,
    Lock,
}

impl fmt::Display for Fuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fuse::Low => write!(f, "low fuse"),
            Fuse::High => write!(f, "high fuse"),
            Fuse::Lock => write!(f, "lock bits"),
        }
    }
}

/// AVR ISP Command
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Command {
    /// Enable serial programming after reset was asserted.
    ///
    /// The target echoes the second byte back in the third response byte
    /// once it is in sync.
    ProgrammingEnable,
    /// Erase the whole flash (and the lock bits) to 0xFF
    ChipErase,
    /// Read signature byte at `index` (0..=2)
    ReadSignature { index: u8 },
    /// Read a fuse or the lock bits
    ReadFuse(Fuse),
    /// Program the low or high fuse
    WriteFuse { fuse: Fuse, value: u8 },
    /// Load one byte into the page buffer.
    ///
    /// `word_index` is the word slot inside the page, `high` selects
    /// the high byte of the word.
    LoadPage { word_index: u8, high: bool, value: u8 },
    /// Commit the page buffer to the page holding `word_address`
    WritePage { word_address: u16 },
    /// Read the low or high byte of the flash word at `word_address`
    ReadFlash { word_address: u16, high: bool },
}

impl Command {
    pub fn read_signature(index: u8) -> Self {
        Command::ReadSignature { index }
    }

    pub fn write_fuse(fuse: Fuse, value: u8) -> Self {
        Command::WriteFuse { fuse, value }
    }

    pub fn load_page(word_index: u8, high: bool, value: u8) -> Self {
        Command::LoadPage {
            word_index,
            high,
            value,
        }
    }

    pub fn write_page(word_address: u16) -> Self {
        Command::WritePage { word_address }
    }

    pub fn read_flash(word_address: u16, high: bool) -> Self {
        Command::ReadFlash { word_address, high }
    }

    pub fn into_raw(self) -> Result<[u8; FRAME_SIZE]> {
        match self {
            Command::ProgrammingEnable => {
                let [a, b] = commands::PROGRAMMING_ENABLE;
                Ok([a, b, 0x00, 0x00])
            }
            Command::ChipErase => {
                let [a, b] = commands::CHIP_ERASE;
                Ok([a, b, 0x00, 0x00])
            }
            Command::ReadSignature { index } => {
                Ok([commands::READ_SIGNATURE, 0x00, index, 0x00])
            }
            Command::ReadFuse(fuse) => {
                let [a, b] = match fuse {
                    Fuse::Low => commands::READ_LOW_FUSE,
                    Fuse::High => commands::READ_HIGH_FUSE,
                    Fuse::Lock => commands::READ_LOCK_BITS,
                };
                Ok([a, b, 0x00, 0x00])
            }
            Command::WriteFuse { fuse, value } => {
                let [a, b] = match fuse {
                    Fuse::Low => commands::WRITE_LOW_FUSE,
                    Fuse::High => commands::WRITE_HIGH_FUSE,
                    Fuse::Lock => anyhow::bail!("no write instruction for the lock bits"),
                };
                Ok([a, b, 0x00, value])
            }
            Command::LoadPage {
                word_index,
                high,
                value,
            } => {
                let op = if high {
                    commands::LOAD_PAGE_HIGH
                } else {
                    commands::LOAD_PAGE_LOW
                };
                Ok([op, 0x00, word_index, value])
            }
            Command::WritePage { word_address } => {
                // CMD, ADDR(BE), 0
                let mut buf = [commands::WRITE_PAGE, 0x00, 0x00, 0x00];
                buf.pwrite_with(word_address, 1, scroll::BE)?;
                Ok(buf)
            }
            Command::ReadFlash { word_address, high } => {
                let op = if high {
                    commands::READ_FLASH_HIGH
                } else {
                    commands::READ_FLASH_LOW
                };
                let mut buf = [op, 0x00, 0x00, 0x00];
                buf.pwrite_with(word_address, 1, scroll::BE)?;
                Ok(buf)
            }
        }
    }
}

/// The 4 bytes shifted out by the target while a command was shifted in.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Response([u8; FRAME_SIZE]);

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Response[{}]", hex::encode(self.0))
    }
}

impl Response {
    pub fn from_raw(raw: [u8; FRAME_SIZE]) -> Self {
        Response(raw)
    }

    pub fn raw(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }

    /// Third response byte, the echo of the second command byte
    pub fn echo(&self) -> u8 {
        self.0[2]
    }

    /// Fourth response byte, the result of read instructions
    pub fn data(&self) -> u8 {
        self.0[3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_match_instruction_set() {
        let cases = [
            (Command::ProgrammingEnable, [0xac, 0x53, 0x00, 0x00]),
            (Command::ChipErase, [0xac, 0x80, 0x00, 0x00]),
            (Command::read_signature(2), [0x30, 0x00, 0x02, 0x00]),
            (Command::ReadFuse(Fuse::Low), [0x50, 0x00, 0x00, 0x00]),
            (Command::ReadFuse(Fuse::High), [0x58, 0x08, 0x00, 0x00]),
            (Command::ReadFuse(Fuse::Lock), [0x58, 0x00, 0x00, 0x00]),
            (Command::write_fuse(Fuse::Low, 0x7a), [0xac, 0xa0, 0x00, 0x7a]),
            (Command::write_fuse(Fuse::High, 0xff), [0xac, 0xa8, 0x00, 0xff]),
            (Command::load_page(15, false, 0x12), [0x40, 0x00, 0x0f, 0x12]),
            (Command::load_page(3, true, 0x34), [0x48, 0x00, 0x03, 0x34]),
            (Command::write_page(0x0190), [0x4c, 0x01, 0x90, 0x00]),
            (Command::read_flash(0x01ff, false), [0x20, 0x01, 0xff, 0x00]),
            (Command::read_flash(0x0010, true), [0x28, 0x00, 0x10, 0x00]),
        ];
        for (cmd, raw) in cases {
            assert_eq!(cmd.clone().into_raw().unwrap(), raw, "{:?}", cmd);
        }
    }

    #[test]
    fn lock_bits_have_no_write_frame() {
        assert!(Command::write_fuse(Fuse::Lock, 0xff).into_raw().is_err());
    }

    #[test]
    fn response_fields() {
        let resp = Response::from_raw([0x00, 0xac, 0x53, 0x1e]);
        assert_eq!(resp.echo(), 0x53);
        assert_eq!(resp.data(), 0x1e);
        assert_eq!(format!("{:?}", resp), "Response[00ac531e]");
    }
}
