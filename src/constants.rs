
/// Every ISP exchange is a 4-byte command answered by a 4-byte response.
pub const FRAME_SIZE: usize = 4;

/// Echo expected in the third response byte of the programming-enable command.
pub const PROGRAMMING_ENABLE_ECHO: u8 = 0x53;

/// Value of erased flash.
pub const ERASED_BYTE: u8 = 0xff;

/// Bytes per data record when dumping device memory.
pub const BYTES_PER_RECORD: usize = 16;

pub mod commands {
    pub const PROGRAMMING_ENABLE: [u8; 2] = [0xac, 0x53];
    pub const CHIP_ERASE: [u8; 2] = [0xac, 0x80];
    pub const READ_SIGNATURE: u8 = 0x30;
    pub const READ_LOW_FUSE: [u8; 2] = [0x50, 0x00];
    pub const READ_HIGH_FUSE: [u8; 2] = [0x58, 0x08];
    pub const READ_LOCK_BITS: [u8; 2] = [0x58, 0x00];
    pub const WRITE_LOW_FUSE: [u8; 2] = [0xac, 0xa0];
    pub const WRITE_HIGH_FUSE: [u8; 2] = [0xac, 0xa8];
    pub const LOAD_PAGE_LOW: u8 = 0x40;
    pub const LOAD_PAGE_HIGH: u8 = 0x48;
    pub const WRITE_PAGE: u8 = 0x4c;
    pub const READ_FLASH_LOW: u8 = 0x20;
    pub const READ_FLASH_HIGH: u8 = 0x28;
}
