//! AVR serial programming (ISP) over bit-banged GPIO lines.

pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod flash;
pub mod flashing;
pub mod format;
pub mod fuse;
pub mod image;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod transport;
mod verify;

pub use self::config::{Config, Timing};
pub use self::device::Chip;
pub use self::error::{ErrorKind, IspError};
pub use self::flashing::Flashing;
pub use self::image::MemoryImage;
pub use self::protocol::{Command, Response};
pub use self::session::{Session, SessionState};
pub use self::transport::Transport;
