//! Abstract ISP link interface.
use std::time::Duration;

use anyhow::Result;

use crate::constants::FRAME_SIZE;
use crate::protocol::{Command, Response};

pub use self::bitbang::{BitBangTransport, IspPins};
#[cfg(target_os = "linux")]
pub use self::gpio::LinuxGpioPins;
pub use self::sim::SimTarget;

mod bitbang;
#[cfg(target_os = "linux")]
mod gpio;
mod sim;

/// Abstraction of the link to the target.
/// Might be bit-banged GPIO lines or a simulated device.
pub trait Transport {
    /// Exchange one byte full-duplex, MSB first.
    fn transfer_byte(&mut self, byte: u8) -> Result<u8>;

    /// Drive the target's reset line. `asserted` pulls reset low.
    fn set_reset(&mut self, asserted: bool) -> Result<()>;

    /// Block for a device-timed operation.
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }

    /// Send one command frame. A frame, once started, is always shifted out completely.
    fn transfer(&mut self, cmd: Command) -> Result<Response> {
        let req = cmd.into_raw()?;
        log::trace!("=> {}", hex::encode(req));
        let mut resp = [0u8; FRAME_SIZE];
        for (out, byte) in resp.iter_mut().zip(req) {
            *out = self.transfer_byte(byte)?;
        }
        log::trace!("<= {}", hex::encode(resp));
        Ok(Response::from_raw(resp))
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn transfer_byte(&mut self, byte: u8) -> Result<u8> {
        (**self).transfer_byte(byte)
    }

    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        (**self).set_reset(asserted)
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }

    fn transfer(&mut self, cmd: Command) -> Result<Response> {
        (**self).transfer(cmd)
    }
}
