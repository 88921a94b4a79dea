//! Programming mode lifecycle.
//!
//! A [`Session`] exists only while the target is held in reset with serial
//! programming enabled. It mutably borrows the transport, so a second session
//! on the same lines cannot be opened while one is alive, and it releases
//! reset when dropped, whatever path the caller leaves by.
use std::time::Duration;

use anyhow::Result;

use crate::config::Timing;
use crate::constants::PROGRAMMING_ENABLE_ECHO;
use crate::device::Chip;
use crate::error::IspError;
use crate::protocol::{Command, Response};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Entered,
    Erased,
    Programmed,
    Verified,
    Closed,
}

pub struct Session<'a, T: Transport> {
    transport: &'a mut T,
    chip: &'a Chip,
    timing: &'a Timing,
    state: SessionState,
    fuse_writes: u32,
}

fn release<T: Transport>(transport: &mut T, timing: &Timing) -> Result<()> {
    transport.set_reset(false)?;
    transport.delay(timing.reset_release());
    Ok(())
}

impl<'a, T: Transport> Session<'a, T> {
    /// Assert reset, wait for it to settle and send programming enable.
    ///
    /// Fails with [`IspError::Handshake`] when the target does not echo
    /// the programming enable byte; reset is released again before returning.
    pub fn enter(transport: &'a mut T, chip: &'a Chip, timing: &'a Timing) -> Result<Self> {
        log::debug!("Asserting reset");
        transport.set_reset(true)?;
        transport.delay(timing.reset_settle());

        let echo = match transport.transfer(Command::ProgrammingEnable) {
            Ok(resp) => resp.echo(),
            Err(e) => {
                if let Err(release_err) = release(&mut *transport, timing) {
                    log::error!("Failed to release reset: {}", release_err);
                }
                return Err(e);
            }
        };
        if echo != PROGRAMMING_ENABLE_ECHO {
            release(&mut *transport, timing)?;
            return Err(IspError::Handshake { echo }.into());
        }
        log::info!("Programming mode entered");

        Ok(Session {
            transport,
            chip,
            timing,
            state: SessionState::Entered,
            fuse_writes: 0,
        })
    }

    /// Release reset. Safe to call more than once.
    pub fn exit(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        release(&mut *self.transport, self.timing)?;
        log::debug!(
            "Programming mode left ({} fuse writes this session)",
            self.fuse_writes
        );
        Ok(())
    }

    /// Consume the session, reporting a failure to release reset.
    pub fn close(mut self) -> Result<()> {
        self.exit()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn chip(&self) -> &Chip {
        self.chip
    }

    pub fn timing(&self) -> &Timing {
        self.timing
    }

    pub fn fuse_writes(&self) -> u32 {
        self.fuse_writes
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        log::debug!("Session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub(crate) fn count_fuse_write(&mut self) {
        self.fuse_writes += 1;
    }

    pub(crate) fn command(&mut self, cmd: Command) -> Result<Response> {
        self.transport.transfer(cmd)
    }

    pub(crate) fn delay(&mut self, duration: Duration) {
        self.transport.delay(duration)
    }

    pub fn read_signature(&mut self) -> Result<[u8; 3]> {
        let mut signature = [0u8; 3];
        for (index, byte) in (0u8..).zip(signature.iter_mut()) {
            *byte = self.command(Command::read_signature(index))?.data();
        }
        log::debug!("Signature: {}", hex::encode(signature));
        Ok(signature)
    }

    /// Fails with [`IspError::SignatureMismatch`] unless the part is the expected chip.
    pub fn check_signature(&mut self) -> Result<()> {
        let actual = self.read_signature()?;
        let expected = self.chip.signature;
        if actual != expected {
            return Err(IspError::SignatureMismatch { expected, actual }.into());
        }
        log::info!("Found {}", self.chip);
        Ok(())
    }
}

impl<T: Transport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.exit() {
            log::error!("Failed to release reset: {}", e);
        }
    }
}
