//! Interrupt-driven shutdown.
//!
//! The main thread parks on an [`Interrupt`] while the server task runs. The
//! signal handler (or a test) fires the paired [`InterruptTrigger`]; repeated
//! signals collapse into one.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use anyhow::{Context, Result};

/// Receiving side: wait for the first interrupt.
#[derive(Debug)]
pub struct Interrupt {
    receiver: Receiver<()>,
}

/// Sending side: request shutdown.
#[derive(Debug, Clone)]
pub struct InterruptTrigger {
    sender: SyncSender<()>,
}

impl Interrupt {
    /// Route SIGINT (and SIGTERM) to a new interrupt.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler is already installed in this process.
    pub fn install() -> Result<Self> {
        let (trigger, interrupt) = Self::channel();
        ctrlc::set_handler(move || trigger.fire()).context("Cannot install interrupt handler")?;
        Ok(interrupt)
    }

    /// Unwired interrupt, fired by hand.
    pub fn channel() -> (InterruptTrigger, Self) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (InterruptTrigger { sender }, Self { receiver })
    }

    /// Block until interrupted.
    ///
    /// If every trigger is dropped first there is nothing left to wait for,
    /// and this returns as if interrupted.
    pub fn wait(self) {
        if self.receiver.recv().is_err() {
            log::warn!("Interrupt source went away, shutting down");
        }
    }
}

impl InterruptTrigger {
    /// Request shutdown. Extra requests are ignored.
    pub fn fire(&self) {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::debug!("Interrupt after shutdown already started");
            }
        }
    }
}
