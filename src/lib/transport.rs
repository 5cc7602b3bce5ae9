use std::time::Duration;

use crate::config::Config;
use crate::constants::{CBW_LEN, CSW_LEN, DIRECTION_IN, DIRECTION_OUT};
use crate::envelope::{CommandEnvelope, StatusEnvelope};
use crate::error::{Error, TransportError};
use crate::status;

/// The two unidirectional bulk channels of the probe.
///
/// Implemented by the claimed USB device and by `mock::MockProbe`.
pub trait BulkPipe {
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;

    fn bulk_read(&mut self, endpoint: u8, data: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    /// Clears a halt (stall) condition on the given endpoint.
    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()>;
}

impl<'a, P: BulkPipe + ?Sized> BulkPipe for &'a mut P {
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        (**self).bulk_write(endpoint, data, timeout)
    }

    fn bulk_read(&mut self, endpoint: u8, data: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        (**self).bulk_read(endpoint, data, timeout)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        (**self).clear_halt(endpoint)
    }
}

/// Command tags of one handle. Starts at 1 and skips 0 when wrapping.
#[derive(Clone, Debug)]
pub struct TagSequence {
    next: u32,
}

impl TagSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(tag: u32) -> Self {
        Self {
            next: if tag == 0 { 1 } else { tag },
        }
    }

    /// Returns the tag for the next command and moves on.
    pub fn advance(&mut self) -> u32 {
        let tag = self.next;
        self.next = match self.next.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        tag
    }

    pub fn peek(&self) -> u32 {
        self.next
    }
}

impl Default for TagSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional data phase between command and status envelope.
pub enum DataPhase<'a> {
    None,
    Out(&'a [u8]),
    In(&'a mut [u8]),
}

impl<'a> DataPhase<'a> {
    fn len(&self) -> usize {
        match self {
            DataPhase::None => 0,
            DataPhase::Out(data) => data.len(),
            DataPhase::In(data) => data.len(),
        }
    }

    fn flags(&self) -> u8 {
        match self {
            DataPhase::Out(_) => DIRECTION_OUT,
            _ => DIRECTION_IN,
        }
    }
}

/// Envelope transport over a claimed probe. This is the device handle: it owns
/// the pipe, both endpoint addresses and the tag sequence.
pub struct Transport<P> {
    pipe: P,
    ep_out: u8,
    ep_in: u8,
    tags: TagSequence,
    last_tag: u32,
    config: Config,
}

impl<P: BulkPipe> Transport<P> {
    pub fn new(pipe: P, ep_out: u8, ep_in: u8, config: Config) -> Self {
        Self {
            pipe,
            ep_out,
            ep_in,
            tags: TagSequence::new(),
            last_tag: 0,
            config,
        }
    }

    pub fn with_tags(mut self, tags: TagSequence) -> Self {
        self.tags = tags;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Tag of the most recently issued command, 0 before the first one.
    pub fn last_tag(&self) -> u32 {
        self.last_tag
    }

    pub fn pipe(&self) -> &P {
        &self.pipe
    }

    pub fn pipe_mut(&mut self) -> &mut P {
        &mut self.pipe
    }

    pub fn into_inner(self) -> P {
        self.pipe
    }

    /// Runs one complete command: envelope, optional data phase, status.
    ///
    /// A short data phase does not stop the exchange; the status is collected
    /// and validated first so a device side failure wins over the short count.
    pub fn exchange(&mut self, command: &[u8], mut data: DataPhase) -> Result<(), Error> {
        log::debug!("CDB: {:02X?}", command);
        let tag = self.send_command(command, data.len() as u32, data.flags())?;

        let mut short = None;
        let expected = data.len();
        if expected > 0 {
            let actual = match &mut data {
                DataPhase::Out(buf) => self.transfer_out(*buf)?,
                DataPhase::In(buf) => self.transfer_in(&mut **buf)?,
                DataPhase::None => 0,
            };
            if actual != expected {
                log::warn!("transferred unexpected amount: {} of {} bytes", actual, expected);
                short = Some(TransportError::ShortTransfer { expected, actual });
            }
        }

        let status = self.receive_status()?;
        status::validate(self, &status, tag)?;

        match short {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }

    /// Sends a command envelope and returns the tag it carried.
    pub(crate) fn send_command(&mut self, command: &[u8], transfer_length: u32, flags: u8) -> Result<u32, Error> {
        let tag = self.tags.advance();
        let cbw = CommandEnvelope::new(tag, command, transfer_length, flags)?.encode()?;
        let ep_out = self.ep_out;
        let written = self.retry(ep_out, |pipe, timeout| pipe.bulk_write(ep_out, &cbw, timeout))?;
        if written != CBW_LEN {
            return Err(TransportError::ShortTransfer {
                expected: CBW_LEN,
                actual: written,
            }
            .into());
        }
        self.last_tag = tag;
        Ok(tag)
    }

    pub(crate) fn transfer_out(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let ep_out = self.ep_out;
        self.retry(ep_out, |pipe, timeout| pipe.bulk_write(ep_out, data, timeout))
    }

    pub(crate) fn transfer_in(&mut self, data: &mut [u8]) -> Result<usize, TransportError> {
        let ep_in = self.ep_in;
        self.retry(ep_in, |pipe, timeout| pipe.bulk_read(ep_in, data, timeout))
    }

    pub(crate) fn receive_status(&mut self) -> Result<StatusEnvelope, Error> {
        let mut buf = [0; CSW_LEN];
        let received = self.transfer_in(&mut buf)?;
        if received != CSW_LEN {
            return Err(TransportError::ShortTransfer {
                expected: CSW_LEN,
                actual: received,
            }
            .into());
        }
        let status = StatusEnvelope::decode(&buf)?;
        log::trace!("status {} tag {:#010x} residue {:#x}", status.status, status.tag, status.residue);
        Ok(status)
    }

    /// Runs `transfer` until it does not stall, clearing the halt in between.
    fn retry<F>(&mut self, endpoint: u8, mut transfer: F) -> Result<usize, TransportError>
    where
        F: FnMut(&mut P, Duration) -> rusb::Result<usize>,
    {
        let budget = self.config.retries.max(1);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match transfer(&mut self.pipe, self.config.timeout) {
                Ok(transferred) => return Ok(transferred),
                Err(rusb::Error::Pipe) => {
                    log::debug!("endpoint {:#04x} stalled (attempt {}/{})", endpoint, attempts, budget);
                    if let Err(e) = self.pipe.clear_halt(endpoint) {
                        log::warn!("clearing halt on {:#04x} failed: {}", endpoint, e);
                    }
                    if attempts >= budget {
                        return Err(TransportError::Stalled { attempts });
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
