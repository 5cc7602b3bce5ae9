use thiserror::Error;

use crate::constants::Mode;
use crate::status::Sense;

/// Faults of the bulk transfers themselves.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("endpoint still stalled after {attempts} attempts")]
    Stalled { attempts: usize },
    #[error("bulk transfer timed out")]
    Timeout,
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("USB error: {0}")]
    Usb(rusb::Error),
}

/// The exchange completed but its envelopes don't make sense.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("status envelope has wrong signature {0:#010x}")]
    BadSignature(u32),
    #[error("status tag {received:#010x} does not match sent tag {sent:#010x}")]
    TagMismatch { sent: u32, received: u32 },
    #[error("unknown status code {0:#04x}")]
    UnknownStatus(u8),
    #[error("unknown probe mode {0:#04x}")]
    UnknownMode(u8),
    #[error("empty command block")]
    EmptyCommand,
    #[error("command block of {0} bytes does not fit the envelope")]
    CommandTooLong(usize),
    #[error("envelope encoding failed: {0}")]
    Encoding(String),
}

/// The probe answered, and the answer was no.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("command failed (sense: {sense:?})")]
    CommandFailed { sense: Option<Sense> },
    #[error("phase error")]
    PhaseError,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("expected probe in {expected:?} mode, but it reports {actual:?}")]
    UnexpectedMode { expected: Mode, actual: Mode },
    #[error("operation not allowed in SWIM state {0:?}")]
    InvalidState(crate::swim::SwimState),
    #[error("sequence step {step} ({name}) failed: {source}")]
    Sequence {
        step: usize,
        name: &'static str,
        source: Box<Error>,
    },
    #[error("device still busy after {polls} polls")]
    BusyTimeout { polls: u32 },
    #[error("device reported a transfer size of zero")]
    ZeroTransferSize,
    #[error("memory window of {0} bytes exceeds a single transfer")]
    WindowTooLarge(usize),
    #[error("sink error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusb::Error> for TransportError {
    fn from(error: rusb::Error) -> Self {
        match error {
            rusb::Error::Timeout => TransportError::Timeout,
            other => TransportError::Usb(other),
        }
    }
}

impl From<rusb::Error> for Error {
    fn from(error: rusb::Error) -> Self {
        Error::Transport(error.into())
    }
}

impl From<ssmarshal::Error> for ProtocolError {
    fn from(error: ssmarshal::Error) -> Self {
        ProtocolError::Encoding(format!("{:?}", error))
    }
}
