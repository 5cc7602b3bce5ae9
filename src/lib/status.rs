//! Status envelope validation and REQUEST SENSE recovery.

use std::convert::TryFrom;

use crate::config::TagPolicy;
use crate::constants::{commands, Status, CSW_SIGNATURE, DIRECTION_IN};
use crate::envelope::StatusEnvelope;
use crate::error::{DeviceError, Error, ProtocolError};
use crate::transport::{BulkPipe, Transport};

/// Fixed-format sense data (key, code, qualifier).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Sense {
    pub response_code: u8,
    pub key: u8,
    pub asc: u8,
    pub ascq: u8,
}

impl Sense {
    /// Decodes an 18 byte REQUEST SENSE response. Only the fixed formats
    /// (0x70 current, 0x71 deferred) carry a KCQ triple.
    pub fn decode(data: &[u8]) -> Option<Sense> {
        if data.len() < commands::REQUEST_SENSE_LENGTH as usize {
            return None;
        }
        match data[0] & 0x7f {
            code @ 0x70 | code @ 0x71 => Some(Sense {
                response_code: code,
                key: data[2] & 0x0f,
                asc: data[12],
                ascq: data[13],
            }),
            _ => None,
        }
    }
}

/// Checks a received status envelope against the command that was sent.
pub fn validate<P: BulkPipe>(
    transport: &mut Transport<P>,
    status: &StatusEnvelope,
    sent_tag: u32,
) -> Result<(), Error> {
    if status.signature != CSW_SIGNATURE {
        log::error!("received wrong signature: {:#010x}", status.signature);
        return Err(ProtocolError::BadSignature(status.signature).into());
    }

    if status.tag != sent_tag {
        match transport.config().tag_policy {
            TagPolicy::Lenient => log::warn!(
                "received tag {:#010x} but expected {:#010x}",
                status.tag,
                sent_tag
            ),
            TagPolicy::Strict => {
                return Err(ProtocolError::TagMismatch {
                    sent: sent_tag,
                    received: status.tag,
                }
                .into())
            }
        }
    }

    match Status::try_from(status.status)? {
        Status::Passed => Ok(()),
        Status::PhaseError => {
            log::warn!("device reported a phase error");
            Err(DeviceError::PhaseError.into())
        }
        Status::Failed => {
            let sense = request_sense(transport);
            Err(DeviceError::CommandFailed { sense }.into())
        }
    }
}

/// Best effort: every failure on the way ends up as `None`.
fn request_sense<P: BulkPipe>(transport: &mut Transport<P>) -> Option<Sense> {
    let mut cdb = [0u8; 16];
    cdb[0] = commands::REQUEST_SENSE;
    cdb[4] = commands::REQUEST_SENSE_LENGTH;

    if let Err(e) = transport.send_command(&cdb, commands::REQUEST_SENSE_LENGTH as u32, DIRECTION_IN) {
        log::warn!("sending REQUEST SENSE failed: {}", e);
        return None;
    }

    let mut data = [0u8; commands::REQUEST_SENSE_LENGTH as usize];
    match transport.transfer_in(&mut data) {
        Ok(received) if received != data.len() => {
            log::warn!("REQUEST SENSE returned {} bytes", received);
        }
        Ok(_) => {}
        Err(e) => {
            log::warn!("receiving sense data failed: {}", e);
            return None;
        }
    }

    match transport.receive_status() {
        Ok(status) if status.signature != CSW_SIGNATURE => {
            log::warn!("REQUEST SENSE status has wrong signature {:#010x}", status.signature);
            return None;
        }
        Ok(status) if status.status == Status::Passed as u8 => {}
        Ok(status) => {
            log::warn!("REQUEST SENSE failed with status {:#04x}", status.status);
            return None;
        }
        Err(e) => {
            log::warn!("REQUEST SENSE status: {}", e);
            return None;
        }
    }

    let sense = Sense::decode(&data);
    match sense {
        Some(s) => log::warn!("sense KCQ: {:02X} {:02X} {:02X}", s.key, s.asc, s.ascq),
        None => log::warn!("no sense data"),
    }
    sense
}
