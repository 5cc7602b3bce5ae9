//! Bulk-Only Transport envelopes.
//!
//! Both envelopes are packed little-endian structures. `ssmarshal` writes
//! integers little-endian at their natural width and arrays without a length
//! prefix, so serializing the structs field by field yields the exact wire
//! layout.

use serde::{Deserialize, Serialize};

use crate::constants::{CBW_LEN, CBW_SIGNATURE, CMD_LEN, CSW_LEN, CSW_SIGNATURE};
use crate::error::ProtocolError;

/// Command Block Wrapper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub signature: u32,
    pub tag: u32,
    pub transfer_length: u32,
    pub flags: u8,
    pub lun: u8,
    pub command_length: u8,
    pub command: [u8; CMD_LEN],
}

impl CommandEnvelope {
    pub fn new(tag: u32, command: &[u8], transfer_length: u32, flags: u8) -> Result<Self, ProtocolError> {
        if command.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        if command.len() > CMD_LEN {
            return Err(ProtocolError::CommandTooLong(command.len()));
        }
        let mut block = [0; CMD_LEN];
        block[..command.len()].copy_from_slice(command);
        Ok(Self {
            signature: CBW_SIGNATURE,
            tag,
            transfer_length,
            flags,
            lun: 0,
            command_length: command.len() as u8,
            command: block,
        })
    }

    /// The meaningful part of the command block.
    pub fn command(&self) -> &[u8] {
        let len = (self.command_length as usize).min(CMD_LEN);
        &self.command[..len]
    }

    pub fn encode(&self) -> Result<[u8; CBW_LEN], ProtocolError> {
        let mut buf = [0; CBW_LEN];
        ssmarshal::serialize(&mut buf, self)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (envelope, _) = ssmarshal::deserialize::<Self>(bytes)?;
        Ok(envelope)
    }
}

/// Command Status Wrapper.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub signature: u32,
    pub tag: u32,
    pub residue: u32,
    pub status: u8,
}

impl StatusEnvelope {
    pub fn new(tag: u32, residue: u32, status: u8) -> Self {
        Self {
            signature: CSW_SIGNATURE,
            tag,
            residue,
            status,
        }
    }

    pub fn encode(&self) -> Result<[u8; CSW_LEN], ProtocolError> {
        let mut buf = [0; CSW_LEN];
        ssmarshal::serialize(&mut buf, self)?;
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (envelope, _) = ssmarshal::deserialize::<Self>(bytes)?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_MODE_CBW: [u8; CBW_LEN] = [
        0x55, 0x53, 0x42, 0x43, // "USBC"
        0x2a, 0x00, 0x00, 0x00, // tag 42
        0x02, 0x00, 0x00, 0x00, // two bytes expected
        0x80, 0x00, 0x0a, // device-to-host, LUN 0, 10 byte block
        0xf5, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00,
    ];

    const PASSED_CSW: [u8; CSW_LEN] = [
        0x55, 0x53, 0x42, 0x53, // "USBS"
        0x78, 0x56, 0x34, 0x12, // tag
        0x04, 0x01, 0x00, 0x00, // residue 0x104
        0x00,
    ];

    #[test]
    fn command_envelope_matches_fixture() {
        let mut command = [0u8; 10];
        command[0] = 0xf5;
        let cbw = CommandEnvelope::new(42, &command, 2, 0x80).unwrap();
        assert_eq!(cbw.encode().unwrap(), GET_MODE_CBW);
        assert_eq!(CommandEnvelope::decode(&GET_MODE_CBW).unwrap(), cbw);
        assert_eq!(cbw.command(), &command[..]);
    }

    #[test]
    fn status_envelope_matches_fixture() {
        let csw = StatusEnvelope::decode(&PASSED_CSW).unwrap();
        assert_eq!(csw.signature, CSW_SIGNATURE);
        assert_eq!(csw.tag, 0x1234_5678);
        assert_eq!(csw.residue, 0x104);
        assert_eq!(csw.status, 0);
        assert_eq!(csw.encode().unwrap(), PASSED_CSW);
    }

    #[test]
    fn oversized_command_is_rejected() {
        let command = [0u8; CMD_LEN + 1];
        assert!(matches!(
            CommandEnvelope::new(1, &command, 0, 0x80),
            Err(ProtocolError::CommandTooLong(17))
        ));
        assert!(matches!(
            CommandEnvelope::new(1, &[], 0, 0x80),
            Err(ProtocolError::EmptyCommand)
        ));
    }
}
