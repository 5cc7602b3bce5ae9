use crate::error::ProtocolError;

/// The USB VendorID of ST.
pub const USB_VID: u16 = 0x0483;

/// The USB ProductID of the mass-storage flavoured ST-Link (V1).
pub const USB_PID_STLINK: u16 = 0x3744;

/// Width of the command block field inside a command envelope.
pub const CMD_LEN: usize = 16;

pub const CBW_SIGNATURE: u32 = 0x4342_5355;
pub const CSW_SIGNATURE: u32 = 0x5342_5355;

/// Encoded size of a command envelope.
pub const CBW_LEN: usize = 31;
/// Encoded size of a status envelope.
pub const CSW_LEN: usize = 13;

/// `bmCBWFlags` value for a device-to-host data phase.
pub const DIRECTION_IN: u8 = 0x80;
/// `bmCBWFlags` value for a host-to-device data phase.
pub const DIRECTION_OUT: u8 = 0x00;

pub mod commands {
    pub const GET_VERSION: u8 = 0xf1;
    pub const DEBUG_COMMAND: u8 = 0xf2;
    pub const DFU_COMMAND: u8 = 0xf3;
    pub const SWIM_COMMAND: u8 = 0xf4;
    pub const GET_CURRENT_MODE: u8 = 0xf5;

    pub const DEBUG_ENTER: u8 = 0x20;
    pub const DEBUG_EXIT: u8 = 0x21;
    pub const DEBUG_ENTER_SWD: u8 = 0xa3;

    pub const DFU_EXIT: u8 = 0x07;

    /// SCSI REQUEST SENSE, answered by the probe's mass-storage core.
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const REQUEST_SENSE_LENGTH: u8 = 18;
}

/// SWIM sub-opcodes, carried in the second byte after `SWIM_COMMAND`.
pub mod swim {
    pub const ENTER: u8 = 0x00;
    pub const EXIT: u8 = 0x01;
    pub const READ_CAP: u8 = 0x02;
    pub const SPEED: u8 = 0x03;
    pub const ENTER_SEQ: u8 = 0x04;
    pub const GEN_RST: u8 = 0x05;
    pub const RESET: u8 = 0x06;
    pub const ASSERT_RESET: u8 = 0x07;
    pub const DEASSERT_RESET: u8 = 0x08;
    pub const READ_STATUS: u8 = 0x09;
    pub const WRITE_MEM: u8 = 0x0a;
    pub const READ_MEM: u8 = 0x0b;
    pub const READ_BUF: u8 = 0x0c;
    pub const READ_BUF_SIZE: u8 = 0x0d;

    /// Number of payload bytes that travel inside the write command block.
    pub const WRITE_INLINE_LEN: usize = 8;
}

/// Operating mode as reported by `GET_CURRENT_MODE`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Bootloader = 0x00,
    MassStorage = 0x01,
    Debug = 0x02,
    LowPinDebug = 0x03,
}

impl std::convert::TryFrom<u8> for Mode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Mode::Bootloader),
            0x01 => Ok(Mode::MassStorage),
            0x02 => Ok(Mode::Debug),
            0x03 => Ok(Mode::LowPinDebug),
            other => Err(ProtocolError::UnknownMode(other)),
        }
    }
}

/// `bCSWStatus` values.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Passed = 0x00,
    Failed = 0x01,
    PhaseError = 0x02,
}

impl std::convert::TryFrom<u8> for Status {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Status::Passed),
            0x01 => Ok(Status::Failed),
            0x02 => Ok(Status::PhaseError),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn mode_values_match_the_wire() {
        assert_eq!(Mode::try_from(0x00).unwrap(), Mode::Bootloader);
        assert_eq!(Mode::try_from(0x03).unwrap(), Mode::LowPinDebug);
        assert!(matches!(
            Mode::try_from(0x07),
            Err(ProtocolError::UnknownMode(0x07))
        ));
    }
}
