//! Command block layouts and response decoders.
//!
//! Outer envelope fields are little-endian. The SWIM memory window (length and
//! address) inside the command block is big-endian.

use std::convert::TryFrom;

use crate::constants::{commands, swim, Mode};
use crate::error::{Error, ProtocolError};

/// A command block of one of the fixed lengths the probe expects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; 16],
    len: usize,
}

impl Cdb {
    fn new(len: usize, opcode: u8) -> Self {
        let mut bytes = [0; 16];
        bytes[0] = opcode;
        Self { bytes, len }
    }

    fn set(mut self, index: usize, value: u8) -> Self {
        self.bytes[index] = value;
        self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn get_version() -> Self {
        Cdb::new(6, commands::GET_VERSION)
    }

    pub fn get_current_mode() -> Self {
        Cdb::new(10, commands::GET_CURRENT_MODE)
    }

    pub fn dfu_exit() -> Self {
        Cdb::new(10, commands::DFU_COMMAND).set(1, commands::DFU_EXIT)
    }

    pub fn debug_enter_swd() -> Self {
        Cdb::new(10, commands::DEBUG_COMMAND)
            .set(1, commands::DEBUG_ENTER)
            .set(2, commands::DEBUG_ENTER_SWD)
    }

    pub fn debug_exit() -> Self {
        Cdb::new(10, commands::DEBUG_COMMAND).set(1, commands::DEBUG_EXIT)
    }

    /// A bare SWIM sub-command.
    pub fn swim(sub: u8) -> Self {
        Cdb::new(2, commands::SWIM_COMMAND).set(1, sub)
    }

    /// A SWIM sub-command with a single argument byte.
    pub fn swim_with_arg(sub: u8, arg: u8) -> Self {
        Cdb::new(3, commands::SWIM_COMMAND).set(1, sub).set(2, arg)
    }

    pub fn swim_begin_read(address: u32, len: u16) -> Self {
        let mut cdb = Cdb::swim(swim::READ_MEM);
        cdb.len = 8;
        cdb.put_window(address, len);
        cdb
    }

    /// Write command with up to the first eight payload bytes inlined.
    /// Returns the remaining bytes that have to follow as data phase.
    pub fn swim_write(address: u32, data: &[u8]) -> Result<(Self, &[u8]), Error> {
        let len = u16::try_from(data.len()).map_err(|_| Error::WindowTooLarge(data.len()))?;
        let mut cdb = Cdb::swim(swim::WRITE_MEM);
        cdb.len = 16;
        cdb.put_window(address, len);
        let inline = data.len().min(swim::WRITE_INLINE_LEN);
        cdb.bytes[8..8 + inline].copy_from_slice(&data[..inline]);
        Ok((cdb, &data[inline..]))
    }

    fn put_window(&mut self, address: u32, len: u16) {
        self.bytes[2..4].copy_from_slice(&len.to_be_bytes());
        self.bytes[4..8].copy_from_slice(&address.to_be_bytes());
    }
}

/// Firmware versions and USB identity reported by `GET_VERSION`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub stlink: u8,
    pub jtag: u8,
    pub swim: u8,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl Version {
    pub fn decode(buf: &[u8; 6]) -> Self {
        Self {
            stlink: buf[0] >> 4,
            jtag: ((buf[0] & 0x0f) << 2) | (buf[1] >> 6),
            swim: buf[1] & 0x3f,
            vendor_id: u16::from_le_bytes([buf[2], buf[3]]),
            product_id: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

pub fn decode_mode(buf: &[u8; 2]) -> Result<Mode, ProtocolError> {
    Mode::try_from(buf[0])
}

/// SWIM status word: busy flag in the low byte, operation counter above it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BusyStatus {
    pub busy: u8,
    pub counter: u32,
}

impl BusyStatus {
    pub fn decode(buf: &[u8; 4]) -> Self {
        let word = u32::from_le_bytes(*buf);
        Self {
            busy: (word & 0xff) as u8,
            counter: word >> 8,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.busy == 0
    }
}

pub fn decode_buffer_size(buf: &[u8; 2]) -> u16 {
    u16::from_le_bytes(*buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_bitfields() {
        // stlink 1, jtag 0b0011_01 = 13, swim 7, VID 0x0483, PID 0x3744
        let version = Version::decode(&[0x13, 0x47, 0x83, 0x04, 0x44, 0x37]);
        assert_eq!(
            version,
            Version {
                stlink: 1,
                jtag: 13,
                swim: 7,
                vendor_id: 0x0483,
                product_id: 0x3744,
            }
        );
    }

    #[test]
    fn busy_status_splits_flag_and_counter() {
        let status = BusyStatus::decode(&[0x01, 0x56, 0x34, 0x12]);
        assert_eq!(status.busy, 1);
        assert_eq!(status.counter, 0x12_3456);
        assert!(!status.is_idle());
        assert!(BusyStatus::decode(&[0x00, 0xff, 0xff, 0xff]).is_idle());
    }

    #[test]
    fn command_lengths() {
        assert_eq!(Cdb::get_version().as_bytes().len(), 6);
        assert_eq!(Cdb::get_current_mode().as_bytes(), &[0xf5, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(Cdb::dfu_exit().as_bytes()[..2], [0xf3, 0x07]);
        assert_eq!(Cdb::debug_enter_swd().as_bytes()[..3], [0xf2, 0x20, 0xa3]);
        assert_eq!(Cdb::swim(swim::ENTER).as_bytes(), &[0xf4, 0x00]);
        assert_eq!(Cdb::swim_with_arg(swim::SPEED, 1).as_bytes(), &[0xf4, 0x03, 0x01]);
    }

    #[test]
    fn begin_read_window_is_big_endian() {
        let cdb = Cdb::swim_begin_read(0x0000_8000, 0x0100);
        assert_eq!(cdb.as_bytes(), &[0xf4, 0x0b, 0x01, 0x00, 0x00, 0x00, 0x80, 0x00]);
    }

    #[test]
    fn write_inlines_first_eight_bytes() {
        let data: Vec<u8> = (0..12).collect();
        let (cdb, rest) = Cdb::swim_write(0x0000_7f80, &data).unwrap();
        assert_eq!(
            cdb.as_bytes(),
            &[0xf4, 0x0a, 0x00, 0x0c, 0x00, 0x00, 0x7f, 0x80, 0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert_eq!(rest, &[8, 9, 10, 11]);

        let (cdb, rest) = Cdb::swim_write(0x0000_7f80, &[0xa0]).unwrap();
        assert_eq!(&cdb.as_bytes()[2..10], &[0x00, 0x01, 0x00, 0x00, 0x7f, 0x80, 0xa0, 0x00]);
        assert!(rest.is_empty());
    }

    #[test]
    fn write_window_is_limited_to_sixteen_bits() {
        let data = vec![0u8; 0x1_0000];
        assert!(matches!(
            Cdb::swim_write(0x8000, &data),
            Err(Error::WindowTooLarge(0x1_0000))
        ));
    }
}
