use crate::commands::{self, Cdb, Version};
use crate::config::Config;
use crate::constants::Mode;
use crate::error::Error;
use crate::transport::{BulkPipe, DataPhase, TagSequence, Transport};
use crate::usb_interface::STLinkUSBDevice;

/// An ST-Link V1 probe speaking the mass-storage envelope protocol.
pub struct STLink<P> {
    transport: Transport<P>,
}

impl STLink<STLinkUSBDevice> {
    /// Wraps an opened USB device.
    pub fn open(device: STLinkUSBDevice, config: Config) -> Result<Self, Error> {
        let (ep_out, ep_in) = device.endpoints()?;
        Ok(Self::new(device, ep_out, ep_in, config))
    }

    /// Releases the USB interface.
    pub fn close(self) -> Result<(), Error> {
        let mut device = self.transport.into_inner();
        device.close()?;
        Ok(())
    }
}

impl<P: BulkPipe> STLink<P> {
    pub fn new(pipe: P, ep_out: u8, ep_in: u8, config: Config) -> Self {
        Self {
            transport: Transport::new(pipe, ep_out, ep_in, config),
        }
    }

    pub fn with_tags(mut self, tags: TagSequence) -> Self {
        self.transport = self.transport.with_tags(tags);
        self
    }

    pub fn transport(&self) -> &Transport<P> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<P> {
        &mut self.transport
    }

    pub fn config(&self) -> &Config {
        self.transport.config()
    }

    pub(crate) fn exchange(&mut self, cdb: &Cdb, data: DataPhase) -> Result<(), Error> {
        self.transport.exchange(cdb.as_bytes(), data)
    }

    pub fn get_version(&mut self) -> Result<Version, Error> {
        let mut buf = [0; 6];
        self.exchange(&Cdb::get_version(), DataPhase::In(&mut buf))?;
        let version = Version::decode(&buf);
        log::debug!("version: {:02X?} -> {:?}", buf, version);
        Ok(version)
    }

    pub fn get_current_mode(&mut self) -> Result<Mode, Error> {
        let mut buf = [0; 2];
        self.exchange(&Cdb::get_current_mode(), DataPhase::In(&mut buf))?;
        log::debug!("current mode: {:02X} {:02X}", buf[0], buf[1]);
        Ok(commands::decode_mode(&buf)?)
    }

    /// Leaves the DFU bootloader. Only a fresh mode query tells whether it worked.
    pub fn exit_dfu_mode(&mut self) -> Result<(), Error> {
        log::debug!("exiting DFU mode");
        self.exchange(&Cdb::dfu_exit(), DataPhase::None)
    }

    /// Leaves DFU if the probe is still there and returns the mode it ends up in.
    /// Neither SWD nor SWIM entry is accepted by the bootloader.
    pub fn leave_dfu_mode(&mut self) -> Result<Mode, Error> {
        let mode = self.get_current_mode()?;
        log::info!("mode = {:?}", mode);
        if mode != Mode::Bootloader {
            return Ok(mode);
        }
        self.exit_dfu_mode()?;
        let mode = self.get_current_mode()?;
        log::info!("new mode = {:?}", mode);
        Ok(mode)
    }

    pub fn enter_swd_mode(&mut self) -> Result<(), Error> {
        log::debug!("entering SWD mode");
        self.exchange(&Cdb::debug_enter_swd(), DataPhase::None)
    }

    pub fn exit_debug_mode(&mut self) -> Result<(), Error> {
        log::debug!("exiting debug mode");
        self.exchange(&Cdb::debug_exit(), DataPhase::None)
    }

    /// Brings the probe from whatever mode it is in into `target`.
    ///
    /// Leaves DFU first if needed, then issues the entry command for `target`
    /// and re-queries the mode after every step.
    pub fn connect(&mut self, target: Mode) -> Result<Mode, Error> {
        let mut mode = if target == Mode::Bootloader {
            self.get_current_mode()?
        } else {
            self.leave_dfu_mode()?
        };

        if mode != target {
            match target {
                Mode::Debug => self.enter_swd_mode()?,
                Mode::LowPinDebug => self.swim_enter()?,
                Mode::Bootloader | Mode::MassStorage => {}
            }
            mode = self.get_current_mode()?;
            log::info!("new mode = {:?}", mode);
        }

        if mode != target {
            return Err(Error::UnexpectedMode {
                expected: target,
                actual: mode,
            });
        }
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProbe;

    fn probe(mock: MockProbe) -> STLink<MockProbe> {
        STLink::new(mock, MockProbe::EP_OUT, MockProbe::EP_IN, Config::default())
    }

    #[test]
    fn version_is_decoded() {
        let mut stlink = probe(MockProbe::new());
        let version = stlink.get_version().unwrap();
        assert_eq!(version.vendor_id, 0x0483);
        assert_eq!(version.product_id, 0x3744);
        assert_eq!(version.stlink, 1);
    }

    #[test]
    fn leaving_dfu_changes_the_mode() {
        let mut stlink = probe(MockProbe::new());
        assert_eq!(stlink.get_current_mode().unwrap(), Mode::Bootloader);
        stlink.exit_dfu_mode().unwrap();
        assert_ne!(stlink.get_current_mode().unwrap(), Mode::Bootloader);
    }

    #[test]
    fn leave_dfu_is_a_no_op_outside_the_bootloader() {
        let mut mock = MockProbe::new();
        mock.set_mode(Mode::Debug);
        let mut stlink = probe(mock);
        assert_eq!(stlink.leave_dfu_mode().unwrap(), Mode::Debug);
        // a single mode query, no DFU exit
        assert_eq!(stlink.transport().pipe().commands().len(), 1);
    }

    #[test]
    fn connect_to_swd() {
        let mut stlink = probe(MockProbe::new());
        assert_eq!(stlink.connect(Mode::Debug).unwrap(), Mode::Debug);
    }

    #[test]
    fn connect_reports_refused_mode_change() {
        let mut mock = MockProbe::new();
        mock.refuse_mode_changes();
        let mut stlink = probe(mock);
        assert!(matches!(
            stlink.connect(Mode::LowPinDebug),
            Err(Error::UnexpectedMode {
                expected: Mode::LowPinDebug,
                actual: Mode::Bootloader
            })
        ));
    }

    #[test]
    fn unknown_mode_byte_is_a_protocol_error() {
        let mut mock = MockProbe::new();
        mock.set_raw_mode(0x42);
        let mut stlink = probe(mock);
        assert!(matches!(
            stlink.get_current_mode(),
            Err(Error::Protocol(crate::error::ProtocolError::UnknownMode(0x42)))
        ));
    }
}
