use crate::commands::Version;
use crate::constants::Mode;
use crate::error::Error;
use crate::stlink::STLink;
use crate::swim::TargetProfile;
use crate::transport::BulkPipe;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WireProtocol {
    Swd,
    Swim,
}

impl WireProtocol {
    pub fn mode(self) -> Mode {
        match self {
            WireProtocol::Swd => Mode::Debug,
            WireProtocol::Swim => Mode::LowPinDebug,
        }
    }
}

impl std::str::FromStr for WireProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "swd" => Ok(WireProtocol::Swd),
            "swim" => Ok(WireProtocol::Swim),
            other => Err(format!("unknown wire protocol '{}'", other)),
        }
    }
}

pub trait DebugProbe {
    type Error;

    fn get_version(&mut self) -> Result<Version, Self::Error>;

    /// Enters debug mode
    fn attach(&mut self, protocol: WireProtocol) -> Result<(), Self::Error>;

    /// Leave debug mode
    fn detach(&mut self) -> Result<(), Self::Error>;

    /// Reads target memory at `address` into `data`.
    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), Self::Error>;

    /// Writes `data` to target memory at `address`.
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Self::Error>;
}

/// Memory access goes through a complete SWIM session with the default
/// target profile, so the probe is left in mass-storage mode afterwards.
impl<P: BulkPipe> DebugProbe for STLink<P> {
    type Error = Error;

    fn get_version(&mut self) -> Result<Version, Error> {
        STLink::get_version(self)
    }

    fn attach(&mut self, protocol: WireProtocol) -> Result<(), Error> {
        self.connect(protocol.mode()).map(|_| ())
    }

    fn detach(&mut self) -> Result<(), Error> {
        match self.get_current_mode()? {
            Mode::Debug => self.exit_debug_mode(),
            Mode::LowPinDebug => self.swim_exit(),
            Mode::Bootloader | Mode::MassStorage => Ok(()),
        }
    }

    fn read_memory(&mut self, address: u32, data: &mut [u8]) -> Result<(), Error> {
        self.swim_session(&TargetProfile::default(), |swim| {
            let len = data.len() as u32;
            let mut sink = std::io::Cursor::new(&mut data[..]);
            swim.read_range(address, len, &mut sink)
        })
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<(), Error> {
        self.swim_session(&TargetProfile::default(), |swim| swim.write_range(address, data))
    }
}
