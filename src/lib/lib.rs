//! Host side driver for the ST-Link V1 debug probe.
//!
//! The V1 probe shows up as a USB mass-storage device and tunnels its own
//! commands through Bulk-Only Transport envelopes. On top of that this crate
//! speaks the probe's SWIM protocol to read and write STM8 memory.

pub mod commands;
pub mod config;
pub mod constants;
pub mod debug_probe;
pub mod envelope;
pub mod error;
pub mod mock;
pub mod status;
pub mod stlink;
pub mod stm8;
pub mod swim;
pub mod transport;
pub mod usb_interface;

pub use crate::commands::{BusyStatus, Version};
pub use crate::config::{Config, TagPolicy};
pub use crate::constants::Mode;
pub use crate::debug_probe::{DebugProbe, WireProtocol};
pub use crate::error::{DeviceError, Error, ProtocolError, TransportError};
pub use crate::stlink::STLink;
pub use crate::swim::{Step, StepKind, Swim, SwimState, TargetProfile};
pub use crate::transport::{BulkPipe, DataPhase, TagSequence, Transport};
pub use crate::usb_interface::{get_all_plugged_devices, STLinkInfo, STLinkUSBDevice};
