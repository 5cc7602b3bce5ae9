use std::collections::HashMap;
use std::time::Duration;

use lazy_static::lazy_static;
use rusb::{Context, Device, DeviceHandle, Direction, Error, TransferType, UsbContext};

use crate::constants::{USB_PID_STLINK, USB_VID};
use crate::transport::BulkPipe;

/// The interface carrying the mass-storage bulk endpoints.
const INTERFACE: u8 = 0;

lazy_static! {
    /// Map of USB PID to firmware version name of the probes speaking the
    /// mass-storage envelope protocol.
    static ref USB_PID_MAP: HashMap<u16, STLinkInfo> = {
        let mut m = HashMap::new();
        m.insert(USB_PID_STLINK, STLinkInfo::new("V1", USB_PID_STLINK));
        m
    };
}

/// A helper struct to match STLink deviceinfo.
#[derive(Clone, Debug)]
pub struct STLinkInfo {
    pub version_name: String,
    pub usb_pid: u16,
}

impl STLinkInfo {
    pub fn new<V: Into<String>>(version_name: V, usb_pid: u16) -> Self {
        Self {
            version_name: version_name.into(),
            usb_pid,
        }
    }
}

/// Provides low-level USB enumeration and bulk transfers for STLink V1 devices.
pub struct STLinkUSBDevice {
    device: Device<Context>,
    device_handle: Option<DeviceHandle<Context>>,
    endpoints: Option<(u8, u8)>,
    pub info: STLinkInfo,
}

fn usb_match<T: UsbContext>(device: &Device<T>) -> bool {
    // Check the VID/PID.
    if let Ok(descriptor) = device.device_descriptor() {
        (descriptor.vendor_id() == USB_VID) && (USB_PID_MAP.contains_key(&descriptor.product_id()))
    } else {
        false
    }
}

pub fn get_all_plugged_devices(context: &Context) -> Result<Vec<STLinkUSBDevice>, Error> {
    let devices = context.devices()?;
    devices
        .iter()
        .filter(usb_match)
        .map(STLinkUSBDevice::new)
        .collect::<Result<Vec<_>, Error>>()
}

impl STLinkUSBDevice {
    pub fn new(device: Device<Context>) -> Result<Self, Error> {
        let descriptor = device.device_descriptor()?;
        let info = USB_PID_MAP
            .get(&descriptor.product_id())
            .cloned()
            .ok_or(Error::NotFound)?;
        Ok(Self {
            device,
            device_handle: None,
            endpoints: None,
            info,
        })
    }

    /// Claims the interface and looks up the bulk OUT and IN endpoints.
    pub fn open(&mut self) -> Result<(), Error> {
        let handle = self.device.open()?;

        match handle.kernel_driver_active(INTERFACE) {
            Ok(true) => {
                log::info!("kernel driver active, detaching");
                if let Err(e) = handle.detach_kernel_driver(INTERFACE) {
                    log::warn!("detaching kernel driver failed: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => log::debug!("kernel_driver_active: {}", e),
        }

        let config = self.device.active_config_descriptor()?;

        let mut endpoint_out = None;
        let mut endpoint_in = None;

        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.transfer_type() != TransferType::Bulk {
                        continue;
                    }
                    match endpoint.direction() {
                        Direction::In => endpoint_in = Some(endpoint.address()),
                        Direction::Out => endpoint_out = Some(endpoint.address()),
                    }
                }
            }
        }

        let endpoints = match (endpoint_out, endpoint_in) {
            (Some(out), Some(inp)) => (out, inp),
            _ => return Err(Error::NotFound),
        };
        log::debug!("endpoints: out {:#04x}, in {:#04x}", endpoints.0, endpoints.1);

        handle.claim_interface(INTERFACE)?;

        self.device_handle = Some(handle);
        self.endpoints = Some(endpoints);
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), Error> {
        self.device_handle
            .as_mut()
            .map_or(Err(Error::NotFound), |dh| dh.release_interface(INTERFACE))?;
        self.device_handle = None;
        self.endpoints = None;
        Ok(())
    }

    /// OUT and IN endpoint addresses found by `open`.
    pub fn endpoints(&self) -> Result<(u8, u8), Error> {
        self.endpoints.ok_or(Error::NoDevice)
    }

    fn handle(&mut self) -> Result<&mut DeviceHandle<Context>, Error> {
        self.device_handle.as_mut().ok_or(Error::NoDevice)
    }
}

impl BulkPipe for STLinkUSBDevice {
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle()?.write_bulk(endpoint, data, timeout)
    }

    fn bulk_read(&mut self, endpoint: u8, data: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        self.handle()?.read_bulk(endpoint, data, timeout)
    }

    fn clear_halt(&mut self, endpoint: u8) -> rusb::Result<()> {
        self.handle()?.clear_halt(endpoint)
    }
}
