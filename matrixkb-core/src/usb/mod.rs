//! USB device-side protocol handling.
//!
//! [`controller::UsbController`] owns the registered interfaces and
//! endpoints and runs the enumeration state machine from the two USB
//! interrupt vectors. Register access goes through [`bus::UsbBus`].

pub mod bus;
pub mod controller;
pub mod debug;
pub mod descriptor;
pub mod endpoint;
pub mod keyboard;

pub use bus::{DeviceInterrupts, EndpointFlags, UsbBus};
pub use controller::{UsbController, UsbDevice, UsbError, UsbInterface};
pub use debug::{DebugCommand, DebugCommandHandler, DebugIface, DebugLogger, LogBuffer};
pub use descriptor::{DescriptorMap, UsbDescriptor};
pub use endpoint::{Banks, Direction, EndpointConfig, EndpointType, UsbEndpoint};
pub use keyboard::{KeyboardIface, LedCallback, NoLeds};

/// Interface slots in the controller registry.
pub const MAX_INTERFACES: usize = 4;
/// Endpoint slots in the controller registry (endpoint 0 excluded).
pub const MAX_ENDPOINTS: usize = 6;
/// Highest hardware endpoint number.
pub const MAX_ENDPOINT_NUMBER: u8 = 6;

/// USB control request header (8 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

impl SetupPacket {
    /// Decode a setup packet as it arrives in the FIFO (little-endian).
    pub fn parse(bytes: &[u8; 8]) -> Self {
        Self {
            bm_request_type: bytes[0],
            b_request: bytes[1],
            w_value: u16::from_le_bytes([bytes[2], bytes[3]]),
            w_index: u16::from_le_bytes([bytes[4], bytes[5]]),
            w_length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let v = self.w_value.to_le_bytes();
        let i = self.w_index.to_le_bytes();
        let l = self.w_length.to_le_bytes();
        [self.bm_request_type, self.b_request, v[0], v[1], i[0], i[1], l[0], l[1]]
    }

    pub fn recipient(&self) -> Recipient {
        match self.bm_request_type & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            n => Recipient::Reserved(n),
        }
    }

    pub fn request_type(&self) -> RequestType {
        match self.bm_request_type & 0x60 {
            0x00 => RequestType::Standard,
            0x20 => RequestType::Class,
            0x40 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    /// True for device-to-host transfers.
    pub fn is_in(&self) -> bool {
        self.bm_request_type & 0x80 != 0
    }
}

/// Standard request codes (USB 2.0 table 9-4).
pub mod std_request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;
}

/// HID class request codes (HID 1.11 section 7.2).
pub mod hid_request {
    pub const GET_REPORT: u8 = 0x01;
    pub const GET_IDLE: u8 = 0x02;
    pub const GET_PROTOCOL: u8 = 0x03;
    pub const SET_REPORT: u8 = 0x09;
    pub const SET_IDLE: u8 = 0x0A;
    pub const SET_PROTOCOL: u8 = 0x0B;
}

/// `bmRequestType` values used by the HID interfaces.
pub mod request_type {
    /// Device-to-host, class, interface.
    pub const CLASS_IN: u8 = 0xA1;
    /// Host-to-device, class, interface.
    pub const CLASS_OUT: u8 = 0x21;
    /// Device-to-host, standard, interface.
    pub const STANDARD_INTERFACE_IN: u8 = 0x81;
}

/// Descriptor type codes, as found in the high byte of `wValue`.
pub mod descriptor_type {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const STRING: u8 = 3;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
    pub const HID: u8 = 0x21;
    pub const HID_REPORT: u8 = 0x22;
}

/// HID report types, as found in the high byte of `wValue`.
pub mod report_type {
    pub const INPUT: u8 = 1;
    pub const OUTPUT: u8 = 2;
    pub const FEATURE: u8 = 3;
}
