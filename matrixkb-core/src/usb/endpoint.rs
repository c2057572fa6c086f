//! Endpoint configuration and the generic endpoint-recipient requests.

use log::debug;

use crate::usb::bus::UsbBus;
use crate::usb::controller::UsbDevice;
use crate::usb::{std_request, SetupPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Banks {
    Single,
    Double,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointConfig {
    pub kind: EndpointType,
    pub direction: Direction,
    /// Bank size in bytes; the hardware rounds up to a power of two.
    pub size: u8,
    pub banks: Banks,
}

impl EndpointConfig {
    pub const fn control(size: u8) -> Self {
        Self {
            kind: EndpointType::Control,
            direction: Direction::Out,
            size,
            banks: Banks::Single,
        }
    }

    pub const fn interrupt_in(size: u8, banks: Banks) -> Self {
        Self {
            kind: EndpointType::Interrupt,
            direction: Direction::In,
            size,
            banks,
        }
    }

    /// EPSIZE field encoding: 8 bytes => 0, 16 => 1, ... 256 => 5.
    pub const fn size_code(&self) -> u8 {
        match self.size {
            0..=8 => 0,
            9..=16 => 1,
            17..=32 => 2,
            33..=64 => 3,
            65..=128 => 4,
            _ => 5,
        }
    }
}

/// A registered hardware endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbEndpoint {
    number: u8,
    config: EndpointConfig,
}

impl UsbEndpoint {
    pub const fn new(number: u8, config: EndpointConfig) -> Self {
        Self { number, config }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Enable and allocate the endpoint. Leaves it selected.
    pub fn configure<B: UsbBus>(&self, bus: &mut B) {
        bus.select_endpoint(self.number);
        bus.configure_endpoint(&self.config);
    }

    /// Handle a request addressed to this endpoint (halt feature and
    /// status). Runs with endpoint 0 selected and leaves it selected.
    pub fn handle_setup_packet<B: UsbBus>(&self, dev: &mut UsbDevice<B>, pkt: &SetupPacket) -> bool {
        match pkt.b_request {
            std_request::CLEAR_FEATURE | std_request::SET_FEATURE if pkt.w_value == 0 => {
                dev.send_in();
                let bus = dev.bus_mut();
                bus.select_endpoint(self.number);
                if pkt.b_request == std_request::SET_FEATURE {
                    debug!("halt endpoint {}", self.number);
                    bus.stall();
                } else {
                    debug!("clear halt on endpoint {}", self.number);
                    bus.clear_stall();
                    bus.reset_endpoints(1 << self.number);
                }
                bus.select_endpoint(0);
                true
            }
            std_request::GET_STATUS => {
                dev.wait_for_tx_ready();
                let bus = dev.bus_mut();
                bus.select_endpoint(self.number);
                let stalled = bus.is_stalled();
                bus.select_endpoint(0);
                bus.write_byte(stalled as u8);
                bus.write_byte(0);
                dev.send_in();
                true
            }
            _ => false,
        }
    }
}
