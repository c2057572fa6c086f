//! The USB device controller: registries, bring-up, interrupt dispatch and
//! the standard device requests.

use core::any::Any;
use core::fmt;

use log::{debug, trace, warn};

use crate::usb::bus::{DeviceInterrupts, EndpointFlags, UsbBus};
use crate::usb::descriptor::DescriptorMap;
use crate::usb::endpoint::{EndpointConfig, UsbEndpoint};
use crate::usb::{
    std_request, Recipient, RequestType, SetupPacket, MAX_ENDPOINTS, MAX_ENDPOINT_NUMBER,
    MAX_INTERFACES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbError {
    DuplicateInterface(u8),
    DuplicateEndpoint(u8),
    /// The controller has no endpoint with this number.
    InvalidEndpoint(u8),
    InterfacesFull,
    EndpointsFull,
}

impl fmt::Display for UsbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbError::DuplicateInterface(n) => write!(f, "interface {} already registered", n),
            UsbError::DuplicateEndpoint(n) => write!(f, "endpoint {} already registered", n),
            UsbError::InterfacesFull => write!(f, "no free interface slot"),
            UsbError::InvalidEndpoint(n) => write!(f, "no hardware endpoint {}", n),
            UsbError::EndpointsFull => write!(f, "no free endpoint slot"),
        }
    }
}

/// A USB interface: owns its endpoints and answers requests addressed to
/// its interface number.
pub trait UsbInterface<B: UsbBus>: Send {
    fn number(&self) -> u8;

    /// Endpoints registered along with the interface.
    fn endpoints(&self) -> &[UsbEndpoint];

    /// Handle a SETUP packet addressed to this interface. Returning false
    /// makes the controller stall the request.
    fn handle_setup_packet(&mut self, dev: &mut UsbDevice<B>, pkt: &SetupPacket) -> bool;

    /// Called once per USB frame (1 ms) while the device is configured.
    fn start_of_frame(&mut self, _dev: &mut UsbDevice<B>) {}

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Device-wide state shared with interfaces while they handle requests.
pub struct UsbDevice<B> {
    bus: B,
    descriptors: DescriptorMap,
    endpoint0_size: u8,
    configured: bool,
}

impl<B: UsbBus> UsbDevice<B> {
    fn new(bus: B) -> Self {
        Self {
            bus,
            descriptors: DescriptorMap::empty(),
            endpoint0_size: 32,
            configured: false,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Whether the host has selected a configuration.
    pub fn configured(&self) -> bool {
        self.configured
    }

    pub fn endpoint0_size(&self) -> u8 {
        self.endpoint0_size
    }

    pub fn descriptors(&self) -> &DescriptorMap {
        &self.descriptors
    }

    /// Hand the filled IN bank of the selected endpoint to the controller.
    pub fn send_in(&mut self) {
        self.bus.clear_flags(EndpointFlags::TX_READY);
    }

    /// Release the OUT bank of the selected endpoint.
    pub fn ack_out(&mut self) {
        self.bus.clear_flags(EndpointFlags::RX_OUT);
    }

    /// Spin until the IN bank can take a new packet.
    pub fn wait_for_tx_ready(&mut self) {
        while !self.bus.flags().contains(EndpointFlags::TX_READY) {}
    }

    /// Like [`UsbDevice::wait_for_tx_ready`], but gives up (returning
    /// false) if the host sends an OUT packet first, which ends a
    /// multi-packet IN transfer early.
    pub fn wait_for_tx_transfer(&mut self) -> bool {
        loop {
            let flags = self.bus.flags();
            if flags.contains(EndpointFlags::RX_OUT) {
                return false;
            }
            if flags.contains(EndpointFlags::TX_READY) {
                return true;
            }
        }
    }

    /// Spin until an OUT packet is waiting in the bank.
    pub fn wait_for_out_packet(&mut self) {
        while !self.bus.flags().contains(EndpointFlags::RX_OUT) {}
    }

    /// Stall the current control request.
    pub fn stall(&mut self) {
        self.bus.select_endpoint(0);
        self.bus.stall();
    }

    /// Send `len` bytes on endpoint 0, split into endpoint-0 sized
    /// packets. Returns false if the host aborted the transfer.
    pub fn send_control_in(&mut self, len: usize, mut byte_at: impl FnMut(usize) -> u8) -> bool {
        self.bus.select_endpoint(0);
        let packet_size = self.endpoint0_size as usize;
        let mut sent = 0;
        while sent < len {
            if !self.wait_for_tx_transfer() {
                debug!("control IN aborted after {} bytes", sent);
                return false;
            }
            let end = core::cmp::min(sent + packet_size, len);
            for i in sent..end {
                self.bus.write_byte(byte_at(i));
            }
            sent = end;
            self.send_in();
        }
        true
    }

    /// Answer `GET_DESCRIPTOR` from the descriptor table; unknown
    /// descriptors are stalled.
    pub fn handle_get_descriptor(&mut self, pkt: &SetupPacket) {
        let Some(data) = self.descriptors.find(pkt.w_value, pkt.w_index) else {
            debug!(
                "no descriptor for wValue={:#06x} wIndex={:#06x}",
                pkt.w_value, pkt.w_index
            );
            self.stall();
            return;
        };
        let len = core::cmp::min(pkt.w_length as usize, data.len());
        self.send_control_in(len, |i| data[i]);
    }
}

/// The device controller. Exactly one exists; interrupt handlers and the
/// main loop reach it through a critical section.
pub struct UsbController<'a, B: UsbBus> {
    device: UsbDevice<B>,
    interfaces: [Option<&'a mut dyn UsbInterface<B>>; MAX_INTERFACES],
    endpoints: [Option<UsbEndpoint>; MAX_ENDPOINTS],
}

impl<'a, B: UsbBus> UsbController<'a, B> {
    pub fn new(bus: B) -> Self {
        Self {
            device: UsbDevice::new(bus),
            interfaces: core::array::from_fn(|_| None),
            endpoints: [None; MAX_ENDPOINTS],
        }
    }

    /// Register an interface and its endpoints. Fails without touching
    /// either registry on a duplicate number or when out of slots.
    pub fn add_interface(&mut self, iface: &'a mut dyn UsbInterface<B>) -> Result<(), UsbError> {
        let number = iface.number();
        let mut free = None;
        for (slot, entry) in self.interfaces.iter().enumerate() {
            match entry {
                None if free.is_none() => free = Some(slot),
                Some(existing) if existing.number() == number => {
                    return Err(UsbError::DuplicateInterface(number));
                }
                _ => {}
            }
        }
        let slot = free.ok_or(UsbError::InterfacesFull)?;

        let endpoints = iface.endpoints();
        self.check_endpoints(endpoints)?;
        for &endpoint in endpoints {
            self.add_endpoint(endpoint)?;
        }
        self.interfaces[slot] = Some(iface);
        debug!("registered interface {}", number);
        Ok(())
    }

    /// Register a standalone endpoint.
    pub fn add_endpoint(&mut self, endpoint: UsbEndpoint) -> Result<(), UsbError> {
        self.check_endpoints(core::slice::from_ref(&endpoint))?;
        let slot = self
            .endpoints
            .iter()
            .position(Option::is_none)
            .ok_or(UsbError::EndpointsFull)?;
        self.endpoints[slot] = Some(endpoint);
        Ok(())
    }

    fn check_endpoints(&self, new: &[UsbEndpoint]) -> Result<(), UsbError> {
        for (i, endpoint) in new.iter().enumerate() {
            let number = endpoint.number();
            if number > MAX_ENDPOINT_NUMBER {
                return Err(UsbError::InvalidEndpoint(number));
            }
            let registered = self.endpoints.iter().flatten().any(|e| e.number() == number);
            let repeated = new[..i].iter().any(|e| e.number() == number);
            if registered || repeated {
                return Err(UsbError::DuplicateEndpoint(number));
            }
        }
        let free = self.endpoints.iter().filter(|e| e.is_none()).count();
        if new.len() > free {
            return Err(UsbError::EndpointsFull);
        }
        Ok(())
    }

    /// Bring up the controller and attach to the bus. Interrupts stay
    /// masked for the whole sequence.
    pub fn init(&mut self, endpoint0_size: u8, descriptors: DescriptorMap) {
        critical_section::with(|_| {
            let dev = &mut self.device;
            dev.endpoint0_size = endpoint0_size;
            dev.descriptors = descriptors;

            dev.bus.enable_controller();
            dev.bus.enable_pll();
            while !dev.bus.pll_locked() {}
            dev.bus.attach();
            dev.configured = false;
            dev.bus
                .enable_interrupts(DeviceInterrupts::END_OF_RESET | DeviceInterrupts::START_OF_FRAME);
        });
        debug!("usb attached, ep0 size {}", endpoint0_size);
    }

    pub fn configured(&self) -> bool {
        self.device.configured
    }

    pub fn device(&self) -> &UsbDevice<B> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut UsbDevice<B> {
        &mut self.device
    }

    /// Borrow a registered interface as its concrete type, together with
    /// the device state it needs to transmit.
    pub fn interface_mut<T: Any>(&mut self, number: u8) -> Option<(&mut T, &mut UsbDevice<B>)> {
        let iface = self
            .interfaces
            .iter_mut()
            .flatten()
            .find(|iface| iface.number() == number)?;
        let iface = iface.as_any_mut().downcast_mut::<T>()?;
        Some((iface, &mut self.device))
    }

    /// Bus reset and start-of-frame handling (the general USB vector).
    pub fn general_interrupt(&mut self) {
        let interrupts = self.device.bus.take_interrupts();

        if interrupts.contains(DeviceInterrupts::END_OF_RESET) {
            debug!("bus reset");
            let bus = &mut self.device.bus;
            bus.select_endpoint(0);
            bus.configure_endpoint(&EndpointConfig::control(self.device.endpoint0_size));
            bus.enable_setup_interrupt();
            self.device.configured = false;
        }

        if interrupts.contains(DeviceInterrupts::START_OF_FRAME) && self.device.configured {
            for iface in self.interfaces.iter_mut().flatten() {
                iface.start_of_frame(&mut self.device);
            }
        }
    }

    /// Endpoint 0 activity (the communication USB vector).
    pub fn endpoint_interrupt(&mut self) {
        self.device.bus.select_endpoint(0);
        let flags = self.device.bus.flags();
        if flags.contains(EndpointFlags::RX_SETUP) {
            self.process_setup_packet();
            return;
        }

        warn!("unhandled endpoint interrupt: flags={:#04x}", flags.bits());
        self.device.stall();
    }

    fn process_setup_packet(&mut self) {
        let mut raw = [0u8; 8];
        for byte in raw.iter_mut() {
            *byte = self.device.bus.read_byte();
        }
        let pkt = SetupPacket::parse(&raw);
        self.device
            .bus
            .clear_flags(EndpointFlags::RX_SETUP | EndpointFlags::RX_OUT);

        trace!(
            "SETUP bmRequestType={:#04x} bRequest={:#04x} wValue={:#06x} wIndex={:#06x} wLength={}",
            pkt.bm_request_type,
            pkt.b_request,
            pkt.w_value,
            pkt.w_index,
            pkt.w_length
        );

        let handled = match pkt.recipient() {
            Recipient::Device => self.process_device_request(&pkt),
            Recipient::Interface => {
                let number = (pkt.w_index & 0xFF) as u8;
                match self
                    .interfaces
                    .iter_mut()
                    .flatten()
                    .find(|iface| iface.number() == number)
                {
                    Some(iface) => iface.handle_setup_packet(&mut self.device, &pkt),
                    None => false,
                }
            }
            Recipient::Endpoint => {
                let number = (pkt.w_index & 0x0F) as u8;
                match self.endpoints.iter().flatten().find(|e| e.number() == number) {
                    Some(endpoint) => endpoint.handle_setup_packet(&mut self.device, &pkt),
                    None => false,
                }
            }
            _ => false,
        };

        if !handled {
            warn!(
                "unhandled SETUP: bmRequestType={:#04x} bRequest={:#04x} wValue={:#06x} wIndex={:#06x} wLength={}",
                pkt.bm_request_type,
                pkt.b_request,
                pkt.w_value,
                pkt.w_index,
                pkt.w_length
            );
            self.device.stall();
        }
    }

    fn process_device_request(&mut self, pkt: &SetupPacket) -> bool {
        if pkt.request_type() != RequestType::Standard {
            return false;
        }

        let dev = &mut self.device;
        match pkt.b_request {
            std_request::GET_DESCRIPTOR => {
                dev.handle_get_descriptor(pkt);
                true
            }
            std_request::SET_ADDRESS => {
                // Status stage first; the new address applies afterwards.
                dev.send_in();
                dev.wait_for_tx_ready();
                dev.bus.set_address((pkt.w_value & 0x7F) as u8);
                true
            }
            std_request::SET_CONFIGURATION => {
                dev.configured = pkt.w_value != 0;
                dev.send_in();
                let mut mask = 0u8;
                for endpoint in self.endpoints.iter().flatten() {
                    endpoint.configure(&mut dev.bus);
                    mask |= 1 << endpoint.number();
                }
                dev.bus.select_endpoint(0);
                dev.bus.reset_endpoints(mask);
                debug!("configuration {}", pkt.w_value);
                true
            }
            std_request::GET_CONFIGURATION => {
                dev.wait_for_tx_ready();
                dev.bus.write_byte(dev.configured as u8);
                dev.send_in();
                true
            }
            std_request::GET_STATUS => {
                dev.wait_for_tx_ready();
                dev.bus.write_byte(0);
                dev.bus.write_byte(0);
                dev.send_in();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pkt, setup, MockBus};
    use crate::usb::descriptor::UsbDescriptor;
    use crate::usb::endpoint::Banks;
    use crate::usb::keyboard::{KeyboardIface, NoLeds};

    static DEVICE: [u8; 18] = [
        18, 1, 0x00, 0x02, 0, 0, 0, 32, 0xC0, 0x16, 0xF1, 0x03, 0x00, 0x01, 1, 2, 0, 1,
    ];
    static CONFIG: [u8; 70] = [0x5A; 70];
    static TABLE: [UsbDescriptor; 2] = [
        UsbDescriptor::new(0x0100, 0, &DEVICE),
        UsbDescriptor::new(0x0200, 0, &CONFIG),
    ];

    /// Records what the controller routes to it.
    struct Probe {
        number: u8,
        endpoints: Vec<UsbEndpoint>,
        frames: usize,
        requests: Vec<u8>,
    }

    impl Probe {
        fn new(number: u8, endpoints: &[u8]) -> Self {
            Self {
                number,
                endpoints: endpoints
                    .iter()
                    .map(|&n| UsbEndpoint::new(n, EndpointConfig::interrupt_in(16, Banks::Single)))
                    .collect(),
                frames: 0,
                requests: Vec::new(),
            }
        }
    }

    impl UsbInterface<MockBus> for Probe {
        fn number(&self) -> u8 {
            self.number
        }

        fn endpoints(&self) -> &[UsbEndpoint] {
            &self.endpoints
        }

        fn handle_setup_packet(&mut self, dev: &mut UsbDevice<MockBus>, pkt: &SetupPacket) -> bool {
            self.requests.push(pkt.b_request);
            if pkt.b_request == 0x42 {
                dev.send_in();
                return true;
            }
            false
        }

        fn start_of_frame(&mut self, _dev: &mut UsbDevice<MockBus>) {
            self.frames += 1;
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn controller<'a>() -> UsbController<'a, MockBus> {
        let mut ctrl = UsbController::new(MockBus::new());
        ctrl.init(32, DescriptorMap::new(&TABLE));
        ctrl
    }

    fn mock<'b>(ctrl: &'b mut UsbController<'_, MockBus>) -> &'b mut MockBus {
        ctrl.device_mut().bus_mut()
    }

    #[test]
    fn test_init_attaches() {
        let mut ctrl = controller();
        assert!(!ctrl.configured());
        let bus = mock(&mut ctrl);
        assert!(bus.controller_enabled && bus.pll_enabled && bus.attached);
        assert!(bus
            .enabled_interrupts
            .contains(DeviceInterrupts::END_OF_RESET | DeviceInterrupts::START_OF_FRAME));
    }

    #[test]
    fn test_bus_reset_configures_endpoint0() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x00, std_request::SET_CONFIGURATION, 1, 0, 0));
        assert!(ctrl.configured());

        mock(&mut ctrl).raise(DeviceInterrupts::END_OF_RESET);
        ctrl.general_interrupt();

        assert!(!ctrl.configured());
        let ep0 = mock(&mut ctrl).ep(0);
        assert_eq!(ep0.config, Some(EndpointConfig::control(32)));
        assert!(ep0.setup_irq);
    }

    #[test]
    fn test_duplicate_registration_changes_nothing() {
        let mut first = Probe::new(0, &[3]);
        let mut same_number = Probe::new(0, &[4]);
        let mut same_endpoint = Probe::new(1, &[5, 3]);
        let mut ok = Probe::new(1, &[4, 5]);
        let mut ctrl = controller();

        assert_eq!(ctrl.add_interface(&mut first), Ok(()));
        assert_eq!(
            ctrl.add_interface(&mut same_number),
            Err(UsbError::DuplicateInterface(0))
        );
        assert_eq!(
            ctrl.add_interface(&mut same_endpoint),
            Err(UsbError::DuplicateEndpoint(3))
        );
        // Neither failure left endpoint 4 or 5 (or interface 1) behind.
        assert!(ctrl.interface_mut::<Probe>(1).is_none());
        assert_eq!(ctrl.add_interface(&mut ok), Ok(()));
        assert_eq!(
            ctrl.add_endpoint(UsbEndpoint::new(5, EndpointConfig::control(8))),
            Err(UsbError::DuplicateEndpoint(5))
        );
    }

    #[test]
    fn test_registry_capacity() {
        let mut probes: Vec<Probe> = (0..5).map(|n| Probe::new(n, &[])).collect();
        let mut greedy = Probe::new(9, &[6]);
        let mut ctrl = controller();

        let (last, first_four) = probes.split_last_mut().unwrap();
        for probe in first_four {
            assert_eq!(ctrl.add_interface(probe), Ok(()));
        }
        assert_eq!(ctrl.add_interface(last), Err(UsbError::InterfacesFull));

        for n in 1..=6 {
            assert_eq!(ctrl.add_endpoint(UsbEndpoint::new(n, EndpointConfig::control(8))), Ok(()));
        }
        assert_eq!(
            ctrl.add_endpoint(UsbEndpoint::new(0, EndpointConfig::control(8))),
            Err(UsbError::EndpointsFull)
        );
        assert_eq!(ctrl.add_interface(&mut greedy), Err(UsbError::InterfacesFull));
    }

    #[test]
    fn test_interface_endpoints_need_free_slots() {
        let mut probe = Probe::new(0, &[5, 6]);
        let mut two = Probe::new(1, &[0, 6]);
        let mut ctrl = controller();
        for n in 1..=5 {
            ctrl.add_endpoint(UsbEndpoint::new(n, EndpointConfig::control(8)))
                .unwrap();
        }
        assert_eq!(ctrl.add_interface(&mut probe), Err(UsbError::DuplicateEndpoint(5)));

        assert_eq!(ctrl.add_interface(&mut two), Err(UsbError::EndpointsFull));
        assert!(ctrl.interface_mut::<Probe>(0).is_none());
        assert!(ctrl.interface_mut::<Probe>(1).is_none());
        // The last slot is still free.
        assert_eq!(ctrl.add_endpoint(UsbEndpoint::new(6, EndpointConfig::control(8))), Ok(()));
    }

    #[test]
    fn test_endpoint_numbers_beyond_hardware_rejected() {
        let mut probe = Probe::new(0, &[2, 9]);
        let mut ctrl = controller();
        for n in [7, 8, 15] {
            assert_eq!(
                ctrl.add_endpoint(UsbEndpoint::new(n, EndpointConfig::control(8))),
                Err(UsbError::InvalidEndpoint(n))
            );
        }
        assert_eq!(ctrl.add_interface(&mut probe), Err(UsbError::InvalidEndpoint(9)));
        assert!(ctrl.interface_mut::<Probe>(0).is_none());
        // Endpoint 2 was not registered along the way.
        assert_eq!(ctrl.add_endpoint(UsbEndpoint::new(2, EndpointConfig::control(8))), Ok(()));

        // The configuration reset mask still covers the highest endpoint.
        ctrl.add_endpoint(UsbEndpoint::new(6, EndpointConfig::control(8)))
            .unwrap();
        setup(&mut ctrl, pkt(0x00, std_request::SET_CONFIGURATION, 1, 0, 0));
        assert!(ctrl.configured());
        assert_eq!(mock(&mut ctrl).resets.last(), Some(&0b0100_0100));
    }

    #[test]
    fn test_get_descriptor_in_packets() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x80, std_request::GET_DESCRIPTOR, 0x0200, 0, 0xFF));
        let sent = mock(&mut ctrl).take_sent(0);
        let lens: Vec<usize> = sent.iter().map(Vec::len).collect();
        assert_eq!(lens, [32, 32, 6]);
        assert_eq!(sent.concat(), CONFIG);
        assert!(!mock(&mut ctrl).ep(0).stalled);
    }

    #[test]
    fn test_get_descriptor_capped_by_length() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x80, std_request::GET_DESCRIPTOR, 0x0100, 0, 8));
        assert_eq!(mock(&mut ctrl).take_sent(0), [DEVICE[..8].to_vec()]);

        setup(&mut ctrl, pkt(0x80, std_request::GET_DESCRIPTOR, 0x0200, 0, 40));
        let lens: Vec<usize> = mock(&mut ctrl).take_sent(0).iter().map(Vec::len).collect();
        assert_eq!(lens, [32, 8]);
    }

    #[test]
    fn test_get_descriptor_aborted_by_host() {
        let mut ctrl = controller();
        mock(&mut ctrl).abort_after_in_packets(1);
        setup(&mut ctrl, pkt(0x80, std_request::GET_DESCRIPTOR, 0x0200, 0, 0xFF));
        let bus = mock(&mut ctrl);
        assert_eq!(bus.take_sent(0).len(), 1);
        assert!(!bus.ep(0).stalled);
    }

    #[test]
    fn test_missing_descriptor_stalls() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x80, std_request::GET_DESCRIPTOR, 0x0300, 0, 0xFF));
        let bus = mock(&mut ctrl);
        assert!(bus.ep(0).stalled);
        assert!(bus.ep(0).sent.is_empty());
    }

    #[test]
    fn test_set_address() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x00, std_request::SET_ADDRESS, 0x95, 0, 0));
        let bus = mock(&mut ctrl);
        assert_eq!(bus.address, Some(0x15));
        assert_eq!(bus.take_sent(0), [Vec::<u8>::new()]);
    }

    #[test]
    fn test_set_configuration() {
        let mut kbd = KeyboardIface::new(0, 3, NoLeds);
        let mut ctrl = controller();
        ctrl.add_interface(&mut kbd).unwrap();
        ctrl.add_endpoint(UsbEndpoint::new(1, EndpointConfig::interrupt_in(16, Banks::Single)))
            .unwrap();

        setup(&mut ctrl, pkt(0x00, std_request::SET_CONFIGURATION, 1, 0, 0));
        assert!(ctrl.configured());
        let bus = mock(&mut ctrl);
        assert_eq!(
            bus.ep(3).config,
            Some(EndpointConfig::interrupt_in(8, Banks::Double))
        );
        assert!(bus.ep(1).config.is_some());
        assert_eq!(bus.resets.last(), Some(&0b1010));
        assert_eq!(bus.selected(), 0);

        setup(&mut ctrl, pkt(0x80, std_request::GET_CONFIGURATION, 0, 0, 1));
        assert_eq!(mock(&mut ctrl).take_sent(0).last(), Some(&vec![1]));

        setup(&mut ctrl, pkt(0x00, std_request::SET_CONFIGURATION, 0, 0, 0));
        assert!(!ctrl.configured());
    }

    #[test]
    fn test_device_get_status() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x80, std_request::GET_STATUS, 0, 0, 2));
        assert_eq!(mock(&mut ctrl).take_sent(0), [vec![0, 0]]);
    }

    #[test]
    fn test_unsupported_device_requests_stall() {
        let mut ctrl = controller();
        setup(&mut ctrl, pkt(0x00, std_request::SET_INTERFACE, 0, 0, 0));
        assert!(mock(&mut ctrl).ep(0).stalled);

        // Class requests to the device are not ours.
        setup(&mut ctrl, pkt(0x20, std_request::SET_CONFIGURATION, 1, 0, 0));
        assert!(mock(&mut ctrl).ep(0).stalled);
        assert!(!ctrl.configured());
    }

    #[test]
    fn test_endpoint_halt_and_status() {
        let mut probe = Probe::new(0, &[3]);
        let mut ctrl = controller();
        ctrl.add_interface(&mut probe).unwrap();

        setup(&mut ctrl, pkt(0x02, std_request::SET_FEATURE, 0, 0x83, 0));
        assert!(mock(&mut ctrl).ep(3).stalled);
        assert_eq!(mock(&mut ctrl).selected(), 0);

        setup(&mut ctrl, pkt(0x82, std_request::GET_STATUS, 0, 0x83, 2));
        assert_eq!(mock(&mut ctrl).take_sent(0).last(), Some(&vec![1, 0]));

        setup(&mut ctrl, pkt(0x02, std_request::CLEAR_FEATURE, 0, 0x83, 0));
        let b = mock(&mut ctrl);
        assert!(!b.ep(3).stalled);
        assert_eq!(b.ep(3).stall_clears, 1);
        assert_eq!(b.resets.last(), Some(&(1 << 3)));

        setup(&mut ctrl, pkt(0x82, std_request::GET_STATUS, 0, 0x83, 2));
        assert_eq!(mock(&mut ctrl).take_sent(0).last(), Some(&vec![0, 0]));
    }

    #[test]
    fn test_unknown_recipient_stalls() {
        let mut probe = Probe::new(0, &[3]);
        let mut ctrl = controller();
        ctrl.add_interface(&mut probe).unwrap();

        setup(&mut ctrl, pkt(0x02, std_request::SET_FEATURE, 0, 0x84, 0));
        assert!(mock(&mut ctrl).ep(0).stalled);
        assert!(!mock(&mut ctrl).ep(4).stalled);

        setup(&mut ctrl, pkt(0x21, 0x42, 0, 7, 0));
        assert!(mock(&mut ctrl).ep(0).stalled);
    }

    #[test]
    fn test_interface_requests_routed_by_index() {
        let mut first = Probe::new(0, &[]);
        let mut second = Probe::new(2, &[]);
        let mut ctrl = controller();
        ctrl.add_interface(&mut first).unwrap();
        ctrl.add_interface(&mut second).unwrap();

        setup(&mut ctrl, pkt(0x21, 0x42, 0, 2, 0));
        assert!(!mock(&mut ctrl).ep(0).stalled);
        setup(&mut ctrl, pkt(0x21, 0x43, 0, 2, 0));
        assert!(mock(&mut ctrl).ep(0).stalled);

        assert_eq!(ctrl.interface_mut::<Probe>(2).unwrap().0.requests, [0x42, 0x43]);
        assert!(ctrl.interface_mut::<Probe>(0).unwrap().0.requests.is_empty());
    }

    #[test]
    fn test_endpoint_interrupt_without_setup_stalls() {
        let mut ctrl = controller();
        ctrl.endpoint_interrupt();
        assert!(mock(&mut ctrl).ep(0).stalled);
    }

    #[test]
    fn test_start_of_frame_needs_configuration() {
        let mut probe = Probe::new(0, &[]);
        let mut ctrl = controller();
        ctrl.add_interface(&mut probe).unwrap();

        mock(&mut ctrl).raise(DeviceInterrupts::START_OF_FRAME);
        ctrl.general_interrupt();
        assert_eq!(ctrl.interface_mut::<Probe>(0).unwrap().0.frames, 0);

        setup(&mut ctrl, pkt(0x00, std_request::SET_CONFIGURATION, 1, 0, 0));
        for _ in 0..3 {
            mock(&mut ctrl).raise(DeviceInterrupts::START_OF_FRAME);
            ctrl.general_interrupt();
        }
        // No interrupt pending: nothing happens.
        ctrl.general_interrupt();
        assert_eq!(ctrl.interface_mut::<Probe>(0).unwrap().0.frames, 3);
    }

    #[test]
    fn test_interface_mut_checks_type() {
        let mut probe = Probe::new(0, &[]);
        let mut ctrl = controller();
        ctrl.add_interface(&mut probe).unwrap();
        assert!(ctrl.interface_mut::<Probe>(0).is_some());
        assert!(ctrl.interface_mut::<KeyboardIface<NoLeds>>(0).is_none());
        assert!(ctrl.interface_mut::<Probe>(1).is_none());
    }
}
