//! Debug HID interface: a log side channel and a remote reset hook.
//!
//! Log output is queued in a [`LogBuffer`] and drained into the interface's
//! interrupt-IN endpoint once per frame. A partial packet is padded with
//! NUL bytes and sent after [`FLUSH_TIMEOUT_FRAMES`] frames. The host can
//! ask for a reboot (into the bootloader or a plain reset) with a feature
//! `SET_REPORT`.

use core::any::Any;
use core::cell::RefCell;
use core::fmt::{self, Write as _};

use critical_section::Mutex;
use heapless::Deque;
use log::{info, LevelFilter, Log, Metadata, Record};

use crate::usb::bus::{EndpointFlags, UsbBus};
use crate::usb::controller::{UsbDevice, UsbInterface};
use crate::usb::endpoint::{Banks, EndpointConfig, UsbEndpoint};
use crate::usb::{hid_request, report_type, request_type, std_request, SetupPacket};
use crate::{DEBUG_CMD_BOOTLOADER, DEBUG_CMD_RESET};

/// Frames a partial packet may wait before it is padded and sent.
pub const FLUSH_TIMEOUT_FRAMES: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCommand {
    /// Jump to the HalfKay bootloader.
    Bootloader,
    /// Reboot normally.
    Reset,
}

impl DebugCommand {
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            DEBUG_CMD_BOOTLOADER => Some(DebugCommand::Bootloader),
            DEBUG_CMD_RESET => Some(DebugCommand::Reset),
            _ => None,
        }
    }
}

/// Carries out host reboot requests. On hardware neither command returns.
pub trait DebugCommandHandler: Send {
    fn handle(&mut self, command: DebugCommand);
}

/// Byte queue shared by the logger (any context) and the debug interface
/// (start-of-frame interrupt). When full, new bytes are dropped.
pub struct LogBuffer<const N: usize> {
    queue: Mutex<RefCell<Deque<u8, N>>>,
}

impl<const N: usize> LogBuffer<N> {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(RefCell::new(Deque::new())),
        }
    }

    /// Queue one byte. Returns false if the buffer is full.
    pub fn push(&self, byte: u8) -> bool {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).push_back(byte).is_ok())
    }

    pub fn pop(&self) -> Option<u8> {
        critical_section::with(|cs| self.queue.borrow_ref_mut(cs).pop_front())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.queue.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Text writer that expands `\n` to `\r\n`.
    pub fn writer(&self) -> LogWriter<'_, N> {
        LogWriter { buffer: self }
    }
}

impl<const N: usize> Default for LogBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LogWriter<'a, const N: usize> {
    buffer: &'a LogBuffer<N>,
}

impl<const N: usize> fmt::Write for LogWriter<'_, N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.buffer.push(b'\r');
            }
            self.buffer.push(byte);
        }
        // Dropped output is not an error for the caller.
        Ok(())
    }
}

/// `log` backend writing into a [`LogBuffer`].
pub struct DebugLogger<const N: usize> {
    buffer: &'static LogBuffer<N>,
    level: LevelFilter,
}

impl<const N: usize> DebugLogger<N> {
    pub const fn new(buffer: &'static LogBuffer<N>, level: LevelFilter) -> Self {
        Self { buffer, level }
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }
}

impl<const N: usize> Log for DebugLogger<N> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(self.buffer.writer(), "{} {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

pub struct DebugIface<H, const N: usize> {
    number: u8,
    endpoints: [UsbEndpoint; 1],
    buffer: &'static LogBuffer<N>,
    handler: H,
    flush_timer: u8,
    paused: bool,
}

impl<H: DebugCommandHandler, const N: usize> DebugIface<H, N> {
    /// `report_len` must match the HID report descriptor and be a power of
    /// two between 8 and 64: it is also the endpoint bank size.
    pub fn new(
        number: u8,
        endpoint: u8,
        report_len: u8,
        buffer: &'static LogBuffer<N>,
        handler: H,
    ) -> Self {
        Self {
            number,
            endpoints: [UsbEndpoint::new(
                endpoint,
                EndpointConfig::interrupt_in(report_len, Banks::Double),
            )],
            buffer,
            handler,
            flush_timer: 0,
            paused: false,
        }
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Write one byte into the selected endpoint bank, releasing the bank
    /// once it is full.
    fn try_usb_write<B: UsbBus>(&mut self, bus: &mut B, byte: u8) -> bool {
        if !bus.flags().contains(EndpointFlags::RW_ALLOWED) {
            return false;
        }
        bus.write_byte(byte);
        if !bus.flags().contains(EndpointFlags::RW_ALLOWED) {
            bus.clear_flags(EndpointFlags::FIFO_CONTROL);
            self.flush_timer = 0;
        } else if self.flush_timer == 0 {
            self.flush_timer = FLUSH_TIMEOUT_FRAMES;
        }
        true
    }

    fn handle_set_report<B: UsbBus>(&mut self, dev: &mut UsbDevice<B>, pkt: &SetupPacket) -> bool {
        if (pkt.w_value >> 8) as u8 != report_type::FEATURE || pkt.w_length < 1 {
            return false;
        }

        dev.wait_for_out_packet();
        let value = dev.bus_mut().read_byte();
        dev.ack_out();
        dev.send_in();

        info!("debug set feature: id={} len={} value={:#04x}", pkt.w_value & 0xFF, pkt.w_length, value);
        if let Some(command) = DebugCommand::from_byte(value) {
            self.handler.handle(command);
        }
        true
    }
}

impl<B, H, const N: usize> UsbInterface<B> for DebugIface<H, N>
where
    B: UsbBus,
    H: DebugCommandHandler + 'static,
{
    fn number(&self) -> u8 {
        self.number
    }

    fn endpoints(&self) -> &[UsbEndpoint] {
        &self.endpoints
    }

    fn start_of_frame(&mut self, dev: &mut UsbDevice<B>) {
        let bus = dev.bus_mut();
        bus.select_endpoint(self.endpoints[0].number());

        if !self.paused {
            let buffer = self.buffer;
            critical_section::with(|cs| {
                let mut queue = buffer.queue.borrow_ref_mut(cs);
                while let Some(&byte) = queue.front() {
                    if !self.try_usb_write(bus, byte) {
                        break;
                    }
                    queue.pop_front();
                }
            });
        }

        if self.flush_timer != 0 {
            self.flush_timer -= 1;
            if self.flush_timer == 0 {
                // Always send full packets: pad with NUL.
                while bus.flags().contains(EndpointFlags::RW_ALLOWED) {
                    bus.write_byte(0);
                }
                bus.clear_flags(EndpointFlags::FIFO_CONTROL);
            }
        }
    }

    fn handle_setup_packet(&mut self, dev: &mut UsbDevice<B>, pkt: &SetupPacket) -> bool {
        match (pkt.bm_request_type, pkt.b_request) {
            (request_type::CLASS_IN, hid_request::GET_REPORT) => {
                dev.send_control_in(pkt.w_length as usize, |_| 0);
                true
            }
            (request_type::STANDARD_INTERFACE_IN, std_request::GET_DESCRIPTOR) => {
                dev.handle_get_descriptor(pkt);
                true
            }
            (request_type::CLASS_OUT, hid_request::SET_REPORT) => self.handle_set_report(dev, pkt),
            (request_type::CLASS_OUT, hid_request::SET_IDLE) => {
                // Nothing is retransmitted on idle.
                dev.send_in();
                true
            }
            _ => false,
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
