//! Host-side models of the hardware boundaries, used by the unit tests.

use std::cell::Cell;
use std::collections::{BTreeSet, VecDeque};

use embedded_hal::delay::DelayNs;

use crate::bitmap::LineMap;
use crate::matrix::KeyMatrix;
use crate::usb::bus::{DeviceInterrupts, EndpointFlags, UsbBus};
use crate::usb::endpoint::{EndpointConfig, EndpointType};
use crate::usb::controller::UsbController;
use crate::usb::SetupPacket;

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Drive {
    Idle,
    Col(u8),
    Row(u8),
}

/// Electrical model of a switch matrix.
///
/// Current flows from a pulled-up line towards the driven (low) line. A
/// closed switch always conducts row-to-column; it conducts column-to-row
/// only when it has no diode. A sampled line is active when some chain of
/// closed switches carries current from it to the driven line, which is
/// exactly how ghosting shows up on real hardware.
pub struct SimMatrix<const C: u8, const R: u8> {
    pressed: BTreeSet<(u8, u8)>,
    diodes: BTreeSet<(u8, u8)>,
    drive: Drive,
    row_reads: usize,
    releases: Vec<(usize, (u8, u8))>,
    pub col_scans: Vec<u8>,
    pub row_scans: Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Node {
    Col(u8),
    Row(u8),
}

impl<const C: u8, const R: u8> SimMatrix<C, R> {
    pub fn new() -> Self {
        Self {
            pressed: BTreeSet::new(),
            diodes: BTreeSet::new(),
            drive: Drive::Idle,
            row_reads: 0,
            releases: Vec::new(),
            col_scans: Vec::new(),
            row_scans: Vec::new(),
        }
    }

    pub fn press(&mut self, col: u8, row: u8) {
        self.pressed.insert((col, row));
    }

    pub fn release(&mut self, col: u8, row: u8) {
        self.pressed.remove(&(col, row));
    }

    pub fn add_diode(&mut self, col: u8, row: u8) {
        self.diodes.insert((col, row));
    }

    /// Release `(col, row)` right after the `reads`-th call to `read_rows`
    /// (counting from 1), modelling a key lifted in the middle of a cycle.
    pub fn release_after_row_reads(&mut self, reads: usize, col: u8, row: u8) {
        self.releases.push((self.row_reads + reads, (col, row)));
    }

    /// All nodes from which current can reach `target`.
    fn sources(&self, target: Node) -> BTreeSet<Node> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        seen.insert(target);
        queue.push_back(target);
        while let Some(node) = queue.pop_front() {
            for &(c, r) in &self.pressed {
                let prev = match node {
                    // row -> col always conducts
                    Node::Col(col) if col == c => Node::Row(r),
                    // col -> row only without a diode
                    Node::Row(row) if row == r && !self.diodes.contains(&(c, r)) => Node::Col(c),
                    _ => continue,
                };
                if seen.insert(prev) {
                    queue.push_back(prev);
                }
            }
        }
        seen
    }

    fn driven_node(&self) -> Option<Node> {
        match self.drive {
            Drive::Idle => None,
            Drive::Col(c) => Some(Node::Col(c)),
            Drive::Row(r) => Some(Node::Row(r)),
        }
    }

    fn apply_releases(&mut self) {
        let now = self.row_reads;
        let due: Vec<(u8, u8)> = self
            .releases
            .iter()
            .filter(|(at, _)| *at == now)
            .map(|(_, key)| *key)
            .collect();
        for (c, r) in due {
            self.release(c, r);
        }
    }
}

impl<const C: u8, const R: u8> KeyMatrix for SimMatrix<C, R> {
    const COLS: u8 = C;
    const ROWS: u8 = R;

    fn prepare(&mut self) {
        self.drive = Drive::Idle;
    }

    fn prepare_col_scan(&mut self, col: u8) {
        assert!(
            !matches!(self.drive, Drive::Row(_)),
            "column scan started before finish_row_scan"
        );
        self.col_scans.push(col);
        self.drive = Drive::Col(col);
    }

    fn prepare_row_scan(&mut self, row: u8) {
        self.row_scans.push(row);
        self.drive = Drive::Row(row);
    }

    fn finish_row_scan(&mut self) {
        self.drive = Drive::Idle;
    }

    fn read_rows(&mut self) -> LineMap {
        let mut rows = LineMap::new();
        if let Some(target) = self.driven_node() {
            for node in self.sources(target) {
                if let Node::Row(r) = node {
                    rows.set(r as usize);
                }
            }
        }
        self.row_reads += 1;
        self.apply_releases();
        rows
    }

    fn read_cols(&mut self) -> LineMap {
        let mut cols = LineMap::new();
        if let Some(target) = self.driven_node() {
            for node in self.sources(target) {
                if let Node::Col(c) = node {
                    cols.set(c as usize);
                }
            }
        }
        cols
    }
}

/// One endpoint of [`MockBus`].
#[derive(Default)]
pub struct MockEndpoint {
    pub config: Option<EndpointConfig>,
    pub setup_irq: bool,
    pub stalled: bool,
    pub stall_count: usize,
    pub stall_clears: usize,
    /// Both banks owned by the controller: nothing can be written.
    pub busy: bool,
    rx: VecDeque<u8>,
    pending_out: VecDeque<Vec<u8>>,
    setup: bool,
    out: bool,
    fifo: Vec<u8>,
    /// Packets handed to the controller, oldest first.
    pub sent: Vec<Vec<u8>>,
}

impl MockEndpoint {
    fn bank_full(&self) -> bool {
        match self.config {
            Some(config) if config.kind != EndpointType::Control => {
                self.fifo.len() >= config.size as usize
            }
            _ => false,
        }
    }

    fn next_out(&mut self) {
        if self.setup || self.out {
            return;
        }
        if let Some(packet) = self.pending_out.pop_front() {
            self.rx = packet.into();
            self.out = true;
        }
    }
}

/// Register-level model of the banked USB controller.
///
/// IN banks are released instantly: clearing `TX_READY` (endpoint 0) or
/// `FIFO_CONTROL` (other endpoints) moves the FIFO contents to `sent`.
pub struct MockBus {
    eps: Vec<MockEndpoint>,
    selected: u8,
    pub controller_enabled: bool,
    pub pll_enabled: bool,
    pub attached: bool,
    pll_polls: Cell<u8>,
    pub enabled_interrupts: DeviceInterrupts,
    pending_interrupts: DeviceInterrupts,
    /// Masks passed to `reset_endpoints`, in order.
    pub resets: Vec<u8>,
    pub address: Option<u8>,
    abort_after: Option<usize>,
    control_in_packets: usize,
}

impl MockBus {
    pub fn new() -> Self {
        Self {
            eps: (0..7).map(|_| MockEndpoint::default()).collect(),
            selected: 0,
            controller_enabled: false,
            pll_enabled: false,
            attached: false,
            pll_polls: Cell::new(0),
            enabled_interrupts: DeviceInterrupts::empty(),
            pending_interrupts: DeviceInterrupts::empty(),
            resets: Vec::new(),
            address: None,
            abort_after: None,
            control_in_packets: 0,
        }
    }

    pub fn ep(&self, number: u8) -> &MockEndpoint {
        &self.eps[number as usize]
    }

    pub fn ep_mut(&mut self, number: u8) -> &mut MockEndpoint {
        &mut self.eps[number as usize]
    }

    pub fn selected(&self) -> u8 {
        self.selected
    }

    /// Deliver a SETUP packet on endpoint 0. A new SETUP clears any stall.
    pub fn push_setup(&mut self, pkt: SetupPacket) {
        let ep = &mut self.eps[0];
        ep.rx = pkt.to_bytes().to_vec().into();
        ep.setup = true;
        ep.out = false;
        ep.stalled = false;
    }

    /// Queue an OUT data packet on endpoint 0.
    pub fn push_out(&mut self, data: &[u8]) {
        let ep = &mut self.eps[0];
        ep.pending_out.push_back(data.to_vec());
        ep.next_out();
    }

    /// Have the host send an OUT packet after `packets` more control IN
    /// packets, ending the IN transfer early.
    pub fn abort_after_in_packets(&mut self, packets: usize) {
        self.abort_after = Some(self.control_in_packets + packets);
    }

    pub fn raise(&mut self, interrupts: DeviceInterrupts) {
        self.pending_interrupts |= interrupts;
    }

    pub fn take_sent(&mut self, number: u8) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.eps[number as usize].sent)
    }

    /// Everything sent on an endpoint, packet boundaries dropped.
    pub fn sent_bytes(&self, number: u8) -> Vec<u8> {
        self.eps[number as usize].sent.concat()
    }

    fn current(&mut self) -> &mut MockEndpoint {
        &mut self.eps[self.selected as usize]
    }
}

impl UsbBus for MockBus {
    fn enable_controller(&mut self) {
        self.controller_enabled = true;
    }

    fn enable_pll(&mut self) {
        self.pll_enabled = true;
    }

    fn pll_locked(&self) -> bool {
        let polls = self.pll_polls.get() + 1;
        self.pll_polls.set(polls);
        self.pll_enabled && polls >= 3
    }

    fn attach(&mut self) {
        self.attached = true;
    }

    fn enable_interrupts(&mut self, interrupts: DeviceInterrupts) {
        self.enabled_interrupts |= interrupts;
    }

    fn take_interrupts(&mut self) -> DeviceInterrupts {
        std::mem::replace(&mut self.pending_interrupts, DeviceInterrupts::empty())
    }

    fn select_endpoint(&mut self, number: u8) {
        assert!((number as usize) < self.eps.len(), "no endpoint {}", number);
        self.selected = number;
    }

    fn flags(&self) -> EndpointFlags {
        let ep = &self.eps[self.selected as usize];
        let mut flags = EndpointFlags::empty();
        if !ep.busy {
            flags |= EndpointFlags::TX_READY | EndpointFlags::FIFO_CONTROL;
            if !ep.bank_full() {
                flags |= EndpointFlags::RW_ALLOWED;
            }
        }
        if ep.stalled {
            flags |= EndpointFlags::STALLED;
        }
        if ep.setup {
            flags |= EndpointFlags::RX_SETUP;
        }
        if ep.out {
            flags |= EndpointFlags::RX_OUT;
        }
        flags
    }

    fn clear_flags(&mut self, flags: EndpointFlags) {
        let control = self.selected == 0;
        let ep = &mut self.eps[self.selected as usize];
        if flags.contains(EndpointFlags::RX_SETUP) {
            ep.setup = false;
        }
        if flags.contains(EndpointFlags::RX_OUT) {
            ep.out = false;
        }
        if flags.intersects(EndpointFlags::RX_SETUP | EndpointFlags::RX_OUT) {
            ep.next_out();
        }
        let release = if control {
            flags.contains(EndpointFlags::TX_READY)
        } else {
            flags.contains(EndpointFlags::FIFO_CONTROL)
        };
        if release {
            assert!(!ep.busy, "bank released while busy");
            let packet = std::mem::take(&mut ep.fifo);
            ep.sent.push(packet);
            if control {
                self.control_in_packets += 1;
                if self.abort_after == Some(self.control_in_packets) {
                    self.eps[0].out = true;
                }
            }
        }
    }

    fn configure_endpoint(&mut self, config: &EndpointConfig) {
        self.current().config = Some(*config);
    }

    fn enable_setup_interrupt(&mut self) {
        self.current().setup_irq = true;
    }

    fn read_byte(&mut self) -> u8 {
        self.current().rx.pop_front().unwrap_or(0)
    }

    fn write_byte(&mut self, byte: u8) {
        let ep = self.current();
        assert!(!ep.bank_full(), "write into a full bank");
        ep.fifo.push(byte);
    }

    fn stall(&mut self) {
        let ep = self.current();
        ep.stalled = true;
        ep.stall_count += 1;
    }

    fn clear_stall(&mut self) {
        let ep = self.current();
        ep.stalled = false;
        ep.stall_clears += 1;
    }

    fn is_stalled(&self) -> bool {
        self.eps[self.selected as usize].stalled
    }

    fn reset_endpoints(&mut self, mask: u8) {
        self.resets.push(mask);
    }

    fn set_address(&mut self, address: u8) {
        self.address = Some(address);
    }
}

pub fn pkt(bm_request_type: u8, b_request: u8, w_value: u16, w_index: u16, w_length: u16) -> SetupPacket {
    SetupPacket {
        bm_request_type,
        b_request,
        w_value,
        w_index,
        w_length,
    }
}

/// Deliver a SETUP packet and run the endpoint interrupt.
pub fn setup(ctrl: &mut UsbController<'_, MockBus>, pkt: SetupPacket) {
    ctrl.device_mut().bus_mut().push_setup(pkt);
    ctrl.endpoint_interrupt();
}

/// Raise one start-of-frame interrupt.
pub fn frame(ctrl: &mut UsbController<'_, MockBus>) {
    ctrl.device_mut().bus_mut().raise(DeviceInterrupts::START_OF_FRAME);
    ctrl.general_interrupt();
}
