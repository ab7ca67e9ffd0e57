//! Simulated programmer board and target for driver tests
//!
//! [`SimBoard`] implements the whole hardware access capability on the
//! host. It logs every pin change, port write and delay, keeps a simulated
//! clock that advances on delays and on every clock read, and plays the
//! part of one target chip so the drivers see realistic answers:
//!
//! - ISP: decodes bytes from hardware or bit-banged SPI and answers like an
//!   AVR (echo of the previous byte, computed fourth byte), but only when
//!   clocked no faster than a configurable rate
//! - HVSP: decodes 11-clock frames and serves SDO, which doubles as ready
//! - HVPP: records latched control/data pairs and serves scripted reads
//! - TPI: decodes frames, models a few registers and a flat memory

extern crate std;

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::vec::Vec;

use stkprog_core::config::{HvPins, HvppPins, HvspPins, IspPins, PinLayout, TpiPins};
use stkprog_hal::{Clock, ClockOutput, Gpio, PinId, PinMode, PortPins, SpiBus, SpiConfig};

const PIN_COUNT: usize = 32;

/// Something the board was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Mode(PinId, PinMode),
    Write(PinId, bool),
    /// Whole-port write, identified by the port's first pin
    Port(PinId, u8),
    /// HVPP XTAL rising edge with the control and data bytes it latched
    Latch { control: u8, data: u8 },
    /// Decoded HVSP frame: instruction and data byte
    HvspFrame(u8, u8),
    /// Byte received by the ISP target
    IspByte(u8),
    /// Byte received by the TPI target
    TpiByte(u8),
    /// One sample of the target's ready indication
    ReadyPoll,
    SpiEnable(u32),
    SpiDisable,
    ClockStart(u32),
    ClockStop,
    DelayMs(u32),
    DelayUs(u32),
}

impl Event {
    /// Whether the event changes something on the target side
    pub fn is_hardware_write(&self) -> bool {
        matches!(
            self,
            Event::Write(..)
                | Event::Port(..)
                | Event::Latch { .. }
                | Event::HvspFrame(..)
                | Event::IspByte(_)
                | Event::TpiByte(_)
        )
    }
}

/// Value an ISP target returns in the fourth byte of a read transaction
pub fn isp_answer(cmd: u8, addr_hi: u8, addr_lo: u8) -> u8 {
    cmd ^ addr_hi ^ addr_lo ^ 0x5A
}

/// Initial content of the simulated TPI memory
pub fn tpi_memory_byte(address: u16) -> u8 {
    (address as u8) ^ (address >> 8) as u8 ^ 0xA5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Isp,
    Hvsp,
    Hvpp,
    Tpi,
}

#[derive(Debug, Default)]
struct IspState {
    position: usize,
    received: [u8; 4],
    bit: u8,
    shift_in: u8,
    shift_out: u8,
}

#[derive(Debug, Default)]
struct HvspState {
    bit: u8,
    instr: u8,
    data: u8,
    out: u8,
}

#[derive(Debug, Default)]
struct TpiState {
    rx_bits: Vec<bool>,
    tx_bits: VecDeque<bool>,
    pending: Option<u8>,
    key_left: u8,
    nvm_enabled: bool,
    pointer: u16,
    nvm_command: u8,
    pcr: u8,
}

/// Simulated board with one target attached
pub struct SimBoard {
    pub pins: PinLayout,
    target: Target,
    levels: [bool; PIN_COUNT],
    modes: [PinMode; PIN_COUNT],
    events: RefCell<Vec<Event>>,
    now_us: Cell<u64>,
    last_delay_us: u32,
    spi: Option<SpiConfig>,

    /// Fastest rate (Hz) at which the ISP target still answers
    pub isp_max_hz: Option<u32>,
    /// Ready samples that report busy before the target turns ready
    pub busy_polls: Cell<u32>,
    ready_polls: Cell<u32>,
    /// Bytes served by HVSP frames, one per frame, then zero
    pub hvsp_responses: VecDeque<u8>,
    hvsp: HvspState,
    sdo_fresh: Cell<bool>,
    /// Bytes served by HVPP data port reads, then zero
    pub hvpp_reads: RefCell<VecDeque<u8>>,
    /// Value of the TPI identification register
    pub tpi_identity: u8,
    /// Send answers with a broken parity bit
    pub tpi_corrupt_parity: bool,
    pub tpi_memory: Vec<u8>,
    tpi: TpiState,
    isp: IspState,
}

/// Pin layout used by all driver tests
pub fn test_layout() -> PinLayout {
    let port = |first: u8| {
        let mut pins = [PinId(0); 8];
        for (i, pin) in pins.iter_mut().enumerate() {
            *pin = PinId(first + i as u8);
        }
        PortPins(pins)
    };
    PinLayout {
        isp: IspPins {
            reset: PinId(20),
            sck: PinId(18),
            mosi: PinId(19),
            miso: PinId(16),
            clock_out: PinId(21),
        },
        hv: HvPins {
            vcc: PinId(26),
            reset: PinId(27),
        },
        hvsp: HvspPins {
            sdi: PinId(0),
            sii: PinId(1),
            sci: PinId(2),
            sdo: PinId(3),
        },
        hvpp: HvppPins {
            control: port(0),
            data: port(8),
            ready: PinId(22),
            xtal: PinId(28),
        },
        tpi: TpiPins {
            reset: PinId(20),
            clock: PinId(18),
            data: PinId(19),
        },
    }
}

impl SimBoard {
    fn new(target: Target) -> Self {
        Self {
            pins: test_layout(),
            target,
            levels: [false; PIN_COUNT],
            modes: [PinMode::Input; PIN_COUNT],
            events: RefCell::new(Vec::new()),
            now_us: Cell::new(0),
            last_delay_us: 0,
            spi: None,
            isp_max_hz: Some(u32::MAX),
            busy_polls: Cell::new(0),
            ready_polls: Cell::new(0),
            hvsp_responses: VecDeque::new(),
            hvsp: HvspState::default(),
            sdo_fresh: Cell::new(false),
            hvpp_reads: RefCell::new(VecDeque::new()),
            tpi_identity: 0x80,
            tpi_corrupt_parity: false,
            tpi_memory: (0..=u16::MAX).map(tpi_memory_byte).collect(),
            tpi: TpiState::default(),
            isp: IspState::default(),
        }
    }

    /// Board with an ISP target
    pub fn isp() -> Self {
        Self::new(Target::Isp)
    }

    /// Board with an HVSP target
    pub fn hvsp() -> Self {
        Self::new(Target::Hvsp)
    }

    /// Board with an HVPP target
    pub fn hvpp() -> Self {
        Self::new(Target::Hvpp)
    }

    /// Board with a TPI target
    pub fn tpi() -> Self {
        Self::new(Target::Tpi)
    }

    /// Start the simulated clock at `ms`
    pub fn set_time_ms(&self, ms: u32) {
        self.now_us.set(ms as u64 * 1000);
    }

    /// Target never turns ready
    pub fn never_ready(&self) {
        self.busy_polls.set(u32::MAX);
    }

    /// Snapshot of the event log
    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    /// Forget everything logged so far
    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
        self.ready_polls.set(0);
    }

    /// Number of ready samples taken
    pub fn ready_polls(&self) -> u32 {
        self.ready_polls.get()
    }

    /// Decoded HVSP frames
    pub fn hvsp_frames(&self) -> Vec<(u8, u8)> {
        self.filter(|e| match e {
            Event::HvspFrame(i, d) => Some((i, d)),
            _ => None,
        })
    }

    /// Bytes received by the ISP target
    pub fn isp_bytes(&self) -> Vec<u8> {
        self.filter(|e| match e {
            Event::IspByte(b) => Some(b),
            _ => None,
        })
    }

    /// Bytes received by the TPI target
    pub fn tpi_bytes(&self) -> Vec<u8> {
        self.filter(|e| match e {
            Event::TpiByte(b) => Some(b),
            _ => None,
        })
    }

    /// HVPP control/data pairs latched by XTAL pulses
    pub fn latches(&self) -> Vec<(u8, u8)> {
        self.filter(|e| match e {
            Event::Latch { control, data } => Some((control, data)),
            _ => None,
        })
    }

    /// Values written to the HVPP control port
    pub fn control_writes(&self) -> Vec<u8> {
        let first = self.pins.hvpp.control.pin(0);
        self.filter(|e| match e {
            Event::Port(pin, value) if pin == first => Some(value),
            _ => None,
        })
    }

    /// Whether any target-visible write happened after the last ready poll
    pub fn wrote_after_last_poll(&self) -> bool {
        let events = self.events.borrow();
        match events.iter().rposition(|e| *e == Event::ReadyPoll) {
            Some(last) => events[last + 1..].iter().any(Event::is_hardware_write),
            None => false,
        }
    }

    fn filter<T>(&self, f: impl Fn(Event) -> Option<T>) -> Vec<T> {
        self.events.borrow().iter().copied().filter_map(f).collect()
    }

    fn log(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn level(&self, pin: PinId) -> bool {
        self.levels[pin.0 as usize]
    }

    fn is_output(&self, pin: PinId) -> bool {
        self.modes[pin.0 as usize] == PinMode::Output
    }

    /// One ready sample; busy until the busy count runs out
    fn sample_ready(&self) -> bool {
        self.log(Event::ReadyPoll);
        self.ready_polls.set(self.ready_polls.get() + 1);
        let busy = self.busy_polls.get();
        if busy == 0 {
            true
        } else {
            if busy != u32::MAX {
                self.busy_polls.set(busy - 1);
            }
            false
        }
    }

    fn rising_edge(&mut self, pin: PinId) {
        match self.target {
            Target::Isp if pin == self.pins.isp.sck && self.spi.is_none() => self.isp_soft_clock(),
            Target::Hvsp if pin == self.pins.hvsp.sci => self.hvsp_clock(),
            Target::Hvpp if pin == self.pins.hvpp.xtal => {
                let control = self.port_level(&self.pins.hvpp.control);
                let data = self.port_level(&self.pins.hvpp.data);
                self.log(Event::Latch { control, data });
            }
            Target::Tpi if pin == self.pins.tpi.clock => self.tpi_clock(),
            _ => {}
        }
    }

    fn port_level(&self, port: &PortPins) -> u8 {
        port.0
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, pin)| acc | ((self.level(*pin) as u8) << bit))
    }

    // ISP target

    fn isp_in_sync(&self) -> bool {
        let rate = match self.spi {
            Some(config) => config.frequency,
            None if self.last_delay_us == 0 => u32::MAX,
            None => 1_000_000 / (4 * self.last_delay_us),
        };
        self.isp_max_hz.is_some_and(|max| rate <= max)
    }

    fn isp_byte_out(&mut self) -> u8 {
        if !self.isp_in_sync() {
            return 0xFF;
        }
        let rx = self.isp.received;
        match self.isp.position {
            0 => 0x00,
            1 => rx[0],
            2 => rx[1],
            _ if rx[0] == 0xF0 => !self.sample_ready() as u8,
            _ => isp_answer(rx[0], rx[1], rx[2]),
        }
    }

    fn isp_byte_in(&mut self, byte: u8) {
        self.log(Event::IspByte(byte));
        self.isp.received[self.isp.position] = byte;
        self.isp.position = (self.isp.position + 1) % 4;
    }

    fn isp_soft_clock(&mut self) {
        if self.isp.bit == 0 {
            self.isp.shift_out = self.isp_byte_out();
        }
        let miso = self.isp.shift_out & (0x80 >> self.isp.bit) != 0;
        self.levels[self.pins.isp.miso.0 as usize] = miso;
        self.isp.shift_in = (self.isp.shift_in << 1) | self.level(self.pins.isp.mosi) as u8;
        self.isp.bit += 1;
        if self.isp.bit == 8 {
            self.isp.bit = 0;
            let byte = self.isp.shift_in;
            self.isp_byte_in(byte);
        }
    }

    // HVSP target

    fn hvsp_clock(&mut self) {
        // Clocks before 12 V is on RESET are synchronisation only
        if self.level(self.pins.hv.reset) {
            return;
        }
        let bit = self.hvsp.bit;
        if bit == 0 {
            self.hvsp.out = self.hvsp_responses.pop_front().unwrap_or(0);
        }
        if bit < 8 {
            let sdo = self.hvsp.out & (0x80 >> bit) != 0;
            self.levels[self.pins.hvsp.sdo.0 as usize] = sdo;
        }
        if (1..=8).contains(&bit) {
            self.hvsp.instr = (self.hvsp.instr << 1) | self.level(self.pins.hvsp.sii) as u8;
            self.hvsp.data = (self.hvsp.data << 1) | self.level(self.pins.hvsp.sdi) as u8;
        }
        self.sdo_fresh.set(true);
        self.hvsp.bit += 1;
        if self.hvsp.bit == 11 {
            self.hvsp.bit = 0;
            self.log(Event::HvspFrame(self.hvsp.instr, self.hvsp.data));
        }
    }

    // TPI target

    fn tpi_clock(&mut self) {
        let data = self.pins.tpi.data;
        if self.is_output(data) {
            self.tpi_receive_bit(self.level(data));
        } else {
            let bit = self.tpi.tx_bits.pop_front().unwrap_or(true);
            self.levels[data.0 as usize] = bit;
        }
    }

    fn tpi_receive_bit(&mut self, bit: bool) {
        if self.tpi.rx_bits.is_empty() && bit {
            return; // idle
        }
        self.tpi.rx_bits.push(bit);
        if self.tpi.rx_bits.len() < 12 {
            return;
        }
        let bits: Vec<bool> = self.tpi.rx_bits.drain(..).collect();
        let byte = bits[1..9]
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, b)| acc | ((*b as u8) << i));
        let parity = bits[1..9].iter().filter(|b| **b).count() % 2 == 1;
        if parity != bits[9] {
            return;
        }
        self.log(Event::TpiByte(byte));
        self.tpi_execute(byte);
    }

    fn tpi_reply(&mut self, byte: u8) {
        let mut parity = false;
        // Guard bits, then the frame
        self.tpi.tx_bits.extend([true, true, false]);
        for i in 0..8 {
            let bit = byte & (1 << i) != 0;
            parity ^= bit;
            self.tpi.tx_bits.push_back(bit);
        }
        self.tpi
            .tx_bits
            .extend([parity ^ self.tpi_corrupt_parity, true, true]);
    }

    fn tpi_execute(&mut self, byte: u8) {
        if self.tpi.key_left > 0 {
            self.tpi.key_left -= 1;
            if self.tpi.key_left == 0 {
                self.tpi.nvm_enabled = true;
            }
            return;
        }

        if let Some(instr) = self.tpi.pending.take() {
            match instr {
                0xC2 => self.tpi.pcr = byte,
                0x68 => self.tpi.pointer = (self.tpi.pointer & 0xFF00) | byte as u16,
                0x69 => self.tpi.pointer = (self.tpi.pointer & 0x00FF) | ((byte as u16) << 8),
                0xF3 => self.tpi.nvm_command = byte,
                0x60 => {}
                0x64 => {
                    self.tpi_memory[self.tpi.pointer as usize] = byte;
                    self.tpi.pointer = self.tpi.pointer.wrapping_add(1);
                }
                _ => {}
            }
            return;
        }

        match byte {
            0xE0 => self.tpi.key_left = 8,
            0x8F => self.tpi_reply(self.tpi_identity),
            0x80 => {
                let status = if self.tpi.nvm_enabled { 0x02 } else { 0x00 };
                self.tpi_reply(status);
            }
            // SIN NVMCSR
            0x72 => {
                let busy = if self.sample_ready() { 0x00 } else { 0x80 };
                self.tpi_reply(busy);
            }
            0x24 => {
                let value = self.tpi_memory[self.tpi.pointer as usize];
                self.tpi.pointer = self.tpi.pointer.wrapping_add(1);
                self.tpi_reply(value);
            }
            0xC2 | 0x68 | 0x69 | 0xF3 | 0x60 | 0x64 => self.tpi.pending = Some(byte),
            _ => {}
        }
    }

    /// Last NVM command the TPI target received
    pub fn tpi_nvm_command(&self) -> u8 {
        self.tpi.nvm_command
    }

    /// Current TPI pointer register
    pub fn tpi_pointer(&self) -> u16 {
        self.tpi.pointer
    }
}

impl Gpio for SimBoard {
    fn set_mode(&mut self, pin: PinId, mode: PinMode) {
        self.log(Event::Mode(pin, mode));
        self.modes[pin.0 as usize] = mode;
        if mode == PinMode::InputPullUp {
            self.levels[pin.0 as usize] = true;
        }
    }

    fn set_high(&mut self, pin: PinId) {
        self.log(Event::Write(pin, true));
        let was_low = !self.level(pin);
        self.levels[pin.0 as usize] = true;
        if was_low {
            self.rising_edge(pin);
        }
    }

    fn set_low(&mut self, pin: PinId) {
        self.log(Event::Write(pin, false));
        self.levels[pin.0 as usize] = false;
        if self.target == Target::Isp && pin == self.pins.isp.reset {
            self.isp = IspState::default();
        }
    }

    fn is_high(&self, pin: PinId) -> bool {
        match self.target {
            Target::Hvsp if pin == self.pins.hvsp.sdo => {
                if self.sdo_fresh.replace(false) {
                    self.level(pin)
                } else {
                    self.sample_ready()
                }
            }
            Target::Hvpp if pin == self.pins.hvpp.ready => self.sample_ready(),
            _ => self.level(pin),
        }
    }

    fn write_port(&mut self, port: &PortPins, value: u8) {
        self.log(Event::Port(port.pin(0), value));
        for (bit, pin) in port.0.iter().enumerate() {
            self.levels[pin.0 as usize] = value & (1 << bit) != 0;
        }
    }

    fn read_port(&self, port: &PortPins) -> u8 {
        if self.target == Target::Hvpp && *port == self.pins.hvpp.data {
            self.hvpp_reads.borrow_mut().pop_front().unwrap_or(0)
        } else {
            self.port_level(port)
        }
    }
}

impl SpiBus for SimBoard {
    fn enable(&mut self, config: SpiConfig) {
        self.log(Event::SpiEnable(config.frequency));
        self.spi = Some(config);
    }

    fn disable(&mut self) {
        self.log(Event::SpiDisable);
        self.spi = None;
    }

    fn transfer(&mut self, out: u8) -> u8 {
        let response = self.isp_byte_out();
        self.isp_byte_in(out);
        response
    }
}

impl Clock for SimBoard {
    fn now_ms(&self) -> u32 {
        // Every look at the clock costs a little simulated time
        let now = self.now_us.get();
        self.now_us.set(now + 20);
        (now / 1000) as u32
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log(Event::DelayMs(ms));
        self.now_us.set(self.now_us.get() + ms as u64 * 1000);
    }

    fn delay_us(&mut self, us: u32) {
        self.log(Event::DelayUs(us));
        self.last_delay_us = us;
        self.now_us.set(self.now_us.get() + us as u64);
    }
}

impl ClockOutput for SimBoard {
    fn start_clock(&mut self, frequency: u32) {
        self.log(Event::ClockStart(frequency));
    }

    fn stop_clock(&mut self) {
        self.log(Event::ClockStop);
    }
}
