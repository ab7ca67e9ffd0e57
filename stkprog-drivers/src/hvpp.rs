//! High-voltage parallel programming
//!
//! The target is driven through a byte-wide data bus, a set of control
//! lines and XTAL1 pulses that latch commands, addresses and data. Which
//! control pattern means what differs between chips, so the host uploads
//! them with `CMD_SET_CONTROL_STACK` and this driver only picks entries by
//! signal and byte select.

use stkprog_core::config::{HvPins, HvppPins, PinLayout, Timing};
use stkprog_core::session::EXTENDED_ADDRESS_FLAG;
use stkprog_core::{wait_until, ProgrammingProtocol, ProtocolError, Reply, Request, SessionState};
use stkprog_hal::{HardwareAccess, PinMode};
use stkprog_protocol::Status;

const POWER_UP_US: u32 = 50;
const CONTROL_SETTLE_US: u32 = 2;

/// Control stack signal groups, four byte-select entries each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Signal {
    LoadAddress = 0,
    LoadData = 4,
    LoadCommand = 8,
    Done = 12,
    CommitData = 16,
    EnableRead = 20,
    PageLoad = 24,
    Init = 28,
}

/// Byte select within a signal group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Byte {
    Low = 0,
    High = 1,
    Ext = 2,
    Ext2 = 3,
}

impl Byte {
    fn from_index(index: u8) -> Result<Self, ProtocolError> {
        match index {
            0 => Ok(Byte::Low),
            1 => Ok(Byte::High),
            2 => Ok(Byte::Ext),
            3 => Ok(Byte::Ext2),
            _ => Err(ProtocolError::Malformed),
        }
    }
}

// Commands latched with LoadCommand
const NO_OPERATION: u8 = 0x00;
const CHIP_ERASE: u8 = 0x80;
const WRITE_FLASH: u8 = 0x10;
const READ_FLASH: u8 = 0x02;
const WRITE_EEPROM: u8 = 0x11;
const READ_EEPROM: u8 = 0x03;
const WRITE_FUSE: u8 = 0x40;
const WRITE_LOCK: u8 = 0x20;
const READ_FUSE_LOCK: u8 = 0x04;
const READ_SIGNATURE: u8 = 0x08;

/// HVPP driver
#[derive(Debug)]
pub struct HvppDriver {
    pins: HvppPins,
    hv: HvPins,
    timing: Timing,
}

impl HvppDriver {
    pub fn new(pins: &PinLayout, timing: Timing) -> Self {
        Self {
            pins: pins.hvpp,
            hv: pins.hv,
            timing,
        }
    }

    fn set_controls<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, signal: Signal, byte: Byte) {
        let value = session.control(signal as usize + byte as usize);
        hw.write_port(&self.pins.control, value);
        hw.delay_us(CONTROL_SETTLE_US);
    }

    fn data_mode<H: HardwareAccess>(&self, hw: &mut H, mode: PinMode) {
        hw.set_port_mode(&self.pins.data, mode);
    }

    /// Put `data` on the bus and latch it with an XTAL pulse
    fn write_data<H: HardwareAccess>(
        &self,
        hw: &mut H,
        session: &SessionState,
        signal: Signal,
        byte: Byte,
        data: u8,
    ) {
        self.set_controls(hw, session, signal, byte);
        hw.write_port(&self.pins.data, data);
        hw.set_high(self.pins.xtal);
        hw.set_low(self.pins.xtal);
    }

    fn load_command<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, command: u8) {
        self.data_mode(hw, PinMode::Output);
        self.write_data(hw, session, Signal::LoadCommand, Byte::Low, command);
    }

    fn load_address<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, byte: Byte, address: u8) {
        self.write_data(hw, session, Signal::LoadAddress, byte, address);
    }

    fn load_data<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, byte: Byte, data: u8) {
        self.write_data(hw, session, Signal::LoadData, byte, data);
    }

    /// Commit pulse, held for `width_ms` when nonzero
    fn commit<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, byte: Byte, width_ms: u8) {
        self.set_controls(hw, session, Signal::Done, byte);
        self.set_controls(hw, session, Signal::CommitData, byte);
        if width_ms != 0 {
            hw.delay_ms(width_ms as u32);
        }
        self.set_controls(hw, session, Signal::Done, byte);
    }

    /// Read one byte; the data bus must already be an input
    fn read_data<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, byte: Byte) -> u8 {
        self.set_controls(hw, session, Signal::LoadData, byte);
        self.set_controls(hw, session, Signal::EnableRead, byte);
        hw.read_port(&self.pins.data)
    }

    /// Turn the bus around, read `byte`, and hand the bus back
    fn read_single<H: HardwareAccess>(&self, hw: &mut H, session: &SessionState, byte: Byte) -> u8 {
        self.data_mode(hw, PinMode::Input);
        let value = self.read_data(hw, session, byte);
        self.set_controls(hw, session, Signal::Done, Byte::Low);
        self.data_mode(hw, PinMode::Output);
        value
    }

    fn wait_ready<H: HardwareAccess>(&self, hw: &mut H, timeout_ms: u8) -> Result<(), ProtocolError> {
        let ready = self.pins.ready;
        wait_until(hw, timeout_ms as u32 + self.timing.hv_poll_slack_ms, |hw| {
            hw.is_high(ready)
        })
    }

    fn program_fuse_lock<H: HardwareAccess>(
        &self,
        hw: &mut H,
        session: &SessionState,
        command: u8,
        byte: Byte,
        req: &Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let value = req.byte(2)?;
        let width_ms = req.byte(3)?;
        let timeout = req.byte(4)?;

        self.load_command(hw, session, command);
        self.load_data(hw, session, Byte::Low, value);
        self.commit(hw, session, byte, width_ms);
        self.wait_ready(hw, timeout)?;
        Ok(Reply::OK)
    }

    fn read_fuse_lock<H: HardwareAccess>(
        &self,
        hw: &mut H,
        session: &SessionState,
        byte: Byte,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.load_command(hw, session, READ_FUSE_LOCK);
        let value = self.read_single(hw, session, byte);
        req.put(2, value)?;
        Ok(Reply::ok(3))
    }

    fn read_signature_byte<H: HardwareAccess>(
        &self,
        hw: &mut H,
        session: &SessionState,
        address: u8,
        byte: Byte,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.load_command(hw, session, READ_SIGNATURE);
        self.load_address(hw, session, Byte::Low, address);
        let value = self.read_single(hw, session, byte);
        req.put(2, value)?;
        Ok(Reply::ok(3))
    }
}

impl<H: HardwareAccess> ProgrammingProtocol<H> for HvppDriver {
    fn enter_progmode(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let latch_cycles = req.byte(3)?;
        let power_off_ms = req.byte(5)?;
        let reset_delay_ms = req.byte(6)?;
        let reset_delay_us = req.byte(7)?;
        info!("HVPP enter");

        hw.set_mode(self.hv.vcc, PinMode::Output);
        hw.set_low(self.hv.vcc);
        hw.set_high(self.hv.reset);
        hw.set_mode(self.hv.reset, PinMode::Output);
        hw.set_mode(self.pins.xtal, PinMode::Output);
        hw.set_low(self.pins.xtal);
        self.data_mode(hw, PinMode::Output);
        hw.set_port_mode(&self.pins.control, PinMode::Output);
        hw.set_mode(self.pins.ready, PinMode::InputPullUp);
        hw.write_port(&self.pins.control, session.control(Signal::Init as usize));

        hw.delay_ms(power_off_ms as u32);
        hw.set_high(self.hv.vcc);
        hw.delay_us(POWER_UP_US);
        for _ in 0..latch_cycles {
            hw.set_high(self.pins.xtal);
            hw.set_low(self.pins.xtal);
        }
        hw.set_low(self.hv.reset);

        hw.delay_ms(reset_delay_ms as u32);
        hw.delay_us(reset_delay_us as u32);
        self.set_controls(hw, session, Signal::Done, Byte::Low);
        Ok(Reply::OK)
    }

    fn leave_progmode(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let reset_delay_ms = req.byte(2)?;
        hw.set_high(self.hv.reset);
        hw.set_low(self.hv.vcc);
        hw.set_port_mode(&self.pins.control, PinMode::Input);
        hw.set_port_mode(&self.pins.data, PinMode::Input);
        hw.delay_ms(reset_delay_ms as u32);
        Ok(Reply::OK)
    }

    fn chip_erase(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let width_ms = req.byte(1)?;
        let timeout = req.byte(2)?;

        self.load_command(hw, session, CHIP_ERASE);
        self.commit(hw, session, Byte::Low, width_ms);
        if timeout != 0 {
            self.wait_ready(hw, timeout)?;
        }
        Ok(Reply::OK)
    }

    fn program_flash(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let len = req.be_u16(1)? as usize;
        let mode = req.byte(3)?;
        let timeout = req.byte(4)?;
        let data = req.slice(5, len)?;

        self.load_command(hw, session, WRITE_FLASH);
        // Parts without paged flash don't exist in HVPP; non-paged writes
        // only latch the commands
        if mode & 0x01 != 0 {
            let start = session.address;
            for word in data.chunks(2) {
                let high = word.get(1).copied().unwrap_or(0xFF);
                self.load_address(hw, session, Byte::Low, session.low_byte());
                self.load_data(hw, session, Byte::Low, word[0]);
                self.load_data(hw, session, Byte::High, high);
                self.set_controls(hw, session, Signal::PageLoad, Byte::High);
                self.set_controls(hw, session, Signal::Done, Byte::High);
                session.advance(1);
            }
            if mode & 0x80 != 0 {
                self.load_address(hw, session, Byte::High, (start >> 8) as u8);
                if start & EXTENDED_ADDRESS_FLAG != 0 {
                    self.load_address(hw, session, Byte::Ext, (start >> 16) as u8);
                }
                self.commit(hw, session, Byte::Low, 0);
                self.wait_ready(hw, timeout)?;
            }
        }
        self.load_command(hw, session, NO_OPERATION);
        Ok(Reply::OK)
    }

    fn read_flash(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let len = req.be_u16(1)? as usize;
        let out = req.output(2, len + 1)?;
        let (data, status) = out.split_at_mut(len);

        self.load_command(hw, session, READ_FLASH);
        let mut loaded_page = None;
        for word in data.chunks_mut(2) {
            let page = session.high_byte();
            if loaded_page != Some(page) {
                if session.is_extended() {
                    self.load_address(hw, session, Byte::Ext, session.extended_byte());
                }
                self.load_address(hw, session, Byte::High, page);
                loaded_page = Some(page);
            }
            self.load_address(hw, session, Byte::Low, session.low_byte());
            self.data_mode(hw, PinMode::Input);
            word[0] = self.read_data(hw, session, Byte::Low);
            let high = self.read_data(hw, session, Byte::High);
            if let Some(slot) = word.get_mut(1) {
                *slot = high;
            }
            self.set_controls(hw, session, Signal::Done, Byte::Low);
            self.data_mode(hw, PinMode::Output);
            session.advance(1);
        }
        status[0] = Status::CmdOk.as_byte();
        Ok(Reply::ok(len + 3))
    }

    fn program_eeprom(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let len = req.be_u16(1)? as usize;
        let mode = req.byte(3)?;
        let timeout = req.byte(4)?;
        let data = req.slice(5, len)?;

        self.load_command(hw, session, WRITE_EEPROM);
        if mode & 0x01 != 0 {
            self.load_address(hw, session, Byte::High, session.high_byte());
            for &byte in data {
                self.load_address(hw, session, Byte::Low, session.low_byte());
                self.load_data(hw, session, Byte::Low, byte);
                self.set_controls(hw, session, Signal::PageLoad, Byte::Low);
                self.set_controls(hw, session, Signal::Done, Byte::Low);
                session.advance(1);
            }
            if mode & 0x80 != 0 {
                self.commit(hw, session, Byte::Low, 0);
                self.wait_ready(hw, timeout)?;
            }
        }
        self.load_command(hw, session, NO_OPERATION);
        Ok(Reply::OK)
    }

    fn read_eeprom(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let len = req.be_u16(1)? as usize;
        let out = req.output(2, len + 1)?;
        let (data, status) = out.split_at_mut(len);

        self.load_command(hw, session, READ_EEPROM);
        let mut loaded_page = None;
        for byte in data.iter_mut() {
            let page = session.high_byte();
            if loaded_page != Some(page) {
                self.load_address(hw, session, Byte::High, page);
                loaded_page = Some(page);
            }
            self.load_address(hw, session, Byte::Low, session.low_byte());
            *byte = self.read_single(hw, session, Byte::Low);
            session.advance(1);
        }
        status[0] = Status::CmdOk.as_byte();
        Ok(Reply::ok(len + 3))
    }

    fn program_fuse(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let byte = Byte::from_index(req.byte(1)?)?;
        self.program_fuse_lock(hw, session, WRITE_FUSE, byte, req)
    }

    fn read_fuse(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        // The high fuse sits behind the second extended select
        let byte = match req.byte(1)? {
            1 => Byte::Ext2,
            index => Byte::from_index(index)?,
        };
        self.read_fuse_lock(hw, session, byte, req)
    }

    fn program_lock(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.program_fuse_lock(hw, session, WRITE_LOCK, Byte::Low, req)
    }

    fn read_lock(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_fuse_lock(hw, session, Byte::High, req)
    }

    fn read_signature(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let address = req.byte(1)?;
        self.read_signature_byte(hw, session, address, Byte::Low, req)
    }

    fn read_osc_cal(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_signature_byte(hw, session, 0x00, Byte::High, req)
    }
}
