//! High-voltage serial programming
//!
//! Every exchange with the target is an 11-clock frame carrying an
//! instruction byte on SII and a data byte on SDI, MSB first after a zero
//! start bit. The target shifts a byte out on SDO during the same frame.
//! Between frames SDO is the RDY/BSY line.

use stkprog_core::config::{HvPins, HvspPins, PinLayout, Timing};
use stkprog_core::{wait_until, ProgrammingProtocol, ProtocolError, Reply, Request, SessionState};
use stkprog_hal::{HardwareAccess, PinMode};
use stkprog_protocol::Status;

const POWER_UP_US: u32 = 80;
const SYNC_PULSE_US: u32 = 10;

/// Instruction carrying a Load Command in its data byte
const LOAD_COMMAND: u8 = 0x4C;

// Load Command codes
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

// Instruction pairs per fuse address: low, high, extended
const FUSE_WRITE: [(u8, u8); 3] = [(0x64, 0x6C), (0x74, 0x7C), (0x66, 0x6E)];
const FUSE_READ: [(u8, u8); 3] = [(0x68, 0x6C), (0x7A, 0x7C), (0x6A, 0x6E)];

/// HVSP driver
#[derive(Debug)]
pub struct HvspDriver {
    pins: HvspPins,
    hv: HvPins,
    timing: Timing,
}

impl HvspDriver {
    pub fn new(pins: &PinLayout, timing: Timing) -> Self {
        Self {
            pins: pins.hvsp,
            hv: pins.hv,
            timing,
        }
    }

    fn bit<H: HardwareAccess>(&self, hw: &mut H, instr: bool, data: bool) -> bool {
        hw.set_state(self.pins.sii, instr);
        hw.set_state(self.pins.sdi, data);
        hw.set_high(self.pins.sci);
        hw.set_low(self.pins.sci);
        hw.is_high(self.pins.sdo)
    }

    /// One frame; returns the byte the target shifted out
    fn transfer<H: HardwareAccess>(&self, hw: &mut H, instr: u8, data: u8) -> u8 {
        let mut out = self.bit(hw, false, false) as u8;
        for i in (1..8).rev() {
            let bit = self.bit(hw, instr >> i & 1 != 0, data >> i & 1 != 0);
            out = (out << 1) | bit as u8;
        }
        self.bit(hw, instr & 1 != 0, data & 1 != 0);
        self.bit(hw, false, false);
        self.bit(hw, false, false);
        out
    }

    fn load_command<H: HardwareAccess>(&self, hw: &mut H, command: u8) {
        self.transfer(hw, LOAD_COMMAND, command);
    }

    /// Wait for SDO to go high, allowing the host's timeout plus slack
    fn wait_ready<H: HardwareAccess>(&self, hw: &mut H, timeout_ms: u8) -> Result<(), ProtocolError> {
        let sdo = self.pins.sdo;
        wait_until(hw, timeout_ms as u32 + self.timing.hv_poll_slack_ms, |hw| {
            hw.is_high(sdo)
        })
    }

    fn setup<H: HardwareAccess>(&self, hw: &mut H, power_off_ms: u8, sync_cycles: u8) {
        hw.set_mode(self.hv.vcc, PinMode::Output);
        hw.set_low(self.hv.vcc);
        // Latch high before driving so RESET never glitches to 12 V
        hw.set_high(self.hv.reset);
        hw.set_mode(self.hv.reset, PinMode::Output);
        for pin in [self.pins.sci, self.pins.sdi, self.pins.sii, self.pins.sdo] {
            hw.set_mode(pin, PinMode::Output);
            hw.set_low(pin);
        }

        hw.delay_ms(power_off_ms as u32);
        hw.set_high(self.hv.vcc);
        hw.delay_us(POWER_UP_US);
        for _ in 0..sync_cycles {
            hw.set_high(self.pins.sci);
            hw.delay_us(SYNC_PULSE_US);
            hw.set_low(self.pins.sci);
        }
        hw.set_low(self.hv.reset);
        hw.delay_us(1);
        hw.set_mode(self.pins.sdo, PinMode::Input);
    }

    fn program_fuse_lock<H: HardwareAccess>(
        &self,
        hw: &mut H,
        command: u8,
        (write, commit): (u8, u8),
        req: &Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let value = req.byte(2)?;
        let timeout = req.byte(3)?;
        self.load_command(hw, command);
        self.transfer(hw, 0x2C, value);
        self.transfer(hw, write, 0x00);
        self.transfer(hw, commit, 0x00);
        self.wait_ready(hw, timeout)?;
        Ok(Reply::OK)
    }

    fn read_fuse_lock<H: HardwareAccess>(
        &self,
        hw: &mut H,
        (select, read): (u8, u8),
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.load_command(hw, READ_FUSE_LOCK);
        self.transfer(hw, select, 0x00);
        let value = self.transfer(hw, read, 0x00);
        req.put(2, value)?;
        Ok(Reply::ok(3))
    }

    fn read_signature_byte<H: HardwareAccess>(
        &self,
        hw: &mut H,
        address: u8,
        (select, read): (u8, u8),
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.load_command(hw, READ_SIGNATURE);
        self.transfer(hw, 0x0C, address);
        self.transfer(hw, select, 0x00);
        let value = self.transfer(hw, read, 0x00);
        req.put(2, value)?;
        Ok(Reply::ok(3))
    }
}

/// Fuse address from `BODY[1]`: 0 low, 1 high, 2 extended
fn fuse_index(req: &Request<'_>) -> Result<usize, ProtocolError> {
    match req.byte(1)? {
        index @ 0..=2 => Ok(index as usize),
        _ => Err(ProtocolError::Malformed),
    }
}

impl<H: HardwareAccess> ProgrammingProtocol<H> for HvspDriver {
    fn enter_progmode(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let sync_cycles = req.byte(3)?;
        let power_off_ms = req.byte(6)?;
        info!("HVSP enter");
        self.setup(hw, power_off_ms, sync_cycles);
        Ok(Reply::OK)
    }

    fn leave_progmode(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        _req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        hw.set_high(self.hv.reset);
        hw.set_low(self.hv.vcc);
        for pin in [self.pins.sdi, self.pins.sii, self.pins.sci] {
            hw.set_mode(pin, PinMode::Input);
        }
        Ok(Reply::OK)
    }

    fn chip_erase(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let timeout = req.byte(1)?;
        let erase_ms = req.byte(2)?;

        self.load_command(hw, CHIP_ERASE);
        self.transfer(hw, 0x64, 0x00);
        self.transfer(hw, 0x6C, 0x00);
        if timeout != 0 {
            self.wait_ready(hw, timeout)?;
        } else {
            hw.delay_ms(erase_ms as u32);
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
        let start = session.address;

        self.load_command(hw, WRITE_FLASH);
        if mode & 0x01 != 0 {
            for word in data.chunks(2) {
                let high = word.get(1).copied().unwrap_or(0xFF);
                self.transfer(hw, 0x0C, session.low_byte());
                self.transfer(hw, 0x2C, word[0]);
                self.transfer(hw, 0x6D, 0x00);
                self.transfer(hw, 0x6C, 0x00);
                self.transfer(hw, 0x3C, high);
                self.transfer(hw, 0x7D, 0x00);
                self.transfer(hw, 0x7C, 0x00);
                session.advance(1);
            }
            if mode & 0x80 != 0 {
                self.transfer(hw, 0x1C, (start >> 8) as u8);
                self.transfer(hw, 0x64, 0x00);
                self.transfer(hw, 0x6C, 0x00);
                self.wait_ready(hw, timeout)?;
            }
        } else {
            // Word mode (ATtiny11/12)
            self.transfer(hw, 0x1C, (start >> 8) as u8);
            for word in data.chunks(2) {
                let high = word.get(1).copied().unwrap_or(0xFF);
                self.transfer(hw, 0x0C, session.low_byte());
                self.transfer(hw, 0x2C, word[0]);
                self.transfer(hw, 0x64, 0x00);
                self.transfer(hw, 0x6C, 0x00);
                self.transfer(hw, 0x3C, high);
                self.transfer(hw, 0x74, 0x00);
                self.transfer(hw, 0x7C, 0x00);
                session.advance(1);
                self.wait_ready(hw, timeout)?;
            }
        }
        self.load_command(hw, NO_OPERATION);
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

        self.load_command(hw, READ_FLASH);
        let mut loaded_page = None;
        for word in data.chunks_mut(2) {
            self.transfer(hw, 0x0C, session.low_byte());
            let page = session.high_byte();
            if loaded_page != Some(page) {
                self.transfer(hw, 0x1C, page);
                loaded_page = Some(page);
            }
            self.transfer(hw, 0x68, 0x00);
            word[0] = self.transfer(hw, 0x6C, 0x00);
            self.transfer(hw, 0x78, 0x00);
            let high = self.transfer(hw, 0x7C, 0x00);
            if let Some(slot) = word.get_mut(1) {
                *slot = high;
            }
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

        self.load_command(hw, WRITE_EEPROM);
        if mode & 0x01 != 0 {
            for &byte in data {
                self.transfer(hw, 0x0C, session.low_byte());
                self.transfer(hw, 0x1C, session.high_byte());
                self.transfer(hw, 0x2C, byte);
                self.transfer(hw, 0x6D, 0x00);
                self.transfer(hw, 0x6C, 0x00);
                session.advance(1);
            }
            if mode & 0x80 != 0 {
                self.transfer(hw, 0x64, 0x00);
                self.transfer(hw, 0x6C, 0x00);
                self.wait_ready(hw, timeout)?;
            }
        } else {
            for &byte in data {
                self.transfer(hw, 0x0C, session.low_byte());
                self.transfer(hw, 0x2C, byte);
                self.transfer(hw, 0x64, 0x00);
                self.transfer(hw, 0x6C, 0x00);
                session.advance(1);
                self.wait_ready(hw, timeout)?;
            }
        }
        self.load_command(hw, NO_OPERATION);
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

        self.load_command(hw, READ_EEPROM);
        for byte in data.iter_mut() {
            self.transfer(hw, 0x0C, session.low_byte());
            self.transfer(hw, 0x1C, session.high_byte());
            self.transfer(hw, 0x68, 0x00);
            *byte = self.transfer(hw, 0x6C, 0x00);
            session.advance(1);
        }
        status[0] = Status::CmdOk.as_byte();
        Ok(Reply::ok(len + 3))
    }

    fn program_fuse(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let index = fuse_index(req)?;
        self.program_fuse_lock(hw, WRITE_FUSE, FUSE_WRITE[index], req)
    }

    fn read_fuse(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let index = fuse_index(req)?;
        self.read_fuse_lock(hw, FUSE_READ[index], req)
    }

    fn program_lock(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.program_fuse_lock(hw, WRITE_LOCK, (0x64, 0x6C), req)
    }

    fn read_lock(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_fuse_lock(hw, (0x78, 0x6C), req)
    }

    fn read_signature(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let address = req.byte(1)?;
        self.read_signature_byte(hw, address, (0x68, 0x6C), req)
    }

    fn read_osc_cal(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_signature_byte(hw, 0x00, (0x78, 0x7C), req)
    }
}
