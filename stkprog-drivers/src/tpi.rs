//! Tiny programming interface (ATtiny4/5/9/10)
//!
//! TPI is a half-duplex synchronous serial link: one clock line driven by
//! the programmer and one bidirectional data line. Frames are a zero start
//! bit, eight data bits LSB first, even parity and two stop bits. The host
//! reaches this driver through `CMD_XPROG` after selecting TPI mode, and
//! every answer uses the XPROG response layout.

use stkprog_core::config::{PinLayout, Timing, TpiPins};
use stkprog_core::{wait_until, ProtocolError, Reply, Request};
use stkprog_hal::{Clock, Gpio, PinId, PinMode};
use stkprog_protocol::commands::XPRG_ERASE_CONFIG;

const SUPPLY_SETTLE_MS: u32 = 150;
const RESET_SETTLE_MS: u32 = 10;
/// Idle bits that switch the target into TPI mode
const IDLE_BITS: usize = 32;
/// Clocks spent looking for a start bit before giving up
const START_BIT_SCAN: usize = 256;
const NVM_ENABLE_POLLS: usize = 100;

const NVM_KEY: [u8; 8] = [0xFF, 0x88, 0xD8, 0xCD, 0x45, 0xAB, 0x89, 0x12];

// Instructions
const SLD_PI: u8 = 0x24;
const SIN: u8 = 0x10;
const SOUT: u8 = 0x90;
const SSTCS: u8 = 0xC0;
const SST: u8 = 0x60;
const SST_PI: u8 = 0x64;
const SLDCS: u8 = 0x80;
const SSTPR: u8 = 0x68;
const SKEY: u8 = 0xE0;

// Control and status space
const TPISR: u8 = 0x00;
const TPISR_NVMEN: u8 = 1 << 1;
const TPIPCR: u8 = 0x02;
const TPIIR: u8 = 0x0F;
const IDENTIFICATION: u8 = 0x80;
/// Guard time of two idle bits after each answer
const GUARD_TIME_2_BITS: u8 = 0x07;

// I/O space
const NVMCSR: u8 = 0x32;
const NVMCSR_BUSY: u8 = 1 << 7;
const NVMCMD: u8 = 0x33;

// NVM controller commands
const NVM_NO_OPERATION: u8 = 0x00;
const NVM_CHIP_ERASE: u8 = 0x10;
const NVM_SECTION_ERASE: u8 = 0x14;
const NVM_WORD_WRITE: u8 = 0x1D;

/// Operand of `SIN`/`SOUT` for an I/O register address
const fn sio_address(register: u8) -> u8 {
    (register & 0x30) << 1 | (register & 0x0F)
}

/// Default XPROG answer: command, sub-command, status
const XPROG_OK: Reply = Reply::ok(3);

/// TPI driver
#[derive(Debug)]
pub struct TpiDriver {
    pins: TpiPins,
    vcc: PinId,
    hv_reset: PinId,
    timing: Timing,
}

impl TpiDriver {
    pub fn new(pins: &PinLayout, timing: Timing) -> Self {
        Self {
            pins: pins.tpi,
            vcc: pins.hv.vcc,
            hv_reset: pins.hv.reset,
            timing,
        }
    }

    fn send_bit<H: Gpio + Clock>(&self, hw: &mut H, bit: bool) {
        hw.set_state(self.pins.data, bit);
        hw.set_high(self.pins.clock);
        hw.delay_us(1);
        hw.set_low(self.pins.clock);
        hw.delay_us(1);
    }

    fn read_bit<H: Gpio + Clock>(&self, hw: &mut H) -> bool {
        hw.set_high(self.pins.clock);
        hw.delay_us(1);
        let bit = hw.is_high(self.pins.data);
        hw.set_low(self.pins.clock);
        hw.delay_us(1);
        bit
    }

    /// Send one frame, then release the data line to the pull-up
    fn send_byte<H: Gpio + Clock>(&self, hw: &mut H, byte: u8) {
        hw.set_mode(self.pins.data, PinMode::Output);
        self.send_bit(hw, false);
        let mut parity = false;
        for i in 0..8 {
            let bit = byte >> i & 1 != 0;
            parity ^= bit;
            self.send_bit(hw, bit);
        }
        self.send_bit(hw, parity);
        self.send_bit(hw, true);
        self.send_bit(hw, true);
        hw.set_mode(self.pins.data, PinMode::InputPullUp);
    }

    /// Receive one frame
    ///
    /// `None` when no start bit shows up or the parity is wrong.
    fn read_byte<H: Gpio + Clock>(&self, hw: &mut H) -> Option<u8> {
        for _ in 0..START_BIT_SCAN {
            if self.read_bit(hw) {
                continue;
            }
            let mut byte = 0u8;
            let mut parity = false;
            for _ in 0..8 {
                let bit = self.read_bit(hw);
                byte = (byte >> 1) | if bit { 0x80 } else { 0 };
                parity ^= bit;
            }
            let parity_ok = parity == self.read_bit(hw);
            self.read_bit(hw);
            self.read_bit(hw);
            if !parity_ok {
                warn!("TPI parity error");
            }
            return parity_ok.then_some(byte);
        }
        warn!("TPI start bit missing");
        None
    }

    fn set_pointer<H: Gpio + Clock>(&self, hw: &mut H, address: u16) {
        let [high, low] = address.to_be_bytes();
        self.send_byte(hw, SSTPR);
        self.send_byte(hw, low);
        self.send_byte(hw, SSTPR | 1);
        self.send_byte(hw, high);
    }

    fn set_nvm_command<H: Gpio + Clock>(&self, hw: &mut H, command: u8) {
        self.send_byte(hw, SOUT | sio_address(NVMCMD));
        self.send_byte(hw, command);
    }

    /// Wait for the NVM controller to finish
    fn wait_nvm<H: Gpio + Clock>(&self, hw: &mut H) -> Result<(), ProtocolError> {
        wait_until(hw, self.timing.tpi_nvm_timeout_ms, |hw| {
            self.send_byte(hw, SIN | sio_address(NVMCSR));
            matches!(self.read_byte(hw), Some(status) if status & NVMCSR_BUSY == 0)
        })
    }

    fn power_up<H: Gpio + Clock>(&self, hw: &mut H) {
        hw.set_mode(self.vcc, PinMode::Output);
        hw.set_low(self.vcc);
        hw.delay_ms(SUPPLY_SETTLE_MS);
        hw.set_mode(self.pins.reset, PinMode::Output);
        hw.set_mode(self.hv_reset, PinMode::Output);
        hw.set_mode(self.pins.data, PinMode::Output);
        hw.set_mode(self.pins.clock, PinMode::Output);
        hw.set_low(self.pins.data);
        hw.set_low(self.pins.clock);
        hw.set_high(self.pins.reset);
        hw.set_high(self.hv_reset);
        hw.set_high(self.vcc);
        hw.delay_ms(SUPPLY_SETTLE_MS);
        hw.set_low(self.pins.reset);
        hw.set_low(self.hv_reset);
        hw.delay_ms(RESET_SETTLE_MS);
        for _ in 0..IDLE_BITS {
            self.send_bit(hw, true);
        }
    }

    /// `XPRG_CMD_ENTER_PROGMODE`: power up, check the identification
    /// register and unlock the NVM controller
    pub fn enter_progmode<H: Gpio + Clock>(&mut self, hw: &mut H) -> Result<Reply, ProtocolError> {
        info!("TPI enter");
        self.power_up(hw);

        self.send_byte(hw, SSTCS | TPIPCR);
        self.send_byte(hw, GUARD_TIME_2_BITS);
        self.send_byte(hw, SLDCS | TPIIR);
        match self.read_byte(hw) {
            Some(IDENTIFICATION) => {}
            other => {
                warn!("TPI identification mismatch: {}", other);
                return Err(ProtocolError::Failed);
            }
        }

        self.send_byte(hw, SKEY);
        for byte in NVM_KEY {
            self.send_byte(hw, byte);
        }

        for _ in 0..NVM_ENABLE_POLLS {
            self.send_byte(hw, SLDCS | TPISR);
            match self.read_byte(hw) {
                None => break,
                Some(status) if status & TPISR_NVMEN != 0 => return Ok(XPROG_OK),
                Some(_) => {}
            }
        }
        warn!("TPI NVM controller not enabled");
        Err(ProtocolError::Failed)
    }

    /// `XPRG_CMD_LEAVE_PROGMODE`: release reset and switch the target off
    pub fn leave_progmode<H: Gpio + Clock>(&mut self, hw: &mut H) -> Result<Reply, ProtocolError> {
        hw.set_high(self.pins.reset);
        hw.set_high(self.hv_reset);
        hw.set_low(self.vcc);
        hw.set_mode(self.pins.data, PinMode::Input);
        hw.set_mode(self.pins.clock, PinMode::Input);
        Ok(XPROG_OK)
    }

    /// `XPRG_CMD_ERASE`: chip erase, or section erase for the
    /// configuration section
    pub fn erase<H: Gpio + Clock>(&mut self, hw: &mut H, req: &Request<'_>) -> Result<Reply, ProtocolError> {
        let mode = req.byte(2)?;
        let address = req.be_u32(3)? as u16;

        self.set_pointer(hw, address);
        let command = if mode == XPRG_ERASE_CONFIG {
            NVM_SECTION_ERASE
        } else {
            NVM_CHIP_ERASE
        };
        self.set_nvm_command(hw, command);
        // Dummy write to any address in the section starts the erase
        self.send_byte(hw, SST);
        self.send_byte(hw, 0xFF);
        self.wait_nvm(hw)?;
        self.set_nvm_command(hw, NVM_NO_OPERATION);
        self.wait_nvm(hw)?;
        Ok(XPROG_OK)
    }

    /// `XPRG_CMD_WRITE_MEM`: word writes with post-increment
    pub fn write_mem<H: Gpio + Clock>(&mut self, hw: &mut H, req: &Request<'_>) -> Result<Reply, ProtocolError> {
        let address = req.be_u32(4)? as u16;
        let len = req.be_u16(8)? as usize;
        let data = req.slice(10, len)?;

        self.set_pointer(hw, address);
        self.set_nvm_command(hw, NVM_WORD_WRITE);
        for word in data.chunks(2) {
            self.send_byte(hw, SST_PI);
            self.send_byte(hw, word[0]);
            self.send_byte(hw, SST_PI);
            self.send_byte(hw, word.get(1).copied().unwrap_or(0xFF));
            self.wait_nvm(hw)?;
        }
        self.set_nvm_command(hw, NVM_NO_OPERATION);
        self.wait_nvm(hw)?;
        Ok(XPROG_OK)
    }

    /// `XPRG_CMD_READ_MEM`: data goes to `BODY[3..]`
    pub fn read_mem<H: Gpio + Clock>(&mut self, hw: &mut H, req: &mut Request<'_>) -> Result<Reply, ProtocolError> {
        let address = req.be_u32(3)? as u16;
        let len = req.be_u16(7)? as usize;
        let out = req.output(3, len)?;

        self.set_pointer(hw, address);
        for byte in out.iter_mut() {
            self.send_byte(hw, SLD_PI);
            *byte = self.read_byte(hw).ok_or(ProtocolError::Failed)?;
        }
        Ok(Reply::ok(len + 3))
    }

    /// `XPRG_CMD_SET_PARAM`: nothing to configure for TPI
    pub fn set_param(&mut self, _req: &Request<'_>) -> Result<Reply, ProtocolError> {
        Ok(XPROG_OK)
    }
}
