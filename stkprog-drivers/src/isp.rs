//! In-system programming over SPI
//!
//! The host sends the target's raw four-byte SPI instructions with every
//! command, so this driver mostly places address and data bytes into
//! those instructions and decides how to wait for the target.
//!
//! Transactions first go through the hardware SPI peripheral. If the
//! target does not echo the programming-enable instruction, the driver
//! falls back to bit-banging and keeps halving the clock until the target
//! answers or the slow-down ladder runs out.

use stkprog_core::config::{IspPins, PinLayout, Timing};
use stkprog_core::{wait_until, ProgrammingProtocol, ProtocolError, Reply, Request, SessionState};
use stkprog_hal::{HardwareAccess, PinMode, SpiConfig};
use stkprog_protocol::frame::MAX_BODY_SIZE;
use stkprog_protocol::Status;

/// Settle time after each reset edge while entering programming mode
const RESET_SETTLE_MS: u32 = 50;

/// Load Extended Address instruction
const LOAD_EXTENDED_ADDRESS: u8 = 0x4D;

/// Poll RDY/BSY instruction; bit 0 of the answer is set while busy
const POLL_READY: u8 = 0xF0;

// Mode byte of the program memory commands. In page mode the wait bits
// sit three places higher.
const MODE_PAGED: u8 = 0x01;
const MODE_TIMED: u8 = 0x02;
const MODE_VALUE_POLL: u8 = 0x04;
const MODE_READY_POLL: u8 = 0x08;
const MODE_PAGE_WRITE: u8 = 0x80;

/// Bit in a flash instruction selecting the high byte of a word
const HIGH_BYTE: u8 = 0x08;

/// Hardware SPI clock for the host's SCK duration selector
pub fn sck_frequency(sck_duration: u16) -> u32 {
    match sck_duration {
        0 => 2_000_000,
        1 => 500_000,
        _ => 125_000,
    }
}

/// How SPI bytes reach the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum SpiPath {
    Hardware,
    /// Bit-banged, each clock phase lasting `1 << slowdown` µs
    Software { slowdown: u8 },
}

/// Arguments of `CMD_ENTER_PROGMODE_ISP`
#[derive(Debug, Clone, Copy)]
struct EnterArgs {
    poll_value: u8,
    /// 1-based position of the echo byte, 0 = don't check
    poll_index: u8,
    command: [u8; 4],
}

impl EnterArgs {
    fn parse(req: &Request<'_>) -> Result<Self, ProtocolError> {
        let cmd = req.slice(8, 4)?;
        Ok(Self {
            poll_value: req.byte(6)?,
            poll_index: req.byte(7)?,
            command: [cmd[0], cmd[1], cmd[2], cmd[3]],
        })
    }
}

/// Arguments of `CMD_PROGRAM_FLASH_ISP` / `CMD_PROGRAM_EEPROM_ISP`
#[derive(Debug)]
struct ProgramArgs<'r> {
    mode: u8,
    delay_ms: u8,
    load: u8,
    write_page: u8,
    read: u8,
    poll_values: [u8; 2],
    data: &'r [u8],
}

impl<'r> ProgramArgs<'r> {
    fn parse(req: &'r Request<'_>) -> Result<Self, ProtocolError> {
        let len = req.be_u16(1)? as usize;
        Ok(Self {
            mode: req.byte(3)?,
            delay_ms: req.byte(4)?,
            load: req.byte(5)?,
            write_page: req.byte(6)?,
            read: req.byte(7)?,
            poll_values: [req.byte(8)?, req.byte(9)?],
            data: req.slice(10, len)?,
        })
    }
}

/// ISP driver
#[derive(Debug)]
pub struct IspDriver {
    pins: IspPins,
    timing: Timing,
    path: SpiPath,
}

impl IspDriver {
    pub fn new(pins: &PinLayout, timing: Timing) -> Self {
        Self {
            pins: pins.isp,
            timing,
            path: SpiPath::Hardware,
        }
    }

    /// Whether the driver had to fall back to bit-banged SPI
    pub fn is_bit_banging(&self) -> bool {
        matches!(self.path, SpiPath::Software { .. })
    }

    /// Clock one byte out and one byte in
    fn transfer<H: HardwareAccess>(&mut self, hw: &mut H, out: u8) -> u8 {
        let quarter = match self.path {
            SpiPath::Hardware => return hw.transfer(out),
            SpiPath::Software { slowdown } => 1u32 << slowdown,
        };

        let mut input = 0u8;
        for bit in (0..8).rev() {
            hw.set_state(self.pins.mosi, out & (1 << bit) != 0);
            hw.delay_us(quarter);
            hw.set_high(self.pins.sck);
            hw.delay_us(quarter);
            input = (input << 1) | hw.is_high(self.pins.miso) as u8;
            hw.delay_us(quarter);
            hw.set_low(self.pins.sck);
            hw.delay_us(quarter);
        }
        input
    }

    /// Send a four-byte instruction and keep the byte at `response_index`
    fn transaction<H: HardwareAccess>(
        &mut self,
        hw: &mut H,
        command: [u8; 4],
        response_index: usize,
    ) -> u8 {
        let mut response = 0;
        for (i, byte) in command.into_iter().enumerate() {
            let received = self.transfer(hw, byte);
            if i == response_index {
                response = received;
            }
        }
        response
    }

    /// Instruction with a 16-bit address in bytes 1 and 2
    fn addressed<H: HardwareAccess>(&mut self, hw: &mut H, cmd: u8, address: u32, data: u8) -> u8 {
        let [_, _, hi, lo] = address.to_be_bytes();
        self.transaction(hw, [cmd, hi, lo, data], 3)
    }

    /// Switch to bit-banged SPI at the fastest software rate
    fn start_software(&mut self, hw: &mut impl HardwareAccess) {
        hw.disable();
        hw.set_mode(self.pins.mosi, PinMode::Output);
        hw.set_mode(self.pins.sck, PinMode::Output);
        hw.set_mode(self.pins.miso, PinMode::Input);
        self.path = SpiPath::Software { slowdown: 1 };
    }

    /// Halve the software clock; false once the ladder is exhausted
    fn slow_down(&mut self) -> bool {
        match &mut self.path {
            SpiPath::Software { slowdown } if *slowdown + 1 < self.timing.isp_max_slowdown => {
                *slowdown += 1;
                debug!("ISP slowing down, quarter period {} us", 1u32 << *slowdown);
                true
            }
            _ => false,
        }
    }

    fn pulse_reset(&mut self, hw: &mut impl HardwareAccess) {
        hw.set_high(self.pins.reset);
        hw.set_low(self.pins.sck);
        hw.delay_ms(RESET_SETTLE_MS);
        hw.set_low(self.pins.reset);
        hw.delay_ms(RESET_SETTLE_MS);
    }

    /// Wait for RDY/BSY to report ready
    fn wait_ready<H: HardwareAccess>(&mut self, hw: &mut H) -> Result<(), ProtocolError> {
        wait_until(hw, self.timing.isp_ready_timeout_ms, |hw| {
            self.transaction(hw, [POLL_READY, 0, 0, 0], 3) & 0x01 == 0
        })
    }

    /// Issue Load Extended Address when the address crossed into a new
    /// 64K-word block
    ///
    /// Bits 24..32 of the session address hold the extended flag plus the
    /// block last loaded, bits 16..24 the block the address is in now.
    fn load_extended_address<H: HardwareAccess>(&mut self, hw: &mut H, session: &mut SessionState) {
        let [ext, block, _, _] = session.address.to_be_bytes();
        if ext == block {
            return;
        }
        let block = block & 0x7F;
        trace!("load extended address {:#x}", block);
        self.transaction(hw, [LOAD_EXTENDED_ADDRESS, 0, block, 0], 3);

        let marker = 0x80 | block;
        session.address = (session.address & 0xFFFF) | u32::from_be_bytes([marker, marker, 0, 0]);
    }

    fn program_memory<H: HardwareAccess>(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
        word_based: bool,
    ) -> Result<Reply, ProtocolError> {
        let args = ProgramArgs::parse(req)?;
        self.load_extended_address(hw, session);
        let start = session.address;

        if word_based {
            for word in args.data.chunks(2) {
                self.addressed(hw, args.load, session.address, word[0]);
                if let Some(&high) = word.get(1) {
                    self.addressed(hw, args.load | HIGH_BYTE, session.address, high);
                }
                session.advance(1);
            }
        } else {
            for &byte in args.data {
                self.addressed(hw, args.load, session.address, byte);
                session.advance(1);
            }
        }

        let mut mode = args.mode;
        if mode & MODE_PAGED != 0 {
            if mode & MODE_PAGE_WRITE == 0 {
                return Ok(Reply::OK);
            }
            self.addressed(hw, args.write_page, start, 0);
            mode >>= 3;
        }

        // Each completion bit is honoured on its own, in this order
        if mode & MODE_TIMED != 0 {
            hw.delay_ms(args.delay_ms as u32);
        }
        if mode & MODE_VALUE_POLL != 0 {
            let poll_value = args.poll_values[if word_based { 0 } else { 1 }];
            match args.data.first() {
                Some(&first) if first != poll_value => {
                    wait_until(hw, self.timing.isp_ready_timeout_ms, |hw| {
                        self.addressed(hw, args.read, start, 0) != poll_value
                    })?;
                }
                // Can't tell the written value from the poll value
                _ => hw.delay_ms(args.delay_ms as u32),
            }
        }
        if mode & MODE_READY_POLL != 0 {
            self.wait_ready(hw)?;
        }
        Ok(Reply::OK)
    }

    fn read_memory<H: HardwareAccess>(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
        word_based: bool,
    ) -> Result<Reply, ProtocolError> {
        let len = req.be_u16(1)? as usize;
        let cmd = req.byte(3)?;
        let out = req.output(2, len + 1)?;
        self.load_extended_address(hw, session);

        let (data, status) = out.split_at_mut(len);
        if word_based {
            for word in data.chunks_mut(2) {
                word[0] = self.addressed(hw, cmd, session.address, 0);
                let high = self.addressed(hw, cmd | HIGH_BYTE, session.address, 0);
                if let Some(slot) = word.get_mut(1) {
                    *slot = high;
                }
                session.advance(1);
            }
        } else {
            for byte in data.iter_mut() {
                *byte = self.addressed(hw, cmd, session.address, 0);
                session.advance(1);
            }
        }
        status[0] = Status::CmdOk.as_byte();
        Ok(Reply::ok(len + 3))
    }

    /// Send the instruction in `BODY[1..5]`
    fn write_instruction<H: HardwareAccess>(
        &mut self,
        hw: &mut H,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let cmd = req.slice(1, 4)?;
        let command = [cmd[0], cmd[1], cmd[2], cmd[3]];
        self.transaction(hw, command, 3);
        req.put(2, Status::CmdOk.as_byte())?;
        Ok(Reply::ok(3))
    }

    /// Send the instruction in `BODY[2..6]` and answer with the byte at
    /// the 1-based position in `BODY[1]`
    fn read_instruction<H: HardwareAccess>(
        &mut self,
        hw: &mut H,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let index = match req.byte(1)? {
            index @ 1..=4 => index as usize - 1,
            _ => return Err(ProtocolError::Malformed),
        };
        let cmd = req.slice(2, 4)?;
        let command = [cmd[0], cmd[1], cmd[2], cmd[3]];
        let value = self.transaction(hw, command, index);
        let out = req.output(2, 2)?;
        out[0] = value;
        out[1] = Status::CmdOk.as_byte();
        Ok(Reply::ok(4))
    }

    /// `CMD_SPI_MULTI`: free-form SPI exchange
    ///
    /// Sends `BODY[4..4 + num_tx]`, skips the first `rx_start` received
    /// bytes and answers with the next `num_rx`, clocking out zeros once the
    /// transmit bytes run out.
    pub fn spi_multi<H: HardwareAccess>(
        &mut self,
        hw: &mut H,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let num_tx = req.byte(1)? as usize;
        let num_rx = req.byte(2)? as usize;
        let mut skip = req.byte(3)?;

        let mut tx = [0u8; MAX_BODY_SIZE];
        tx[..num_tx].copy_from_slice(req.slice(4, num_tx)?);

        let out = req.output(2, num_rx + 1)?;
        let mut received = 0;
        let mut outgoing = tx[..num_tx].iter().copied();
        while received < num_rx || outgoing.len() > 0 {
            let byte = self.transfer(hw, outgoing.next().unwrap_or(0));
            if skip > 0 {
                skip -= 1;
            } else if received < num_rx {
                out[received] = byte;
                received += 1;
            }
        }
        out[num_rx] = Status::CmdOk.as_byte();
        Ok(Reply::ok(num_rx + 3))
    }
}

impl<H: HardwareAccess> ProgrammingProtocol<H> for IspDriver {
    fn enter_progmode(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let args = EnterArgs::parse(req)?;
        let frequency = sck_frequency(session.sck_duration);
        info!("ISP enter, SCK {} Hz", frequency);

        hw.set_mode(self.pins.reset, PinMode::Output);
        hw.enable(SpiConfig::new(frequency));
        self.path = SpiPath::Hardware;
        hw.start_clock(self.timing.target_clock_hz);
        hw.set_low(self.pins.sck);
        hw.delay_ms(RESET_SETTLE_MS);
        hw.set_low(self.pins.reset);
        hw.delay_ms(RESET_SETTLE_MS);

        let echo_index = match args.poll_index {
            0 => {
                self.transaction(hw, args.command, 0);
                return Ok(Reply::OK);
            }
            index => (index as usize - 1).min(3),
        };

        let mut response = self.transaction(hw, args.command, echo_index);
        if response != args.poll_value {
            self.start_software(hw);
            while response != args.poll_value && self.slow_down() {
                self.pulse_reset(hw);
                response = self.transaction(hw, args.command, echo_index);
            }
        }

        if response == args.poll_value {
            Ok(Reply::OK)
        } else {
            warn!("ISP target did not answer program enable");
            Err(ProtocolError::Failed)
        }
    }

    fn leave_progmode(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        _req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        hw.stop_clock();
        if self.is_bit_banging() {
            hw.set_mode(self.pins.mosi, PinMode::Input);
            hw.set_mode(self.pins.sck, PinMode::Input);
        } else {
            hw.disable();
        }
        self.path = SpiPath::Hardware;
        hw.set_high(self.pins.reset);
        Ok(Reply::OK)
    }

    fn chip_erase(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        let delay_ms = req.byte(1)?;
        let poll = req.byte(2)?;
        let cmd = req.slice(3, 4)?;
        let command = [cmd[0], cmd[1], cmd[2], cmd[3]];

        self.transaction(hw, command, 3);
        if poll != 0 {
            self.wait_ready(hw)?;
        } else {
            hw.delay_ms(delay_ms as u32);
        }
        Ok(Reply::OK)
    }

    fn program_flash(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.program_memory(hw, session, req, true)
    }

    fn read_flash(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_memory(hw, session, req, true)
    }

    fn program_eeprom(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.program_memory(hw, session, req, false)
    }

    fn read_eeprom(
        &mut self,
        hw: &mut H,
        session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_memory(hw, session, req, false)
    }

    fn program_fuse(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.write_instruction(hw, req)
    }

    fn read_fuse(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_instruction(hw, req)
    }

    fn program_lock(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.write_instruction(hw, req)
    }

    fn read_lock(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_instruction(hw, req)
    }

    fn read_signature(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_instruction(hw, req)
    }

    fn read_osc_cal(
        &mut self,
        hw: &mut H,
        _session: &mut SessionState,
        req: &mut Request<'_>,
    ) -> Result<Reply, ProtocolError> {
        self.read_instruction(hw, req)
    }
}
