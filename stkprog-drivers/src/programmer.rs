//! Command dispatcher
//!
//! [`Programmer`] owns everything a request can touch: the board, its
//! configuration, the session state, the framing engine and the active
//! protocol driver. Each completed request is routed to a general handler
//! or to the driver of its family, and exactly one response goes back.

use embedded_io::{Read, ReadReady, Write};
use stkprog_core::config::ProgrammerConfig;
use stkprog_core::{general, Family, ProgrammingProtocol, ProtocolError, Reply, Request, SessionState};
use stkprog_hal::HardwareAccess;
use stkprog_protocol::commands::*;
use stkprog_protocol::{FrameEngine, PollError};

use crate::{HvppDriver, HvspDriver, IspDriver, TpiDriver};

// Low nibble of the per-family opcodes
const OP_ENTER_PROGMODE: u8 = 0x0;
const OP_LEAVE_PROGMODE: u8 = 0x1;
const OP_CHIP_ERASE: u8 = 0x2;
const OP_PROGRAM_FLASH: u8 = 0x3;
const OP_READ_FLASH: u8 = 0x4;
const OP_PROGRAM_EEPROM: u8 = 0x5;
const OP_READ_EEPROM: u8 = 0x6;
const OP_PROGRAM_FUSE: u8 = 0x7;
const OP_READ_FUSE: u8 = 0x8;
const OP_PROGRAM_LOCK: u8 = 0x9;
const OP_READ_LOCK: u8 = 0xA;
const OP_READ_SIGNATURE: u8 = 0xB;
const OP_READ_OSCCAL: u8 = 0xC;

/// Default XPROG answer length: command, sub-command, status
const XPROG_REPLY_LEN: usize = 3;

/// Family owning a per-family opcode
fn family_of(command: u8) -> Option<Family> {
    match command {
        CMD_ENTER_PROGMODE_ISP..=CMD_READ_OSCCAL_ISP => Some(Family::Isp),
        CMD_ENTER_PROGMODE_PP..=CMD_READ_OSCCAL_PP => Some(Family::Hvpp),
        CMD_ENTER_PROGMODE_HVSP..=CMD_READ_OSCCAL_HVSP => Some(Family::Hvsp),
        _ => None,
    }
}

/// Driver of the active programming mode
#[derive(Debug)]
pub enum ProtocolDriver {
    Isp(IspDriver),
    Hvsp(HvspDriver),
    Hvpp(HvppDriver),
    Tpi(TpiDriver),
}

impl ProtocolDriver {
    /// Fresh driver for `family` on the configured board
    pub fn new(family: Family, config: &ProgrammerConfig) -> Self {
        let (pins, timing) = (&config.pins, config.timing);
        match family {
            Family::Isp => ProtocolDriver::Isp(IspDriver::new(pins, timing)),
            Family::Hvsp => ProtocolDriver::Hvsp(HvspDriver::new(pins, timing)),
            Family::Hvpp => ProtocolDriver::Hvpp(HvppDriver::new(pins, timing)),
            Family::Tpi => ProtocolDriver::Tpi(TpiDriver::new(pins, timing)),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            ProtocolDriver::Isp(_) => Family::Isp,
            ProtocolDriver::Hvsp(_) => Family::Hvsp,
            ProtocolDriver::Hvpp(_) => Family::Hvpp,
            ProtocolDriver::Tpi(_) => Family::Tpi,
        }
    }

    /// The common operation set; TPI has none
    pub fn protocol<H: HardwareAccess>(&mut self) -> Option<&mut dyn ProgrammingProtocol<H>> {
        match self {
            ProtocolDriver::Isp(isp) => Some(isp),
            ProtocolDriver::Hvsp(hvsp) => Some(hvsp),
            ProtocolDriver::Hvpp(hvpp) => Some(hvpp),
            ProtocolDriver::Tpi(_) => None,
        }
    }
}

/// The programmer: one request at a time, start to finish
pub struct Programmer<H> {
    hw: H,
    config: ProgrammerConfig,
    session: SessionState,
    engine: FrameEngine,
    driver: Option<ProtocolDriver>,
}

impl<H: HardwareAccess> Programmer<H> {
    pub fn new(hw: H, config: ProgrammerConfig) -> Self {
        Self {
            hw,
            config,
            session: SessionState::new(),
            engine: FrameEngine::new(),
            driver: None,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn config(&self) -> &ProgrammerConfig {
        &self.config
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    /// Driver of the current programming mode, if any
    pub fn driver(&self) -> Option<&ProtocolDriver> {
        self.driver.as_ref()
    }

    /// Take at most one byte from `link`, and answer the request it
    /// completes
    ///
    /// Returns `Ok(true)` when a request was executed. Framing errors are
    /// passed on for logging; a checksum error has already been answered
    /// by then.
    pub fn poll<L>(&mut self, link: &mut L) -> Result<bool, PollError<L::Error>>
    where
        L: Read + ReadReady + Write,
    {
        match self.engine.poll(link)? {
            Some(_) => {
                self.execute(link).map_err(PollError::Io)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run the request held by the engine and send its response
    fn execute<W: Write>(&mut self, link: &mut W) -> Result<(), W::Error> {
        let (body, size) = self.engine.request_mut();
        let mut req = Request::new(body, size);
        let command = req.command();
        let outcome = dispatch(
            &mut self.hw,
            &self.config,
            &mut self.session,
            &mut self.driver,
            &mut req,
        );

        if command == CMD_XPROG {
            let (status, len) = match outcome {
                Ok(reply) => (reply.status, reply.len),
                Err(err) => (err.status(), XPROG_REPLY_LEN),
            };
            self.engine.send_xprog_response(link, status, len)
        } else {
            let (status, len) = match outcome {
                Ok(reply) => (reply.status, reply.len),
                Err(err) => (err.status(), 2),
            };
            self.engine.send_response(link, status, len)
        }
    }
}

fn dispatch<H: HardwareAccess>(
    hw: &mut H,
    config: &ProgrammerConfig,
    session: &mut SessionState,
    driver: &mut Option<ProtocolDriver>,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    let command = req.command();
    let outcome = match command {
        CMD_SIGN_ON => general::sign_on(&config.identity, req),
        CMD_SET_PARAMETER => general::set_parameter(session, req),
        CMD_GET_PARAMETER => general::get_parameter(session, &config.identity, req),
        CMD_LOAD_ADDRESS => general::load_address(session, req),
        CMD_SET_CONTROL_STACK => general::set_control_stack(session, req),
        CMD_XPROG_SETMODE => general::set_xprog_mode(session, req),
        CMD_XPROG => xprog(hw, config, session, driver, req),
        CMD_SPI_MULTI => match driver {
            Some(ProtocolDriver::Isp(isp)) => isp.spi_multi(hw, req),
            _ => Err(ProtocolError::Unsupported),
        },
        _ => match family_of(command) {
            Some(family) => family_command(hw, config, session, driver, family, req),
            None => {
                warn!("unknown command {:#x}", command);
                Err(ProtocolError::Unsupported)
            }
        },
    };
    if let Err(err) = outcome {
        debug!("command {:#x} failed: {}", command, err);
    }
    outcome
}

fn family_command<H: HardwareAccess>(
    hw: &mut H,
    config: &ProgrammerConfig,
    session: &mut SessionState,
    driver: &mut Option<ProtocolDriver>,
    family: Family,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    let op = req.command() & 0x0F;

    if op == OP_ENTER_PROGMODE {
        // Kept even if entering fails, so that leave can clean up
        let active = driver.insert(ProtocolDriver::new(family, config));
        session.active_family = Some(family);
        let protocol = active.protocol::<H>().ok_or(ProtocolError::Unsupported)?;
        return protocol.enter_progmode(hw, session, req);
    }

    if op == OP_LEAVE_PROGMODE {
        let mut released = match driver.take() {
            Some(active) if active.family() == family => {
                session.active_family = None;
                active
            }
            other => {
                *driver = other;
                ProtocolDriver::new(family, config)
            }
        };
        let protocol = released.protocol::<H>().ok_or(ProtocolError::Unsupported)?;
        return protocol.leave_progmode(hw, session, req);
    }

    let Some(active) = driver.as_mut().filter(|active| active.family() == family) else {
        warn!("command {:#x} outside its programming mode", req.command());
        return Err(ProtocolError::Unsupported);
    };
    let protocol = active.protocol::<H>().ok_or(ProtocolError::Unsupported)?;
    match op {
        OP_CHIP_ERASE => protocol.chip_erase(hw, session, req),
        OP_PROGRAM_FLASH => protocol.program_flash(hw, session, req),
        OP_READ_FLASH => protocol.read_flash(hw, session, req),
        OP_PROGRAM_EEPROM => protocol.program_eeprom(hw, session, req),
        OP_READ_EEPROM => protocol.read_eeprom(hw, session, req),
        OP_PROGRAM_FUSE => protocol.program_fuse(hw, session, req),
        OP_READ_FUSE => protocol.read_fuse(hw, session, req),
        OP_PROGRAM_LOCK => protocol.program_lock(hw, session, req),
        OP_READ_LOCK => protocol.read_lock(hw, session, req),
        OP_READ_SIGNATURE => protocol.read_signature(hw, session, req),
        OP_READ_OSCCAL => protocol.read_osc_cal(hw, session, req),
        _ => Err(ProtocolError::Unsupported),
    }
}

/// `CMD_XPROG`: TPI sub-commands
fn xprog<H: HardwareAccess>(
    hw: &mut H,
    config: &ProgrammerConfig,
    session: &mut SessionState,
    driver: &mut Option<ProtocolDriver>,
    req: &mut Request<'_>,
) -> Result<Reply, ProtocolError> {
    if session.xprog_mode != XPRG_MODE_TPI {
        warn!("XPROG mode {} not supported", session.xprog_mode);
        return Err(ProtocolError::Unsupported);
    }
    let sub = req.byte(1)?;

    if sub == XPRG_CMD_ENTER_PROGMODE {
        let active = driver.insert(ProtocolDriver::new(Family::Tpi, config));
        session.active_family = Some(Family::Tpi);
        return match active {
            ProtocolDriver::Tpi(tpi) => tpi.enter_progmode(hw),
            _ => Err(ProtocolError::Unsupported),
        };
    }

    if sub == XPRG_CMD_LEAVE_PROGMODE {
        let mut tpi = match driver.take() {
            Some(ProtocolDriver::Tpi(tpi)) => {
                session.active_family = None;
                tpi
            }
            other => {
                *driver = other;
                TpiDriver::new(&config.pins, config.timing)
            }
        };
        return tpi.leave_progmode(hw);
    }

    let mut idle;
    let tpi = match driver.as_mut() {
        Some(ProtocolDriver::Tpi(tpi)) => tpi,
        // Accepted before entering programming mode
        _ if sub == XPRG_CMD_SET_PARAM => {
            idle = TpiDriver::new(&config.pins, config.timing);
            &mut idle
        }
        _ => {
            warn!("XPROG command {:#x} outside programming mode", sub);
            return Err(ProtocolError::Unsupported);
        }
    };
    match sub {
        XPRG_CMD_ERASE => tpi.erase(hw, req),
        XPRG_CMD_WRITE_MEM => tpi.write_mem(hw, req),
        XPRG_CMD_READ_MEM => tpi.read_mem(hw, req),
        XPRG_CMD_SET_PARAM => tpi.set_param(req),
        _ => Err(ProtocolError::Unsupported),
    }
}
