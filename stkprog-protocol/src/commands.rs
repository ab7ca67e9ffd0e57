//! STK500v2 command, parameter and status codes
//!
//! The numeric values are the wire contract with avrdude and must not
//! change. Opcodes are grouped by programming protocol: `0x1x` ISP,
//! `0x2x` high-voltage parallel, `0x3x` high-voltage serial, `0x5x` the
//! STK600 XPROG extension used for TPI.

// General commands
pub const CMD_SIGN_ON: u8 = 0x01;
pub const CMD_SET_PARAMETER: u8 = 0x02;
pub const CMD_GET_PARAMETER: u8 = 0x03;
pub const CMD_SET_DEVICE_PARAMETERS: u8 = 0x04;
pub const CMD_OSCCAL: u8 = 0x05;
pub const CMD_LOAD_ADDRESS: u8 = 0x06;

// ISP commands
pub const CMD_ENTER_PROGMODE_ISP: u8 = 0x10;
pub const CMD_LEAVE_PROGMODE_ISP: u8 = 0x11;
pub const CMD_CHIP_ERASE_ISP: u8 = 0x12;
pub const CMD_PROGRAM_FLASH_ISP: u8 = 0x13;
pub const CMD_READ_FLASH_ISP: u8 = 0x14;
pub const CMD_PROGRAM_EEPROM_ISP: u8 = 0x15;
pub const CMD_READ_EEPROM_ISP: u8 = 0x16;
pub const CMD_PROGRAM_FUSE_ISP: u8 = 0x17;
pub const CMD_READ_FUSE_ISP: u8 = 0x18;
pub const CMD_PROGRAM_LOCK_ISP: u8 = 0x19;
pub const CMD_READ_LOCK_ISP: u8 = 0x1A;
pub const CMD_READ_SIGNATURE_ISP: u8 = 0x1B;
pub const CMD_READ_OSCCAL_ISP: u8 = 0x1C;
pub const CMD_SPI_MULTI: u8 = 0x1D;

// High-voltage parallel programming commands
pub const CMD_ENTER_PROGMODE_PP: u8 = 0x20;
pub const CMD_LEAVE_PROGMODE_PP: u8 = 0x21;
pub const CMD_CHIP_ERASE_PP: u8 = 0x22;
pub const CMD_PROGRAM_FLASH_PP: u8 = 0x23;
pub const CMD_READ_FLASH_PP: u8 = 0x24;
pub const CMD_PROGRAM_EEPROM_PP: u8 = 0x25;
pub const CMD_READ_EEPROM_PP: u8 = 0x26;
pub const CMD_PROGRAM_FUSE_PP: u8 = 0x27;
pub const CMD_READ_FUSE_PP: u8 = 0x28;
pub const CMD_PROGRAM_LOCK_PP: u8 = 0x29;
pub const CMD_READ_LOCK_PP: u8 = 0x2A;
pub const CMD_READ_SIGNATURE_PP: u8 = 0x2B;
pub const CMD_READ_OSCCAL_PP: u8 = 0x2C;
pub const CMD_SET_CONTROL_STACK: u8 = 0x2D;

// High-voltage serial programming commands
pub const CMD_ENTER_PROGMODE_HVSP: u8 = 0x30;
pub const CMD_LEAVE_PROGMODE_HVSP: u8 = 0x31;
pub const CMD_CHIP_ERASE_HVSP: u8 = 0x32;
pub const CMD_PROGRAM_FLASH_HVSP: u8 = 0x33;
pub const CMD_READ_FLASH_HVSP: u8 = 0x34;
pub const CMD_PROGRAM_EEPROM_HVSP: u8 = 0x35;
pub const CMD_READ_EEPROM_HVSP: u8 = 0x36;
pub const CMD_PROGRAM_FUSE_HVSP: u8 = 0x37;
pub const CMD_READ_FUSE_HVSP: u8 = 0x38;
pub const CMD_PROGRAM_LOCK_HVSP: u8 = 0x39;
pub const CMD_READ_LOCK_HVSP: u8 = 0x3A;
pub const CMD_READ_SIGNATURE_HVSP: u8 = 0x3B;
pub const CMD_READ_OSCCAL_HVSP: u8 = 0x3C;

// STK600 XPROG commands
pub const CMD_XPROG: u8 = 0x50;
pub const CMD_XPROG_SETMODE: u8 = 0x51;

// XPROG sub-commands, carried in body[1] of CMD_XPROG
pub const XPRG_CMD_ENTER_PROGMODE: u8 = 0x01;
pub const XPRG_CMD_LEAVE_PROGMODE: u8 = 0x02;
pub const XPRG_CMD_ERASE: u8 = 0x03;
pub const XPRG_CMD_WRITE_MEM: u8 = 0x04;
pub const XPRG_CMD_READ_MEM: u8 = 0x05;
pub const XPRG_CMD_CRC: u8 = 0x06;
pub const XPRG_CMD_SET_PARAM: u8 = 0x07;

// XPROG erase modes
pub const XPRG_ERASE_CHIP: u8 = 0x01;
pub const XPRG_ERASE_CONFIG: u8 = 0x09;

// XPROG modes selected by CMD_XPROG_SETMODE
pub const XPRG_MODE_PDI: u8 = 0x00;
pub const XPRG_MODE_JTAG: u8 = 0x01;
pub const XPRG_MODE_TPI: u8 = 0x02;

// Parameters for CMD_SET_PARAMETER / CMD_GET_PARAMETER
pub const PARAM_BUILD_NUMBER_LOW: u8 = 0x80;
pub const PARAM_BUILD_NUMBER_HIGH: u8 = 0x81;
pub const PARAM_HW_VER: u8 = 0x90;
pub const PARAM_SW_MAJOR: u8 = 0x91;
pub const PARAM_SW_MINOR: u8 = 0x92;
pub const PARAM_VTARGET: u8 = 0x94;
pub const PARAM_VADJUST: u8 = 0x95;
pub const PARAM_OSC_PSCALE: u8 = 0x96;
pub const PARAM_OSC_CMATCH: u8 = 0x97;
pub const PARAM_SCK_DURATION: u8 = 0x98;
pub const PARAM_TOPCARD_DETECT: u8 = 0x9A;
pub const PARAM_STATUS: u8 = 0x9C;
pub const PARAM_DATA: u8 = 0x9D;
pub const PARAM_RESET_POLARITY: u8 = 0x9E;
pub const PARAM_CONTROLLER_INIT: u8 = 0x9F;
pub const PARAM_DISCHARGEDELAY: u8 = 0xA4;

/// STK600 parameters at and above this value carry a 16-bit value
pub const PARAM2_FIRST: u8 = 0xC0;
pub const PARAM2_SCK_DURATION: u8 = 0xC0;

/// Body byte that replaces the command code in a checksum-error answer
pub const ANSWER_CKSUM_ERROR: u8 = 0xB0;

/// Status codes reported in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    /// Command executed
    CmdOk = 0x00,
    /// Command timed out
    CmdTimeout = 0x80,
    /// Target stayed busy past the poll deadline
    RdyBsyTimeout = 0x81,
    /// A required parameter was never set
    SetParamMissing = 0x82,
    /// Command failed
    CmdFailed = 0xC0,
    /// Request checksum mismatch
    ChecksumError = 0xC1,
    /// Command not known to the programmer
    CmdUnknown = 0xC9,
}

impl Status {
    /// Wire value
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether this is the success status
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::CmdOk)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> u8 {
        status.as_byte()
    }
}
