//! Programmer session state
//!
//! One [`SessionState`] lives for the whole run. Request handlers borrow it
//! mutably, one request at a time.

/// Size of the HVPP control stack uploaded by the host
pub const CONTROL_STACK_SIZE: usize = 32;

/// Bit 31 of a loaded address: the host's "extended address" flag
pub const EXTENDED_ADDRESS_FLAG: u32 = 0x8000_0000;

/// Programming protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Family {
    /// In-system programming over SPI
    Isp,
    /// High-voltage serial programming
    Hvsp,
    /// High-voltage parallel programming
    Hvpp,
    /// Tiny programming interface
    Tpi,
}

/// Mutable state shared by every request handler
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SessionState {
    /// Current target address, in words for flash and bytes for EEPROM
    pub address: u32,
    /// SCK duration selector set by the host
    pub sck_duration: u16,
    /// HVPP control signal patterns, indexed by signal and byte select
    pub control_stack: [u8; CONTROL_STACK_SIZE],
    /// Family of the active programming mode, if any
    pub active_family: Option<Family>,
    /// Mode selected by `CMD_XPROG_SETMODE`
    pub xprog_mode: u8,
    /// Stored and reported back, otherwise unused
    pub controller_init: u8,
    /// Stored and reported back, otherwise unused
    pub osc_prescale: u8,
    /// Stored and reported back, otherwise unused
    pub osc_cmatch: u8,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Fresh session: 125 kHz SCK selector, nothing else set
    pub const fn new() -> Self {
        Self {
            address: 0,
            sck_duration: 2,
            control_stack: [0; CONTROL_STACK_SIZE],
            active_family: None,
            xprog_mode: 0,
            controller_init: 0,
            osc_prescale: 0,
            osc_cmatch: 0,
        }
    }

    /// Whether the host flagged the loaded address as extended
    pub fn is_extended(&self) -> bool {
        self.address & EXTENDED_ADDRESS_FLAG != 0
    }

    /// Step the address by `units` (words or bytes, per memory)
    pub fn advance(&mut self, units: u32) {
        self.address = self.address.wrapping_add(units);
    }

    /// Low address byte
    pub fn low_byte(&self) -> u8 {
        self.address as u8
    }

    /// Page byte (address bits 8..16)
    pub fn high_byte(&self) -> u8 {
        (self.address >> 8) as u8
    }

    /// Extended byte (address bits 16..24)
    pub fn extended_byte(&self) -> u8 {
        (self.address >> 16) as u8
    }

    /// Control stack entry for a signal index plus byte select
    pub fn control(&self, index: usize) -> u8 {
        self.control_stack[index % CONTROL_STACK_SIZE]
    }
}
