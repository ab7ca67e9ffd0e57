//! Configuration type definitions
//!
//! Timing bounds, the identity reported to the host, and the top-level
//! [`ProgrammerConfig`] tying them to a [`PinLayout`].

use heapless::String;

use super::hardware::{ConfigError, PinLayout};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Maximum sign-on name length
pub const MAX_NAME_LEN: usize = 16;

/// Timeouts and rates used by the protocol drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timing {
    /// ISP RDY/BSY poll bound (ms)
    pub isp_ready_timeout_ms: u32,
    /// Slack added to the host's HVSP/HVPP poll timeout (ms)
    pub hv_poll_slack_ms: u32,
    /// TPI NVM busy poll bound (ms)
    pub tpi_nvm_timeout_ms: u32,
    /// Slowest bit-banged ISP rate tried on entry, as a log2 slowdown
    pub isp_max_slowdown: u8,
    /// Clock fed to ISP targets (Hz)
    pub target_clock_hz: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            isp_ready_timeout_ms: 100,
            hv_poll_slack_ms: 10,
            tpi_nvm_timeout_ms: 100,
            isp_max_slowdown: 8,
            target_clock_hz: 1_000_000,
        }
    }
}

/// What the programmer reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Identity {
    /// Sign-on name
    pub name: String<MAX_NAME_LEN>,
    /// `PARAM_BUILD_NUMBER_LOW` / `_HIGH`
    pub build_number: u16,
    /// `PARAM_HW_VER`
    pub hardware_version: u8,
    /// `PARAM_SW_MAJOR`
    pub software_major: u8,
    /// `PARAM_SW_MINOR`
    pub software_minor: u8,
}

impl Default for Identity {
    fn default() -> Self {
        Self::with_name("STK500_2")
    }
}

impl Identity {
    /// Identity with `name`, truncated to [`MAX_NAME_LEN`] characters
    pub fn with_name(name: &str) -> Self {
        let mut truncated = String::new();
        for c in name.chars() {
            if truncated.push(c).is_err() {
                break;
            }
        }
        Self {
            name: truncated,
            build_number: 0x0002,
            hardware_version: 0x00,
            software_major: 0x02,
            software_minor: 0x00,
        }
    }
}

/// Everything the programmer needs to know about its board
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProgrammerConfig {
    pub pins: PinLayout,
    pub timing: Timing,
    pub identity: Identity,
}

impl ProgrammerConfig {
    /// Validate the pin layout
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pins.validate()
    }
}
