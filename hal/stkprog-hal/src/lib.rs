//! stkprog Hardware Abstraction Layer
//!
//! This crate defines the hardware access capability that the programming
//! protocol drivers consume. Chip-specific HALs (RP2040, a simulated target
//! in tests, ...) implement these traits; the drivers never touch registers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  stkprog-drivers (ISP, HVSP, HVPP, TPI) │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  stkprog-hal (this crate - traits)      │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ stkprog-hal-  │       │   simulated   │
//! │    rp2040     │       │ target (test) │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::Gpio`] - Pin-indexed digital I/O and 8-bit port helpers
//! - [`spi::SpiBus`] - Byte-wide synchronous serial transfer
//! - [`clock::Clock`] - Monotonic millisecond counter and busy delays
//! - [`clock::ClockOutput`] - Free-running clock for the target's XTAL input
//!
//! Pins are addressed by [`PinId`], so pin assignment is configuration
//! data rather than a type parameter.

#![no_std]
#![deny(unsafe_code)]

pub mod clock;
pub mod gpio;
pub mod spi;

// Re-export key traits at crate root for convenience
pub use clock::{Clock, ClockOutput};
pub use gpio::{Gpio, PinId, PinMode, PortPins};
pub use spi::{SpiBus, SpiConfig};

/// Everything a protocol driver needs from the board
///
/// Blanket-implemented for any type providing all of the capabilities.
pub trait HardwareAccess: Gpio + SpiBus + Clock + ClockOutput {}

impl<T: Gpio + SpiBus + Clock + ClockOutput> HardwareAccess for T {}
