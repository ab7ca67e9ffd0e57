//! RP2040 board support for the stkprog programmer
//!
//! Implements the `stkprog-hal` traits on RP2040 GPIOs:
//!
//! - Pin allocation by number for the board layout
//! - GPIO through embassy-rp `Flex` pins
//! - A cycle-timed SPI master on the ISP pins
//! - Target clock from the GPOUT0 clock generator
//! - Time from the embassy time driver

#![no_std]

#[macro_use]
mod fmt;

pub mod board;
pub mod pins;

pub use board::Rp2040Board;
pub use pins::{FixedPeripherals, PinBank};
