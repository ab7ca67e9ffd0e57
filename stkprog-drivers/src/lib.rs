//! Programming drivers for the stkprog programmer
//!
//! This crate drives target chips through the hardware access traits of
//! stkprog-hal, one driver per programming protocol:
//!
//! - ISP over hardware or bit-banged SPI, with a slow-down ladder
//! - High-voltage serial programming (HVSP)
//! - High-voltage parallel programming (HVPP)
//! - Tiny programming interface (TPI), reached through `CMD_XPROG`
//!
//! [`Programmer`] ties them to the framing engine: it reads requests from
//! the host link, routes them to the general handlers or the active driver
//! and sends exactly one response per request.

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod hvpp;
pub mod hvsp;
pub mod isp;
pub mod programmer;
pub mod tpi;

#[cfg(test)]
mod mock;

pub use hvpp::HvppDriver;
pub use hvsp::HvspDriver;
pub use isp::IspDriver;
pub use programmer::{Programmer, ProtocolDriver};
pub use tpi::TpiDriver;
