//! Board-agnostic core logic for the stkprog programmer
//!
//! This crate contains everything between the framing engine and the
//! protocol drivers that does not depend on a particular target protocol:
//!
//! - Session state shared by all request handlers
//! - Board configuration (pin layout, timing, identity)
//! - General STK500v2 commands (sign-on, parameters, address)
//! - The driver contract and its request/reply types
//! - Wrapping poll deadlines

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod config;
pub mod deadline;
pub mod general;
pub mod session;
pub mod traits;

pub use deadline::{wait_until, Deadline};
pub use session::{Family, SessionState};
pub use traits::{ProgrammingProtocol, ProtocolError, Reply, Request};
