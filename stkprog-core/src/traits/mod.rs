//! Programming protocol traits
//!
//! These traits define the interface between the command dispatcher and
//! the protocol drivers.

pub mod driver;

pub use driver::{ProgrammingProtocol, ProtocolError, Reply, Request};
