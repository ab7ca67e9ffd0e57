//! Configuration types
//!
//! Board-agnostic configuration structures. The firmware builds its
//! [`ProgrammerConfig`] from `board.toml` at compile time.

pub mod hardware;
pub mod types;

pub use hardware::*;
pub use types::*;
