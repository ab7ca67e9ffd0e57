//! STK500v2 Communication Protocol
//!
//! This crate defines the byte-stream protocol between the host programming
//! tool (avrdude) and the programmer. It knows how requests and responses
//! are framed and what the command and status codes mean, but nothing about
//! what a command does.
//!
//! # Protocol Overview
//!
//! Requests and responses use the same binary frame format:
//! ```text
//! ┌───────┬─────┬────────┬───────┬────────────┬──────────┐
//! │ START │ SEQ │ LENGTH │ TOKEN │ BODY       │ CHECKSUM │
//! │ 0x1B  │ 1B  │ 2B BE  │ 0x0E  │ 0–275B     │ 1B       │
//! └───────┴─────┴────────┴───────┴────────────┴──────────┘
//! ```
//!
//! `BODY[0]` is the command code. Responses echo it and carry the status
//! code in `BODY[1]`, or in `BODY[2]` for STK600 XPROG answers.

#![no_std]
#![deny(unsafe_code)]

#[macro_use]
mod fmt;

pub mod commands;
pub mod frame;

pub use commands::Status;
pub use frame::{
    encode_frame, encode_to_vec, FrameEngine, FrameError, PollError, MAX_BODY_SIZE,
    MAX_FRAME_SIZE, MESSAGE_START, TOKEN,
};
