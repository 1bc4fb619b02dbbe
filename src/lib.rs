//! Host-side client for the [Firmata protocol](https://github.com/firmata/protocol).
//!
//! The [`client::Client`] speaks MIDI-style messages and sysex envelopes to
//! a microcontroller board over any full-duplex byte [`transports::Transport`]
//! (a 57600-baud serial line by default), exposing digital/analog pin I/O,
//! PWM and servo outputs, and tunneled i2c transactions.

pub mod client;
pub mod errors;
pub mod mocks;
pub mod transports;
pub mod utils;

pub use crate::client::Client;
