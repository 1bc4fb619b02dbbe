//! Pure encoding/decoding helpers for the Firmata 7-bit wire convention.
//!
//! Bytes with the top bit set are status/command bytes; everything else is
//! data. Multi-byte values travel as 7-bit chunks, least significant first.

use crate::client::constants::*;
use crate::client::data::{I2CReply, Pin, PinModeId};
use crate::errors::ProtocolError::MessageTooShort;
use crate::errors::Error;

/// Splits a 14-bit value into `(lsb, msb)` 7-bit data bytes.
pub fn pack14(value: u16) -> [u8; 2] {
    [(value & 0x7F) as u8, ((value >> 7) & 0x7F) as u8]
}

/// Reassembles a 14-bit value from its `(lsb, msb)` data bytes.
pub fn unpack14(lsb: u8, msb: u8) -> u16 {
    (lsb as u16) | ((msb as u16) << 7)
}

/// Wraps a body into a sysex envelope.
pub fn sysex(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 2);
    frame.push(START_SYSEX);
    frame.extend_from_slice(body);
    frame.push(END_SYSEX);
    frame
}

/// Rebuilds the pin table from a CAPABILITY_RESPONSE payload (the bytes
/// between the subcommand and END_SYSEX).
///
/// The payload is a sequence of `(mode, resolution)` pairs per pin, each
/// group closed by `0x7F`. Resolutions are skipped; mode bytes outside the
/// driveable set are tolerated and filtered out. Every pin comes up in
/// OUTPUT mode.
pub fn decode_capabilities(payload: &[u8]) -> Vec<Pin> {
    let mut pins: Vec<Pin> = vec![];
    let mut modes: Vec<PinModeId> = vec![];
    let mut nth = 0;

    for &byte in payload {
        if byte == SYSEX_REALTIME {
            pins.push(Pin {
                id: pins.len() as u16,
                supported_modes: std::mem::take(&mut modes),
                mode: PinModeId::OUTPUT,
                ..Default::default()
            });
            nth = 0;
            continue;
        }
        if nth % 2 == 0 {
            if let Ok(mode) = PinModeId::from_u8(byte) {
                if mode.is_driveable() && !modes.contains(&mode) {
                    modes.push(mode);
                }
            }
        }
        nth += 1;
    }
    pins
}

/// Decodes an ANALOG_MAPPING_RESPONSE payload into `(pin, channel)`
/// assignments. The payload carries one byte per pin index, `0x7F` marking
/// pins without analog capability.
///
/// The walk covers the whole payload; the caller ignores assignments beyond
/// its pin table.
pub fn decode_analog_mapping(payload: &[u8]) -> Vec<(u16, u8)> {
    payload
        .iter()
        .enumerate()
        .filter(|(_, &channel)| channel != NOT_AN_ANALOG_PIN)
        .map(|(pin, &channel)| (pin as u16, channel))
        .collect()
}

/// Decodes a PIN_STATE_RESPONSE payload into `(pin, mode, state)`.
///
/// The state arrives as up to three 7-bit chunks, least significant first;
/// only the chunks actually present contribute.
pub fn decode_pin_state(payload: &[u8]) -> Result<(u16, PinModeId, u32), Error> {
    if payload.len() < 3 {
        return Err(Error::from(MessageTooShort {
            operation: "decode_pin_state",
            expected: 3,
            received: payload.len(),
        }));
    }
    let pin = payload[0] as u16;
    let mode = PinModeId::from_u8(payload[1])?;

    let mut state: u32 = (payload[2] & 0x7F) as u32;
    if let Some(&mid) = payload.get(3) {
        state |= ((mid & 0x7F) as u32) << 7;
    }
    if let Some(&msb) = payload.get(4) {
        state |= ((msb & 0x7F) as u32) << 14;
    }
    Ok((pin, mode, state))
}

/// Decodes an I2C_REPLY payload: 14-bit address and register, then one data
/// byte per 7-bit pair. An odd trailing byte is dropped.
pub fn decode_i2c_reply(payload: &[u8]) -> Result<I2CReply, Error> {
    if payload.len() < 6 {
        return Err(Error::from(MessageTooShort {
            operation: "decode_i2c_reply",
            expected: 6,
            received: payload.len(),
        }));
    }
    let mut reply = I2CReply {
        address: unpack14(payload[0], payload[1]),
        register: unpack14(payload[2], payload[3]),
        data: vec![],
    };
    let mut i = 4;
    while i + 1 < payload.len() {
        reply
            .data
            .push(unpack14(payload[i], payload[i + 1]) as u8);
        i += 2;
    }
    Ok(reply)
}

/// Decodes a REPORT_FIRMWARE payload into `(version, name)`.
///
/// The name bytes are interleaved with zero bytes (two bytes per char on the
/// wire); the zeros are discarded.
pub fn decode_firmware_report(payload: &[u8]) -> Result<(String, String), Error> {
    if payload.len() < 2 {
        return Err(Error::from(MessageTooShort {
            operation: "decode_firmware_report",
            expected: 2,
            received: payload.len(),
        }));
    }
    let version = format!("{}.{}", payload[0], payload[1]);
    let name_bytes: Vec<u8> = payload[2..]
        .iter()
        .copied()
        .filter(|&byte| byte != 0)
        .collect();
    let name = std::str::from_utf8(&name_bytes)?.to_string();
    Ok((version, name))
}

/// Decodes a STRING_DATA payload as sent by the board.
pub fn decode_string_data(payload: &[u8]) -> Result<String, Error> {
    Ok(std::str::from_utf8(payload)?.to_string())
}
