//! Test doubles and fixtures: an in-memory transport plus the Arduino Uno
//! R3 handshake vectors.

pub mod transport;

pub use transport::MockTransport;

use crate::client::codec::{decode_analog_mapping, decode_capabilities};
use crate::client::BoardState;

/// Arduino Uno R3 capability response payload (20 pin groups, one `0x7F`
/// terminator each).
pub const UNO_CAPABILITY_PAYLOAD: [u8; 144] = [
    127, 127, 0, 1, 1, 1, 4, 14, 127, 0, 1, 1, 1, 3, 8, 4, 14, 127, 0, 1, 1, 1, 4, 14, 127, 0,
    1, 1, 1, 3, 8, 4, 14, 127, 0, 1, 1, 1, 3, 8, 4, 14, 127, 0, 1, 1, 1, 4, 14, 127, 0, 1, 1,
    1, 4, 14, 127, 0, 1, 1, 1, 3, 8, 4, 14, 127, 0, 1, 1, 1, 3, 8, 4, 14, 127, 0, 1, 1, 1, 3,
    8, 4, 14, 127, 0, 1, 1, 1, 4, 14, 127, 0, 1, 1, 1, 4, 14, 127, 0, 1, 1, 1, 2, 10, 127, 0,
    1, 1, 1, 2, 10, 127, 0, 1, 1, 1, 2, 10, 127, 0, 1, 1, 1, 2, 10, 127, 0, 1, 1, 1, 2, 10, 6,
    1, 127, 0, 1, 1, 1, 2, 10, 6, 1, 127,
];

/// Arduino Uno R3 analog mapping response payload (channels 0-5 on pins
/// 14-19).
pub const UNO_ANALOG_MAPPING_PAYLOAD: [u8; 20] = [
    127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 0, 1, 2, 3, 4, 5,
];

/// Arduino Uno R3 firmware response payload: version 2.3,
/// zero-interleaved "StandardFirmata.ino".
pub const UNO_FIRMWARE_PAYLOAD: [u8; 40] = [
    2, 3, 83, 0, 116, 0, 97, 0, 110, 0, 100, 0, 97, 0, 114, 0, 100, 0, 70, 0, 105, 0, 114, 0,
    109, 0, 97, 0, 116, 0, 97, 0, 46, 0, 105, 0, 110, 0, 111, 0,
];

/// The byte stream an Arduino Uno answers the four handshake queries with,
/// in handshake order.
pub fn uno_handshake_stream() -> Vec<u8> {
    let mut stream = vec![0xF9, 2, 3];
    for (command, payload) in [
        (0x79, &UNO_FIRMWARE_PAYLOAD[..]),
        (0x6C, &UNO_CAPABILITY_PAYLOAD[..]),
        (0x6A, &UNO_ANALOG_MAPPING_PAYLOAD[..]),
    ] {
        stream.push(0xF0);
        stream.push(command);
        stream.extend_from_slice(payload);
        stream.push(0xF7);
    }
    stream
}

/// A board state as discovered on an Arduino Uno R3: 20 pins in OUTPUT
/// mode, analog channels 0-5 mapped to pins 14-19.
pub fn uno_board_state() -> BoardState {
    let mut state = BoardState {
        pins: decode_capabilities(&UNO_CAPABILITY_PAYLOAD),
        protocol_version: String::from("2.3"),
        firmware_name: String::from("StandardFirmata.ino"),
        firmware_version: String::from("2.3"),
        ..Default::default()
    };
    for (pin, channel) in decode_analog_mapping(&UNO_ANALOG_MAPPING_PAYLOAD) {
        state.pins[pin as usize].analog_channel = channel;
        state.analog_pins.push(pin);
    }
    state
}
