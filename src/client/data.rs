use std::fmt::{Debug, Display, Formatter};

use crate::client::constants::NOT_AN_ANALOG_PIN;
use crate::errors::HardwareError::{IncompatibleMode, UnknownPin};
use crate::errors::*;

/// Board-side state mirrored by the client.
///
/// This struct is hidden behind an `Arc<RwLock<BoardState>>` so the serving
/// task and concurrent request callers share one view of the pins. It is
/// rebuilt from the capability and analog-mapping responses during handshake.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoardState {
    /// All `Pin` instances, indexed by pin number. Dense after handshake.
    pub pins: Vec<Pin>,
    /// Analog channel index -> pin number, in pin-index order.
    pub analog_pins: Vec<u16>,
    /// Protocol version reported by the board ("major.minor").
    pub protocol_version: String,
    /// Name of the firmware sketch running on the board.
    pub firmware_name: String,
    /// Version of the firmware sketch ("major.minor").
    pub firmware_version: String,
    /// Whether the handshake completed and the serving loop is running.
    pub connected: bool,
    /// Set on disconnect; a spent client never reconnects.
    #[cfg_attr(feature = "serde", serde(skip))]
    pub(crate) terminated: bool,
}

impl BoardState {
    /// Retrieves a reference to a pin by its index.
    ///
    /// # Errors
    /// * `UnknownPin` - the pin index is out of bounds.
    pub fn get_pin(&self, pin: u16) -> Result<&Pin, Error> {
        self.pins
            .get(pin as usize)
            .ok_or(Error::from(UnknownPin { pin }))
    }

    /// Retrieves a mutable reference to a pin by its index.
    ///
    /// # Errors
    /// * `UnknownPin` - the pin index is out of bounds.
    pub fn get_pin_mut(&mut self, pin: u16) -> Result<&mut Pin, Error> {
        self.pins
            .get_mut(pin as usize)
            .ok_or(Error::from(UnknownPin { pin }))
    }
}

/// Represents the current state and configuration of a pin.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, PartialEq)]
pub struct Pin {
    /// The pin number, which is also its index in [`BoardState::pins`].
    pub id: u16,
    /// Modes this pin supports, filtered to the ones the client drives.
    pub supported_modes: Vec<PinModeId>,
    /// Currently configured mode.
    pub mode: PinModeId,
    /// Last value reported by (or written to) the pin, 0..1023 typically.
    pub value: u16,
    /// Mode-dependent state from the latest pin-state response: the driven
    /// value for output modes, the input value otherwise. Up to three 7-bit
    /// chunks wide.
    pub state: u32,
    /// Analog channel number ("A0" => 0), or 0x7F for non-analog pins.
    pub analog_channel: u8,
}

impl Default for Pin {
    fn default() -> Self {
        Self {
            id: 0,
            supported_modes: vec![],
            mode: PinModeId::default(),
            value: 0,
            state: 0,
            analog_channel: NOT_AN_ANALOG_PIN,
        }
    }
}

impl Pin {
    /// Whether the pin supports the given mode.
    pub fn supports_mode(&self, mode: PinModeId) -> bool {
        self.supported_modes.contains(&mode)
    }

    /// Validates that the pin is currently in the given mode.
    ///
    /// # Errors
    /// * `IncompatibleMode` - the pin's current mode does not match.
    pub fn validate_current_mode(&self, mode: PinModeId) -> Result<(), Error> {
        match self.mode == mode {
            true => Ok(()),
            false => Err(Error::from(IncompatibleMode {
                mode: self.mode,
                pin: self.id,
                context: "check_current_mode",
            })),
        }
    }
}

impl Debug for Pin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut debug_struct = f.debug_struct("Pin");
        debug_struct
            .field("id", &self.id)
            .field("mode", &format!("{}", self.mode))
            .field("supported modes", &self.supported_modes);
        if self.analog_channel != NOT_AN_ANALOG_PIN {
            debug_struct.field("channel", &self.analog_channel);
        }
        debug_struct
            .field("value", &self.value)
            .field("state", &self.state)
            .finish()
    }
}

// ########################################

/// Defines an I2C reply.
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct I2CReply {
    pub address: u16,
    pub register: u16,
    pub data: Vec<u8>,
}

/// Snapshot emitted for each pin-state response.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PinState {
    pub pin: u16,
    pub mode: PinModeId,
    pub value: u32,
}

// ########################################

/// Enumerates the possible modes for a pin.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[repr(u8)]
pub enum PinModeId {
    /// Same as INPUT defined in Arduino.h
    INPUT = 0,
    /// Same as OUTPUT defined in Arduino.h
    OUTPUT = 1,
    /// Analog pin in analogInput mode
    ANALOG = 2,
    /// Digital pin in PWM output mode
    PWM = 3,
    /// Digital pin in Servo output mode
    SERVO = 4,
    /// shiftIn/shiftOut mode
    SHIFT = 5,
    /// Pin included in I2C setup
    I2C = 6,
    /// Pin configured for 1-wire
    ONEWIRE = 7,
    /// Pin configured for stepper motor
    STEPPER = 8,
    /// Pin configured for rotary encoders
    ENCODER = 9,
    /// Pin configured for serial communication
    SERIAL = 0x0A,
    /// Enable internal pull-up resistor for pin
    PULLUP = 0x0B,
    /// Pin configured to be ignored by digitalWrite and capabilityResponse
    #[default]
    UNSUPPORTED = 0x7F,
}

impl PinModeId {
    /// Converts a `u8` byte value into a `PinModeId`.
    ///
    /// # Errors
    /// * `Unknown` - the value does not match any known pin mode.
    pub fn from_u8(value: u8) -> Result<PinModeId, Error> {
        match value {
            0 => Ok(PinModeId::INPUT),
            1 => Ok(PinModeId::OUTPUT),
            2 => Ok(PinModeId::ANALOG),
            3 => Ok(PinModeId::PWM),
            4 => Ok(PinModeId::SERVO),
            5 => Ok(PinModeId::SHIFT),
            6 => Ok(PinModeId::I2C),
            7 => Ok(PinModeId::ONEWIRE),
            8 => Ok(PinModeId::STEPPER),
            9 => Ok(PinModeId::ENCODER),
            0x0A => Ok(PinModeId::SERIAL),
            0x0B => Ok(PinModeId::PULLUP),
            0x7F => Ok(PinModeId::UNSUPPORTED),
            x => Err(Unknown {
                info: format!("PinMode not found with value: {}", x),
            }),
        }
    }

    /// Whether the mode is one the client drives.
    pub fn is_driveable(&self) -> bool {
        matches!(
            self,
            PinModeId::INPUT
                | PinModeId::OUTPUT
                | PinModeId::ANALOG
                | PinModeId::PWM
                | PinModeId::SERVO
        )
    }
}

impl From<PinModeId> for u8 {
    fn from(mode: PinModeId) -> u8 {
        mode as u8
    }
}

impl Display for PinModeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
