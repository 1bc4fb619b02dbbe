//! Firmata protocol client core.
//!
//! Official Firmata documentation: https://github.com/firmata/protocol
//! Helper unofficial documentation: https://github.com/martin-eden/firmata_protocol/blob/main/protocol.md

pub mod codec;
pub mod constants;
mod data;
mod events;

pub use data::*;
pub use events::HandshakeEvent;

use crate::client::constants::*;
use crate::client::events::EventSinks;
use crate::errors::HardwareError::IncompatibleMode;
use crate::errors::ProtocolError::{AlreadyConnected, ConnectionClosed, NotConnected};
use crate::errors::Error;
use crate::transports::serial::Serial;
use crate::transports::Transport;
use crate::utils::format_as_hex;
use log::{debug, trace};
use parking_lot::RwLock;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Inner handler to the background serving task.
pub type TaskHandler = JoinHandle<()>;

/// Bring-up progression: each step is gated on the response to the previous
/// query, and unrelated frames do not advance it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    AwaitingProtocol,
    AwaitingFirmware,
    AwaitingCapability,
    AwaitingMapping,
    Ready,
}

/// Host-side client for a board speaking the
/// [Firmata protocol](https://github.com/firmata/protocol).
///
/// Requests serialize straight to the transport and return on write; the
/// responses, when the protocol defines any, arrive asynchronously and are
/// matched by opcode through the receivers the request methods hand back.
/// Clones share the transport, the board state and the sinks, so one clone
/// can serve the read side while others issue requests.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone)]
pub struct Client {
    /// Transport layer used to communicate with the board.
    transport: Box<dyn Transport>,

    // ########################################
    // # Volatile utility data.
    #[cfg_attr(feature = "serde", serde(skip))]
    data: Arc<RwLock<BoardState>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    events: Arc<EventSinks>,
    /// Inner handler to the serving task.
    #[cfg_attr(feature = "serde", serde(skip))]
    handler: Arc<RwLock<Option<TaskHandler>>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::from_transport(Box::new(Serial::default()))
    }
}

impl Client {
    pub fn new<P: Into<String>>(port: P) -> Self {
        Self::from_transport(Box::new(Serial::new(port)))
    }

    fn from_transport(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            data: Arc::new(Default::default()),
            events: Arc::new(Default::default()),
            handler: Arc::new(RwLock::new(None)),
        }
    }
}

impl<T: Transport + 'static> From<T> for Client {
    fn from(transport: T) -> Self {
        Self::from_transport(Box::new(transport))
    }
}

// ########################################
// Accessors

impl Client {
    /// The shared board state: pin table, analog map and protocol scalars.
    pub fn get_data(&self) -> &Arc<RwLock<BoardState>> {
        &self.data
    }

    pub fn is_connected(&self) -> bool {
        self.data.read().connected
    }

    /// Protocol version reported by the board ("major.minor").
    pub fn protocol_version(&self) -> String {
        self.data.read().protocol_version.clone()
    }

    /// Name of the firmware sketch running on the board.
    pub fn firmware_name(&self) -> String {
        self.data.read().firmware_name.clone()
    }

    /// Version of the firmware sketch ("major.minor").
    pub fn firmware_version(&self) -> String {
        self.data.read().firmware_version.clone()
    }
}

// ########################################
// Connection lifecycle

impl Client {
    /// Opens the transport and performs the bring-up handshake: reset, then
    /// protocol version, firmware, capability and analog-mapping queries,
    /// each gated on the previous response. Once the board is ready, digital
    /// reporting is enabled on ports 0 and 1 and a background task serves
    /// incoming frames until disconnection.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// * `AlreadyConnected` - the client is already connected.
    /// * `ConnectionClosed` - the client was disconnected; a spent client
    ///   never reconnects.
    /// * Any transport error during the handshake aborts the connection and
    ///   is returned as-is.
    pub fn connect(&mut self) -> Result<(), Error> {
        {
            let data = self.data.read();
            if data.connected {
                return Err(Error::from(AlreadyConnected));
            }
            if data.terminated {
                return Err(Error::from(ConnectionClosed));
            }
        }

        self.transport.open()?;

        // Force a software reset: some boards do not restart when the
        // connection opens, and leftover reporting settings from a previous
        // run would corrupt the handshake.
        self.software_reset()?;

        let _ = self.query_protocol_version()?;
        let mut stage = Stage::AwaitingProtocol;
        while stage != Stage::Ready {
            let message = self.read_and_decode()?;
            stage = self.advance(stage, message)?;
        }
        debug!("Handshake complete: {}", self);

        self.report_digital(0, true)?;
        self.report_digital(1, true)?;

        // Reduce timeout once the board answers.
        self.transport.set_timeout(Duration::from_millis(500))?;

        self.data.write().connected = true;
        self.start_serving();
        Ok(())
    }

    /// Advances the handshake when the awaited response arrives, issuing the
    /// next query in the sequence.
    fn advance(&mut self, stage: Stage, message: Message) -> Result<Stage, Error> {
        let next = match (stage, message) {
            (Stage::AwaitingProtocol, Message::ProtocolVersion) => {
                let _ = self.query_firmware()?;
                Stage::AwaitingFirmware
            }
            (Stage::AwaitingFirmware, Message::FirmwareReport) => {
                let _ = self.query_capabilities()?;
                Stage::AwaitingCapability
            }
            (Stage::AwaitingCapability, Message::CapabilityResponse) => {
                let _ = self.query_analog_mapping()?;
                Stage::AwaitingMapping
            }
            (Stage::AwaitingMapping, Message::AnalogMappingResponse) => Stage::Ready,
            (unchanged, _) => unchanged,
        };
        Ok(next)
    }

    /// Stops serving and closes the transport. The client cannot be
    /// reconnected afterward.
    ///
    /// # Errors
    /// * `NotConnected` - the client has no open connection.
    pub fn disconnect(&mut self) -> Result<(), Error> {
        {
            let mut data = self.data.write();
            if !data.connected {
                return Err(Error::from(NotConnected));
            }
            data.connected = false;
            data.terminated = true;
        }
        self.stop_serving();
        self.transport.close()?;
        Ok(())
    }

    /// Spawns the background task reading and dispatching frames.
    fn start_serving(&self) {
        if self.handler.read().is_some() {
            return;
        }
        let mut client = self.clone();
        *self.handler.write() = Some(tokio::task::spawn_blocking(move || client.serve()));
    }

    fn stop_serving(&self) {
        if let Some(handler) = self.handler.write().take() {
            handler.abort();
        }
    }

    /// Serving loop: frames are read and dispatched in arrival order.
    /// Decode-level errors are posted to the error sink and reading goes on;
    /// transport-level errors end the loop after being posted.
    fn serve(&mut self) {
        while self.is_connected() {
            match self.read_and_decode() {
                Ok(_) => {}
                Err(error) => {
                    let fatal = matches!(
                        &error,
                        Error::ProtocolError { source } if source.is_transport()
                    );
                    self.events.post_error(error);
                    if fatal {
                        break;
                    }
                }
            }
        }
    }
}

// ########################################
// Frame reader & dispatcher

impl Client {
    /// Reads one frame from the transport, applies it to the board state,
    /// routes it to the matching sink, and returns its tag.
    fn read_and_decode(&mut self) -> Result<Message, Error> {
        let mut buf = vec![0; 3];
        self.transport.read_exact(&mut buf)?;

        match buf[0] {
            REPORT_VERSION => self.handle_protocol_version(&buf),
            ANALOG_MESSAGE..=ANALOG_MESSAGE_BOUND => self.handle_analog_message(&buf),
            DIGITAL_MESSAGE..=DIGITAL_MESSAGE_BOUND => self.handle_digital_message(&buf),
            START_SYSEX => {
                let body = self.read_sysex_body(&buf)?;
                self.handle_sysex_message(&body)
            }
            _ => {
                trace!("Discarding unexpected frame: {}", format_as_hex(&buf));
                Ok(Message::EmptyResponse)
            }
        }
    }

    /// Completes a sysex frame whose first bytes sit in `buf`, returning the
    /// body between START_SYSEX and END_SYSEX.
    fn read_sysex_body(&mut self, buf: &[u8]) -> Result<Vec<u8>, Error> {
        let mut body = vec![];
        for &byte in &buf[1..] {
            if byte == END_SYSEX {
                return Ok(body);
            }
            body.push(byte);
        }
        loop {
            let mut byte = [0];
            self.transport.read_exact(&mut byte)?;
            if byte[0] == END_SYSEX {
                return Ok(body);
            }
            body.push(byte[0]);
        }
    }

    /// Handle a REPORT_VERSION message (0xF9 - the protocol version).
    fn handle_protocol_version(&mut self, buf: &[u8]) -> Result<Message, Error> {
        self.data.write().protocol_version = format!("{}.{}", buf[1], buf[2]);
        self.events.signal_handshake(HandshakeEvent::ProtocolVersion);
        Ok(Message::ProtocolVersion)
    }

    /// Handle an ANALOG_MESSAGE message (0xE0 - sample from an analog pin).
    ///
    /// Channels above the analog map are ignored silently.
    fn handle_analog_message(&mut self, buf: &[u8]) -> Result<Message, Error> {
        let channel = buf[0] & 0x0F;
        let value = codec::unpack14(buf[1], buf[2]);

        let update = {
            let mut data = self.data.write();
            match data.analog_pins.get(channel as usize).copied() {
                Some(pin) => {
                    let instance = data.get_pin_mut(pin)?;
                    instance.value = value;
                    Some((pin, instance.clone()))
                }
                None => None,
            }
        };
        if let Some((pin, snapshot)) = update {
            self.events.report_pin(pin, snapshot);
        }
        Ok(Message::Analog)
    }

    /// Handle a DIGITAL_MESSAGE message (0x90 - bitmask for a whole port).
    ///
    /// Only pins currently configured as inputs track the mask; pins outside
    /// INPUT mode and pins beyond the table are left untouched.
    fn handle_digital_message(&mut self, buf: &[u8]) -> Result<Message, Error> {
        let port = (buf[0] & 0x0F) as u16;
        let mask = codec::unpack14(buf[1], buf[2]);

        let mut updates = vec![];
        {
            let mut data = self.data.write();
            for bit in 0..8 {
                let pin = 8 * port + bit;
                if let Ok(instance) = data.get_pin_mut(pin) {
                    if instance.mode == PinModeId::INPUT {
                        instance.value = (mask >> bit) & 0x01;
                        updates.push((pin, instance.clone()));
                    }
                }
            }
        }
        for (pin, snapshot) in updates {
            self.events.report_pin(pin, snapshot);
        }
        Ok(Message::Digital)
    }

    /// Handle a START_SYSEX frame: dispatch on the subcommand byte. Unknown
    /// subcommands are discarded.
    fn handle_sysex_message(&mut self, body: &[u8]) -> Result<Message, Error> {
        if body.is_empty() {
            return Ok(Message::EmptyResponse);
        }
        let payload = &body[1..];
        match body[0] {
            CAPABILITY_RESPONSE => self.handle_capability_response(payload),
            ANALOG_MAPPING_RESPONSE => self.handle_analog_mapping_response(payload),
            PIN_STATE_RESPONSE => self.handle_pin_state_response(payload),
            I2C_REPLY => self.handle_i2c_reply(payload),
            REPORT_FIRMWARE => self.handle_firmware_report(payload),
            STRING_DATA => self.handle_string_data(payload),
            _ => {
                trace!("Discarding unexpected sysex: {}", format_as_hex(body));
                Ok(Message::EmptyResponse)
            }
        }
    }

    /// Handle a CAPABILITY_RESPONSE message (0x6C - per-pin supported modes):
    /// the whole pin table is rebuilt.
    fn handle_capability_response(&mut self, payload: &[u8]) -> Result<Message, Error> {
        {
            let mut data = self.data.write();
            data.pins = codec::decode_capabilities(payload);
            data.analog_pins.clear();
        }
        self.events.signal_handshake(HandshakeEvent::CapabilityQuery);
        Ok(Message::CapabilityResponse)
    }

    /// Handle an ANALOG_MAPPING_RESPONSE message (0x6A - channel/pin map).
    fn handle_analog_mapping_response(&mut self, payload: &[u8]) -> Result<Message, Error> {
        {
            let mut data = self.data.write();
            data.analog_pins.clear();
            for (pin, channel) in codec::decode_analog_mapping(payload) {
                match data.get_pin_mut(pin) {
                    Ok(instance) => instance.analog_channel = channel,
                    // Assignments beyond the pin table are ignored.
                    Err(_) => continue,
                }
                data.analog_pins.push(pin);
            }
        }
        self.events
            .signal_handshake(HandshakeEvent::AnalogMappingQuery);
        Ok(Message::AnalogMappingResponse)
    }

    /// Handle a PIN_STATE_RESPONSE message (0x6E - pin mode and state).
    ///
    /// The decoded state lands in `Pin::state`; `Pin::value` is only ever
    /// written by analog/digital messages.
    fn handle_pin_state_response(&mut self, payload: &[u8]) -> Result<Message, Error> {
        let (pin, mode, state) = codec::decode_pin_state(payload)?;
        {
            let mut data = self.data.write();
            let instance = data.get_pin_mut(pin)?;
            instance.mode = mode;
            instance.state = state;
        }
        self.events.resolve_pin_state(
            pin,
            PinState {
                pin,
                mode,
                value: state,
            },
        );
        Ok(Message::PinStateResponse)
    }

    /// Handle an I2C_REPLY message (0x77 - data read from an i2c device).
    fn handle_i2c_reply(&mut self, payload: &[u8]) -> Result<Message, Error> {
        let reply = codec::decode_i2c_reply(payload)?;
        self.events.resolve_i2c_reply(reply);
        Ok(Message::I2CReply)
    }

    /// Handle a REPORT_FIRMWARE message (0x79 - firmware version and name).
    fn handle_firmware_report(&mut self, payload: &[u8]) -> Result<Message, Error> {
        let (version, name) = codec::decode_firmware_report(payload)?;
        {
            let mut data = self.data.write();
            data.firmware_version = version;
            if !name.is_empty() {
                data.firmware_name = name;
            }
        }
        self.events.signal_handshake(HandshakeEvent::FirmwareQuery);
        Ok(Message::FirmwareReport)
    }

    /// Handle a STRING_DATA message (0x71 - free-form text from the board).
    fn handle_string_data(&mut self, payload: &[u8]) -> Result<Message, Error> {
        let text = codec::decode_string_data(payload)?;
        self.events.resolve_string_data(text);
        Ok(Message::StringData)
    }
}

// ########################################
// Request API
//
// Every request serializes its bytes in a single transport write and returns
// as soon as the write completes; nothing here blocks on a response.

impl Client {
    /// Sends a software reset request.
    pub fn software_reset(&mut self) -> Result<(), Error> {
        self.transport.write(&[SYSTEM_RESET])
    }

    /// Configures the mode of a pin.
    ///
    /// # Errors
    /// * `UnknownPin` - the pin index is out of bounds.
    /// * `IncompatibleMode` - the pin does not support the requested mode;
    ///   nothing is written to the wire.
    pub fn set_pin_mode(&mut self, pin: u16, mode: PinModeId) -> Result<(), Error> {
        {
            let mut data = self.data.write();
            let instance = data.get_pin_mut(pin)?;
            if !instance.supports_mode(mode) {
                return Err(Error::from(IncompatibleMode {
                    pin,
                    mode,
                    context: "set_pin_mode",
                }));
            }
            instance.mode = mode;
        }
        self.transport.write(&[SET_PIN_MODE, pin as u8, mode as u8])
    }

    /// Writes a digital level to a pin. The message carries the whole port:
    /// the mask is rebuilt from the current value of every pin in it.
    pub fn digital_write(&mut self, pin: u16, level: bool) -> Result<(), Error> {
        let port = pin / 8;
        let mut mask: u16 = 0;

        {
            let mut data = self.data.write();
            let instance = data.get_pin_mut(pin)?;
            instance.validate_current_mode(PinModeId::OUTPUT)?;
            instance.value = u16::from(level);

            // Pins of the port missing from the table contribute 0.
            for bit in 0..8 {
                if let Ok(neighbor) = data.get_pin(8 * port + bit) {
                    if neighbor.value != 0 {
                        mask |= 1 << bit;
                    }
                }
            }
        }

        let [lsb, msb] = codec::pack14(mask);
        let payload = [DIGITAL_MESSAGE | port as u8, lsb, msb];
        trace!("Digital write: {}", format_as_hex(&payload));
        self.transport.write(&payload)
    }

    /// Writes an analog (PWM, servo...) level to a pin. Pins above 15 do not
    /// fit the standard message and use the extended analog sysex.
    pub fn analog_write(&mut self, pin: u16, level: u16) -> Result<(), Error> {
        self.data.write().get_pin_mut(pin)?.value = level;

        let [lsb, msb] = codec::pack14(level);
        let payload = if pin > 15 {
            let mut body = vec![EXTENDED_ANALOG, pin as u8, lsb, msb];
            if level > 0x4000 {
                body.push(((level >> 14) & 0x7F) as u8);
            }
            codec::sysex(&body)
        } else {
            vec![ANALOG_MESSAGE | pin as u8, lsb, msb]
        };

        trace!("Analog write: {}", format_as_hex(&payload));
        self.transport.write(&payload)
    }

    /// Sets the servo PWM pulse range of a pin, upper bound first as the
    /// board expects it.
    pub fn servo_config(&mut self, pin: u16, max_pulse: u16, min_pulse: u16) -> Result<(), Error> {
        let [max_lsb, max_msb] = codec::pack14(max_pulse);
        let [min_lsb, min_msb] = codec::pack14(min_pulse);
        self.transport.write(&codec::sysex(&[
            SERVO_CONFIG,
            pin as u8,
            max_lsb,
            max_msb,
            min_lsb,
            min_msb,
        ]))
    }

    /// Toggles autonomous reporting of an analog channel. Disabling also
    /// drops the mapped pin's reporting sink.
    pub fn report_analog(&mut self, channel: u8, state: bool) -> Result<(), Error> {
        self.transport
            .write(&[REPORT_ANALOG | channel, u8::from(state)])?;
        if !state {
            let pin = self.data.read().analog_pins.get(channel as usize).copied();
            if let Some(pin) = pin {
                self.events.unwatch_pin(pin);
            }
        }
        Ok(())
    }

    /// Toggles autonomous reporting of a whole digital port. Disabling also
    /// drops the reporting sinks of the port's eight pins.
    pub fn report_digital(&mut self, port: u8, state: bool) -> Result<(), Error> {
        self.transport
            .write(&[REPORT_DIGITAL | port, u8::from(state)])?;
        if !state {
            for bit in 0..8 {
                self.events.unwatch_pin(8 * port as u16 + bit);
            }
        }
        Ok(())
    }

    /// Registers (replacing any previous) the reporting sink of a pin and
    /// returns its receiving end. The sink holds a single pending update;
    /// delivery is best-effort and never blocks the serving loop.
    ///
    /// # Errors
    /// * `UnknownPin` - the pin index is out of bounds.
    pub fn pin_updates(&self, pin: u16) -> Result<mpsc::Receiver<Pin>, Error> {
        self.data.read().get_pin(pin)?;
        Ok(self.events.watch_pin(pin))
    }

    /// Sets how often (in ms) the board pushes analog samples and continuous
    /// i2c reads.
    pub fn sampling_interval(&mut self, interval: u16) -> Result<(), Error> {
        let [lsb, msb] = codec::pack14(interval);
        self.transport
            .write(&codec::sysex(&[SAMPLING_INTERVAL, lsb, msb]))
    }

    // ########################################
    // Queries: fire the request and hand back the receiver its response
    // resolves. Issuing a new query of the same kind replaces the previous
    // waiter, which then reads as a timeout.

    /// Asks the board for its protocol version.
    pub fn query_protocol_version(&mut self) -> Result<oneshot::Receiver<()>, Error> {
        let rx = self.events.await_handshake(HandshakeEvent::ProtocolVersion);
        self.transport.write(&[REPORT_VERSION])?;
        Ok(rx)
    }

    /// Asks the board for its firmware name and version.
    pub fn query_firmware(&mut self) -> Result<oneshot::Receiver<()>, Error> {
        let rx = self.events.await_handshake(HandshakeEvent::FirmwareQuery);
        self.transport.write(&codec::sysex(&[REPORT_FIRMWARE]))?;
        Ok(rx)
    }

    /// Asks the board for the supported modes of all its pins.
    pub fn query_capabilities(&mut self) -> Result<oneshot::Receiver<()>, Error> {
        let rx = self.events.await_handshake(HandshakeEvent::CapabilityQuery);
        self.transport.write(&codec::sysex(&[CAPABILITY_QUERY]))?;
        Ok(rx)
    }

    /// Asks the board for its analog channel/pin mapping.
    pub fn query_analog_mapping(&mut self) -> Result<oneshot::Receiver<()>, Error> {
        let rx = self
            .events
            .await_handshake(HandshakeEvent::AnalogMappingQuery);
        self.transport.write(&codec::sysex(&[ANALOG_MAPPING_QUERY]))?;
        Ok(rx)
    }

    /// Asks the board for the current mode and state of a pin.
    pub fn query_pin_state(&mut self, pin: u16) -> Result<oneshot::Receiver<PinState>, Error> {
        let rx = self.events.await_pin_state(pin);
        self.transport
            .write(&codec::sysex(&[PIN_STATE_QUERY, pin as u8]))?;
        Ok(rx)
    }

    // ########################################
    // I2C

    /// Configures the delay between writing to and reading from an i2c
    /// register. The delay bytes are plain 8-bit little endian, not 7-bit
    /// packed.
    pub fn i2c_config(&mut self, delay: u16) -> Result<(), Error> {
        self.transport.write(&codec::sysex(&[
            I2C_CONFIG,
            (delay & 0xFF) as u8,
            ((delay >> 8) & 0xFF) as u8,
        ]))
    }

    /// Reads `size` bytes from the i2c device at `address`, once.
    pub fn i2c_read(&mut self, address: u8, size: u16) -> Result<oneshot::Receiver<I2CReply>, Error> {
        let rx = self.events.await_i2c_reply();
        let [lsb, msb] = codec::pack14(size);
        self.transport.write(&codec::sysex(&[
            I2C_REQUEST,
            address,
            I2C_MODE_READ << 3,
            lsb,
            msb,
        ]))?;
        Ok(rx)
    }

    /// Writes `data` to the i2c device at `address`.
    pub fn i2c_write(&mut self, address: u8, data: &[u8]) -> Result<(), Error> {
        let mut body = vec![I2C_REQUEST, address, I2C_MODE_WRITE << 3];
        for &byte in data {
            body.extend_from_slice(&codec::pack14(byte as u16));
        }
        self.transport.write(&codec::sysex(&body))
    }

    // ########################################
    // Board-initiated data

    /// Registers a waiter for the next string-data frame pushed by the board.
    pub fn string_data(&self) -> oneshot::Receiver<String> {
        self.events.await_string_data()
    }

    /// Registers (replacing any previous) the serving-loop error sink.
    pub fn errors(&self) -> mpsc::Receiver<Error> {
        self.events.watch_errors()
    }
}

impl Display for Client {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let data = self.data.read();
        write!(
            f,
            "Client [firmware={}, version={}, protocol={}, transport={}]",
            data.firmware_name, data.firmware_version, data.protocol_version, self.transport
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{uno_board_state, uno_handshake_stream, MockTransport};

    fn _create_client() -> Client {
        let mut client = Client::from(MockTransport::default());
        client.data = Arc::new(RwLock::new(uno_board_state()));
        client
    }

    fn _create_client_with_data(data: &[u8]) -> Client {
        let mut client = Client::from(MockTransport::with_data(data));
        client.data = Arc::new(RwLock::new(uno_board_state()));
        client
    }

    fn _get_mock(client: &Client) -> MockTransport {
        client
            .transport
            .as_any()
            .downcast_ref::<MockTransport>()
            .unwrap()
            .clone()
    }

    #[test]
    fn test_creation() {
        let client = Client::default();
        assert!(client.transport.as_any().downcast_ref::<Serial>().is_some());

        let client = Client::new("try");
        let transport = client.transport.as_any().downcast_ref::<Serial>();
        assert!(transport.is_some());
        assert_eq!(transport.unwrap().get_port(), String::from("try"));

        let client = Client::from(MockTransport::default());
        assert!(client
            .transport
            .as_any()
            .downcast_ref::<MockTransport>()
            .is_some());
        assert!(!client.is_connected());
    }

    #[test]
    fn test_software_reset() {
        let mut client = _create_client();

        let result = client.software_reset();
        assert!(result.is_ok(), "{:?}", result);

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xFF]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
    }

    #[tokio::test]
    async fn test_connect() {
        let mut client = Client::from(MockTransport::with_data(&uno_handshake_stream()));
        let result = client.connect();
        assert!(result.is_ok(), "{:?}", result);

        assert!(client.is_connected());
        assert_eq!(client.protocol_version(), "2.3");
        assert_eq!(client.firmware_version(), "2.3");
        assert_eq!(client.firmware_name(), "StandardFirmata.ino");

        {
            let data = client.get_data().read();
            assert_eq!(data.pins.len(), 20);
            assert_eq!(data.analog_pins, vec![14, 15, 16, 17, 18, 19]);
            for (channel, &pin) in data.analog_pins.iter().enumerate() {
                assert_eq!(data.pins[pin as usize].analog_channel as usize, channel);
            }
        }

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[
                0xFF, // software reset
                0xF9, // protocol version query
                0xF0, 0x79, 0xF7, // firmware query
                0xF0, 0x6B, 0xF7, // capability query
                0xF0, 0x69, 0xF7, // analog mapping query
                0xD0, 0x01, // report digital, port 0
                0xD1, 0x01, // report digital, port 1
            ]),
            "Sending sequence is correct [{}]",
            format_as_hex(&mock.written())
        );

        assert!(client.disconnect().is_ok());
        assert!(!client.is_connected());
        assert!(!mock.is_open());
    }

    #[tokio::test]
    async fn test_connection_guards() {
        let mut client = Client::from(MockTransport::with_data(&uno_handshake_stream()));

        let result = client.disconnect();
        assert_eq!(
            result.err().unwrap().to_string(),
            "Protocol error: Client is not connected."
        );

        client.connect().unwrap();
        let result = client.connect();
        assert_eq!(
            result.err().unwrap().to_string(),
            "Protocol error: Client is already connected."
        );

        client.disconnect().unwrap();
        // A spent client never reconnects.
        let result = client.connect();
        assert_eq!(
            result.err().unwrap().to_string(),
            "Protocol error: Client has been disconnected and cannot reconnect."
        );
    }

    #[test]
    fn test_connect_aborts_on_dead_line() {
        // The board answers the protocol version query, then goes mute.
        let mut client = Client::from(MockTransport::with_data(&[0xF9, 2, 3]));
        let result = client.connect();
        assert_eq!(
            result.err().unwrap().to_string(),
            "Protocol error: mock stream exhausted."
        );
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_serving_loop_reports_errors() {
        let mock = MockTransport::with_data(&uno_handshake_stream());
        // A truncated i2c reply arrives after handshake: the frame is
        // dropped, the error posted, and the loop keeps going.
        mock.feed(&[0xF0, 0x77, 0x02, 0x02, 0xF7]);

        let mut client = Client::from(mock);
        let mut errors = client.errors();
        client.connect().unwrap();

        let error = errors.recv().await.unwrap();
        assert_eq!(
            error.to_string(),
            "Protocol error: Not enough bytes received - 'decode_i2c_reply' expected 6 bytes, 2 received."
        );
    }

    #[test]
    fn test_handle_protocol_version() {
        let mut client = _create_client_with_data(&[0xF9, 0x02, 0x03]);

        let result = client.read_and_decode();
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(result.unwrap(), Message::ProtocolVersion);
        assert_eq!(client.protocol_version(), "2.3");
    }

    #[test]
    fn test_handle_analog_message() {
        let mut client = _create_client_with_data(&[
            0xE0, 0x23, 0x05, // channel 0 = 675
            0xE1, 0x23, 0x06, // channel 1 = 803
            0xE7, 0x01, 0x00, // channel 7: unmapped on an Uno
        ]);
        let mut updates = client.pin_updates(14).unwrap();

        assert_eq!(client.read_and_decode().unwrap(), Message::Analog);
        assert_eq!(client.get_data().read().get_pin(14).unwrap().value, 675);
        assert_eq!(updates.try_recv().unwrap().value, 675);

        assert_eq!(client.read_and_decode().unwrap(), Message::Analog);
        assert_eq!(client.get_data().read().get_pin(15).unwrap().value, 803);

        // Channels above the analog map are dropped silently.
        assert_eq!(client.read_and_decode().unwrap(), Message::Analog);
        let data = client.get_data().read();
        assert!(data.pins.iter().all(|pin| pin.value != 1));
    }

    #[test]
    fn test_handle_digital_message() {
        let mut client = _create_client_with_data(&[
            0x90, 0x04, 0x00, // port 0, bit 2 high
            0x90, 0x08, 0x00, // port 0, bit 3 high
        ]);
        client.get_data().write().get_pin_mut(2).unwrap().mode = PinModeId::INPUT;
        let mut updates = client.pin_updates(2).unwrap();

        assert_eq!(client.read_and_decode().unwrap(), Message::Digital);
        {
            let data = client.get_data().read();
            assert_eq!(data.get_pin(2).unwrap().value, 1);
            for pin in [0, 1, 3, 4, 5, 6, 7] {
                assert_eq!(data.get_pin(pin).unwrap().value, 0);
            }
        }
        assert_eq!(updates.try_recv().unwrap().value, 1);

        // Pin 3 is not in INPUT mode: the message does not touch it.
        assert_eq!(client.read_and_decode().unwrap(), Message::Digital);
        {
            let data = client.get_data().read();
            assert_eq!(data.get_pin(3).unwrap().value, 0);
            assert_eq!(data.get_pin(3).unwrap().mode, PinModeId::OUTPUT);
            // Pin 2 reads low again.
            assert_eq!(data.get_pin(2).unwrap().value, 0);
        }
    }

    #[test]
    fn test_handle_empty_sysex() {
        // Not a valid command byte: the whole frame is discarded.
        let mut client = _create_client_with_data(&[0x11, 0x00, 0x00]);
        assert_eq!(client.read_and_decode().unwrap(), Message::EmptyResponse);

        // Valid sysex envelope, unknown subcommand.
        let mut client = _create_client_with_data(&[0xF0, 0x11, 0x11, 0xF7]);
        assert_eq!(client.read_and_decode().unwrap(), Message::EmptyResponse);

        // Sysex closed immediately.
        let mut client = _create_client_with_data(&[0xF0, 0xF7, 0x00]);
        assert_eq!(client.read_and_decode().unwrap(), Message::EmptyResponse);
    }

    #[test]
    fn test_handle_capability_response() {
        let mut client = _create_client_with_data(&[
            0xF0, 0x6C, 0x00, 0x08, 0x7F, 0x00, 0x08, 0x01, 0x08, 0x7F, 0xF7,
        ]);
        let result = client.read_and_decode();
        assert_eq!(result.unwrap(), Message::CapabilityResponse);
        {
            let data = client.get_data().read();
            assert_eq!(data.pins.len(), 2, "{:?}", data.pins);
            assert_eq!(data.get_pin(0).unwrap().supported_modes.len(), 1);
            assert_eq!(data.get_pin(1).unwrap().supported_modes.len(), 2);
            // The previous analog map does not survive a rebuild.
            assert!(data.analog_pins.is_empty());
        }
    }

    #[test]
    fn test_handle_analog_mapping_response() {
        let mut client = _create_client_with_data(&[0xF0, 0x6A, 0x7F, 0x01, 0x7F, 0xF7]);
        let result = client.read_and_decode();
        assert_eq!(result.unwrap(), Message::AnalogMappingResponse);
        {
            let data = client.get_data().read();
            assert_eq!(data.analog_pins, vec![1]);
            assert_eq!(data.get_pin(1).unwrap().analog_channel, 1);
        }
    }

    #[test]
    fn test_handle_pin_state_response() {
        let mut client = _create_client_with_data(&[
            0xF0, 0x6E, 13, 1, 1, 0xF7, // pin 13, OUTPUT, state 1
            0xF0, 0x6E, 0x00, 0xF7, // truncated response
        ]);
        let mut state_rx = client.query_pin_state(13).unwrap();

        let result = client.read_and_decode();
        assert_eq!(result.unwrap(), Message::PinStateResponse);
        assert_eq!(
            state_rx.try_recv().unwrap(),
            PinState {
                pin: 13,
                mode: PinModeId::OUTPUT,
                value: 1,
            }
        );
        {
            let data = client.get_data().read();
            assert_eq!(data.get_pin(13).unwrap().state, 1);
            assert_eq!(data.get_pin(13).unwrap().mode, PinModeId::OUTPUT);
            // The reported value is not touched by pin-state responses.
            assert_eq!(data.get_pin(13).unwrap().value, 0);
        }

        let result = client.read_and_decode();
        assert_eq!(
            result.err().unwrap().to_string(),
            "Protocol error: Not enough bytes received - 'decode_pin_state' expected 3 bytes, 1 received."
        );
    }

    #[test]
    fn test_handle_i2c_reply() {
        let mut client = _create_client_with_data(&[
            0xF0, 0x77, 9, 0, 0, 0, 24, 1, 1, 0, 26, 1, 0xF7,
        ]);
        let mut reply_rx = client.i2c_read(9, 3).unwrap();

        let mock = _get_mock(&client);
        assert!(
            mock.written()
                .starts_with(&[0xF0, 0x76, 0x09, 0x08, 0x03, 0x00, 0xF7]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );

        assert_eq!(client.read_and_decode().unwrap(), Message::I2CReply);
        assert_eq!(
            reply_rx.try_recv().unwrap(),
            I2CReply {
                address: 9,
                register: 0,
                data: vec![152, 1, 154],
            }
        );
    }

    #[test]
    fn test_handle_firmware_report() {
        let mut client = _create_client_with_data(&[
            240, 121, 2, 3, 83, 0, 116, 0, 97, 0, 110, 0, 100, 0, 97, 0, 114, 0, 100, 0, 70, 0,
            105, 0, 114, 0, 109, 0, 97, 0, 116, 0, 97, 0, 46, 0, 105, 0, 110, 0, 111, 0, 247,
        ]);
        client.get_data().write().firmware_name = String::new();

        assert_eq!(client.read_and_decode().unwrap(), Message::FirmwareReport);
        assert_eq!(client.firmware_version(), "2.3");
        assert_eq!(client.firmware_name(), "StandardFirmata.ino");

        // Not enough data.
        let mut client = _create_client_with_data(&[0xF0, 0x79, 0x02, 0xF7]);
        let result = client.read_and_decode();
        assert_eq!(
            result.err().unwrap().to_string(),
            "Protocol error: Not enough bytes received - 'decode_firmware_report' expected 2 bytes, 1 received."
        );
    }

    #[test]
    fn test_handle_string_data() {
        let mut frame = vec![0xF0, 0x71];
        frame.extend_from_slice(b"Hello Firmata!");
        frame.push(0xF7);
        let mut client = _create_client_with_data(&frame);
        let mut string_rx = client.string_data();

        assert_eq!(client.read_and_decode().unwrap(), Message::StringData);
        assert_eq!(string_rx.try_recv().unwrap(), "Hello Firmata!");
    }

    #[test]
    fn test_set_pin_mode() {
        let mut client = _create_client();

        let result = client.set_pin_mode(8, PinModeId::PWM);
        assert!(result.is_ok(), "{:?}", result);

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xF4, 0x08, 0x03]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
        assert_eq!(
            client.get_data().read().get_pin(8).unwrap().mode,
            PinModeId::PWM
        );

        let result = client.set_pin_mode(8, PinModeId::SHIFT);
        assert_eq!(
            result.err().unwrap().to_string(),
            "Hardware error: Pin (8) not compatible with mode (SHIFT) - set_pin_mode."
        );

        let result = client.set_pin_mode(66, PinModeId::OUTPUT);
        assert_eq!(
            result.err().unwrap().to_string(),
            "Hardware error: Unknown pin 66."
        );
    }

    #[test]
    fn test_digital_write() {
        let mut client = _create_client();

        let result = client.digital_write(13, true);
        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(client.get_data().read().get_pin(13).unwrap().value, 1);

        // Writing the same level twice produces identical on-wire bytes.
        client.digital_write(13, true).unwrap();
        let mock = _get_mock(&client);
        assert!(
            mock.written()
                .starts_with(&[0x91, 0x20, 0x00, 0x91, 0x20, 0x00]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );

        // The mask carries every high pin of the port.
        client.digital_write(9, true).unwrap();
        assert!(
            mock.written()[6..].starts_with(&[0x91, 0x22, 0x00]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );

        let result = client.digital_write(66, true);
        assert_eq!(
            result.err().unwrap().to_string(),
            "Hardware error: Unknown pin 66."
        );

        // Digital writes only make sense on a pin driven as OUTPUT.
        client.get_data().write().get_pin_mut(2).unwrap().mode = PinModeId::INPUT;
        let result = client.digital_write(2, true);
        assert_eq!(
            result.err().unwrap().to_string(),
            "Hardware error: Pin (2) not compatible with mode (INPUT) - check_current_mode."
        );
    }

    #[test]
    fn test_analog_write() {
        let mut client = _create_client();

        let result = client.analog_write(3, 170);
        assert!(result.is_ok(), "{:?}", result);

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xE3, 0x2A, 0x01]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
        assert_eq!(client.get_data().read().get_pin(3).unwrap().value, 170);

        let result = client.analog_write(42, 0);
        assert_eq!(
            result.err().unwrap().to_string(),
            "Hardware error: Unknown pin 42."
        );
    }

    #[test]
    fn test_extended_analog_write() {
        let mut client = _create_client();

        // The pin is over 15 and the value over 14 bits: extended message
        // with a third value byte.
        let result = client.analog_write(16, 17000);
        assert!(result.is_ok(), "{:?}", result);

        let mock = _get_mock(&client);
        assert!(
            mock.written()
                .starts_with(&[0xF0, 0x6F, 0x10, 0x68, 0x04, 0x01, 0xF7]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
        assert_eq!(client.get_data().read().get_pin(16).unwrap().value, 17000);
    }

    #[test]
    fn test_servo_config() {
        let mut client = _create_client();

        let result = client.servo_config(8, 2500, 500);
        assert!(result.is_ok(), "{:?}", result);

        let mock = _get_mock(&client);
        assert!(
            mock.written()
                .starts_with(&[0xF0, 0x70, 0x08, 0x44, 0x13, 0x74, 0x03, 0xF7]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
    }

    #[test]
    fn test_report_analog() {
        let mut client = _create_client_with_data(&[0xE2, 0x01, 0x00]);

        client.report_analog(2, true).unwrap();
        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xC2, 0x01]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );

        // Disabling reporting drops the mapped pin's sink: the update still
        // lands in the pin table but nothing is delivered.
        let mut updates = client.pin_updates(16).unwrap();
        client.report_analog(2, false).unwrap();
        assert!(mock.written()[2..].starts_with(&[0xC2, 0x00]));

        client.read_and_decode().unwrap();
        assert_eq!(client.get_data().read().get_pin(16).unwrap().value, 1);
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn test_report_digital() {
        let mut client = _create_client();

        client.report_digital(1, true).unwrap();
        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xD1, 0x01]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );

        let _updates = client.pin_updates(9).unwrap();
        client.report_digital(1, false).unwrap();
        assert!(mock.written()[2..].starts_with(&[0xD1, 0x00]));
    }

    #[test]
    fn test_sampling_interval() {
        let mut client = _create_client();

        client.sampling_interval(100).unwrap();

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xF0, 0x7A, 0x64, 0x00, 0xF7]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
    }

    #[test]
    fn test_queries() {
        let mut client = _create_client();

        client.query_protocol_version().unwrap();
        client.query_firmware().unwrap();
        client.query_capabilities().unwrap();
        client.query_analog_mapping().unwrap();
        client.query_pin_state(13).unwrap();

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[
                0xF9, // protocol version query
                0xF0, 0x79, 0xF7, // firmware query
                0xF0, 0x6B, 0xF7, // capability query
                0xF0, 0x69, 0xF7, // analog mapping query
                0xF0, 0x6D, 0x0D, 0xF7, // pin state query, pin 13
            ]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
    }

    #[test]
    fn test_reissued_query_replaces_waiter() {
        let mut client = _create_client_with_data(&[0xF0, 0x79, 0x02, 0x03, 0xF7]);

        let mut first = client.query_firmware().unwrap();
        let mut second = client.query_firmware().unwrap();
        client.read_and_decode().unwrap();

        // The replaced waiter is never signaled: it reads as a timeout.
        assert!(first.try_recv().is_err());
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_i2c_config() {
        let mut client = _create_client();

        client.i2c_config(1000).unwrap();

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[0xF0, 0x78, 0xE8, 0x03, 0xF7]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
    }

    #[test]
    fn test_i2c_write() {
        let mut client = _create_client();

        client.i2c_write(0x40, &[0x01, 0x02, 0x03]).unwrap();

        let mock = _get_mock(&client);
        assert!(
            mock.written().starts_with(&[
                0xF0, 0x76, 0x40, 0x00, 0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0xF7
            ]),
            "Buffer data has been sent [{}]",
            format_as_hex(&mock.written())
        );
    }

    #[test]
    fn test_pin_updates_unknown_pin() {
        let client = _create_client();
        let result = client.pin_updates(66);
        assert_eq!(
            result.err().unwrap().to_string(),
            "Hardware error: Unknown pin 66."
        );
    }

    #[test]
    fn test_display() {
        let client = _create_client();
        assert_eq!(
            format!("{}", client),
            "Client [firmware=StandardFirmata.ino, version=2.3, protocol=2.3, transport=MockTransport]"
        );
    }
}
