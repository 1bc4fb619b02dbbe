//! Typed delivery sinks tying request opcodes to their asynchronous
//! responses.
//!
//! Correlation is by opcode, never by identifier: each response kind has its
//! own slot. One-shot slots are replaced when a new query of the same kind
//! goes out; a replaced waiter is simply never signaled and must treat the
//! closed channel as a timeout. Reporting sinks are bounded to one pending
//! update and drop on overflow.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::client::data::{I2CReply, Pin, PinState};
use crate::errors::Error;

/// Handshake responses a caller can wait on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeEvent {
    ProtocolVersion,
    FirmwareQuery,
    CapabilityQuery,
    AnalogMappingQuery,
}

#[derive(Debug, Default)]
pub(crate) struct EventSinks {
    /// Per-pin reporting sinks, fed by analog/digital messages.
    pin_reports: Mutex<HashMap<u16, mpsc::Sender<Pin>>>,
    /// Per-pin one-shot waiters for pin-state responses.
    pin_states: Mutex<HashMap<u16, oneshot::Sender<PinState>>>,
    /// One-shot waiter for the next I2C reply.
    i2c: Mutex<Option<oneshot::Sender<I2CReply>>>,
    /// One-shot waiter for the next string-data frame.
    string_data: Mutex<Option<oneshot::Sender<String>>>,
    /// One-shot completion signals for the four handshake queries.
    protocol_version: Mutex<Option<oneshot::Sender<()>>>,
    firmware: Mutex<Option<oneshot::Sender<()>>>,
    capability: Mutex<Option<oneshot::Sender<()>>>,
    analog_mapping: Mutex<Option<oneshot::Sender<()>>>,
    /// Best-effort sink for serving-loop errors.
    errors: Mutex<Option<mpsc::Sender<Error>>>,
}

impl EventSinks {
    // ########################################
    // Per-pin reporting

    /// Registers (replacing any previous) the reporting sink for a pin and
    /// returns its receiving end.
    pub fn watch_pin(&self, pin: u16) -> mpsc::Receiver<Pin> {
        let (tx, rx) = mpsc::channel(1);
        self.pin_reports.lock().insert(pin, tx);
        rx
    }

    /// Drops the reporting sink for a pin, if any.
    pub fn unwatch_pin(&self, pin: u16) {
        self.pin_reports.lock().remove(&pin);
    }

    /// Delivers a pin update to its reporting sink. Dropped when no sink is
    /// registered or the sink already holds a pending update.
    pub fn report_pin(&self, pin: u16, update: Pin) {
        if let Some(sink) = self.pin_reports.lock().get(&pin) {
            let _ = sink.try_send(update);
        }
    }

    // ########################################
    // One-shot waiters

    pub fn await_pin_state(&self, pin: u16) -> oneshot::Receiver<PinState> {
        let (tx, rx) = oneshot::channel();
        self.pin_states.lock().insert(pin, tx);
        rx
    }

    pub fn resolve_pin_state(&self, pin: u16, state: PinState) {
        if let Some(waiter) = self.pin_states.lock().remove(&pin) {
            let _ = waiter.send(state);
        }
    }

    pub fn await_i2c_reply(&self) -> oneshot::Receiver<I2CReply> {
        let (tx, rx) = oneshot::channel();
        *self.i2c.lock() = Some(tx);
        rx
    }

    pub fn resolve_i2c_reply(&self, reply: I2CReply) {
        if let Some(waiter) = self.i2c.lock().take() {
            let _ = waiter.send(reply);
        }
    }

    pub fn await_string_data(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        *self.string_data.lock() = Some(tx);
        rx
    }

    pub fn resolve_string_data(&self, data: String) {
        if let Some(waiter) = self.string_data.lock().take() {
            let _ = waiter.send(data);
        }
    }

    pub fn await_handshake(&self, event: HandshakeEvent) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.handshake_slot(event).lock() = Some(tx);
        rx
    }

    pub fn signal_handshake(&self, event: HandshakeEvent) {
        if let Some(waiter) = self.handshake_slot(event).lock().take() {
            let _ = waiter.send(());
        }
    }

    fn handshake_slot(&self, event: HandshakeEvent) -> &Mutex<Option<oneshot::Sender<()>>> {
        match event {
            HandshakeEvent::ProtocolVersion => &self.protocol_version,
            HandshakeEvent::FirmwareQuery => &self.firmware,
            HandshakeEvent::CapabilityQuery => &self.capability,
            HandshakeEvent::AnalogMappingQuery => &self.analog_mapping,
        }
    }

    // ########################################
    // Error sink

    /// Registers (replacing any previous) the serving-loop error sink.
    pub fn watch_errors(&self) -> mpsc::Receiver<Error> {
        let (tx, rx) = mpsc::channel(1);
        *self.errors.lock() = Some(tx);
        rx
    }

    /// Best-effort post of a serving-loop error.
    pub fn post_error(&self, error: Error) {
        if let Some(sink) = self.errors.lock().as_ref() {
            let _ = sink.try_send(error);
        }
    }
}
