//! Listeners that turn channel and pairing callbacks into terminal output.

use {
    engage_protocol::{EventKind, FrameError, NewMessage},
    engage_realtime::EventListener,
    engage_whatsapp::PairingListener,
    serde_json::{Value, json},
    tokio::sync::mpsc,
    tracing::{info, warn},
};

/// Prints every delivered event to stdout as one JSON line.
pub struct EventPrinter;

impl EventPrinter {
    fn emit(&self, event: &str, data: Value) {
        println!("{}", json!({ "event": event, "data": data }));
    }
}

impl EventListener for EventPrinter {
    fn on_new_message(&self, message: NewMessage) {
        match serde_json::to_value(&message) {
            Ok(data) => self.emit(EventKind::NewMessage.as_str(), data),
            Err(e) => warn!(error = %e, "failed to encode message"),
        }
    }

    fn on_new_customer(&self, data: Value) {
        self.emit(EventKind::NewCustomer.as_str(), data);
    }

    fn on_customer_updated(&self, data: Value) {
        self.emit(EventKind::CustomerUpdated.as_str(), data);
    }

    fn on_message_sent(&self, data: Value) {
        self.emit(EventKind::MessageSent.as_str(), data);
    }

    fn on_connection_status(&self, data: Value) {
        self.emit(EventKind::ConnectionStatus.as_str(), data);
    }

    fn on_connection_change(&self, connected: bool) {
        if connected {
            info!("event channel open");
        } else {
            info!("event channel closed");
        }
    }

    fn on_jid_remap(&self, old_jid: &str, new_jid: &str) {
        self.emit("jid_remap", json!({ "old_jid": old_jid, "new_jid": new_jid }));
    }

    fn on_frame_error(&self, error: &FrameError) {
        warn!(error = %error, "skipped undecodable event");
    }
}

#[derive(Debug)]
pub enum PairingOutcome {
    Code(String),
    Success,
    Error(String),
    Timeout,
}

/// Hands pairing callbacks to the command loop.
pub struct PairingForwarder {
    tx: mpsc::UnboundedSender<PairingOutcome>,
}

impl PairingForwarder {
    pub fn new(tx: mpsc::UnboundedSender<PairingOutcome>) -> Self {
        Self { tx }
    }

    fn forward(&self, outcome: PairingOutcome) {
        let _ = self.tx.send(outcome);
    }
}

impl PairingListener for PairingForwarder {
    fn on_code(&self, qr_image: &str) {
        self.forward(PairingOutcome::Code(qr_image.to_string()));
    }

    fn on_success(&self) {
        self.forward(PairingOutcome::Success);
    }

    fn on_error(&self, message: &str) {
        self.forward(PairingOutcome::Error(message.to_string()));
    }

    fn on_timeout(&self) {
        self.forward(PairingOutcome::Timeout);
    }
}
