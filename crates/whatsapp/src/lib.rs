//! WhatsApp channel connection: REST controls and the device pairing stream.

pub mod api;
pub mod pairing;
pub mod sse;

pub use {
    api::{ChannelStatus, ConnectResponse, SendMessageResponse, WhatsAppApi},
    pairing::{PairingHandle, PairingListener, PairingStream},
    sse::{EventStreamParser, StreamError, StreamRecord},
};
