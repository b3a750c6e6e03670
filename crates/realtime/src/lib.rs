//! Live event channel: a reconnecting WebSocket client that turns pushed
//! `{event, data}` frames into [`EventListener`] callbacks.

pub mod channel;
pub mod demux;
pub mod error;
pub mod listener;
pub mod reconnect;

pub use {
    channel::{ChannelConfig, ChannelState, ChannelStatus, EventChannel, EventChannelHandle},
    error::{Error, Result},
    listener::EventListener,
    reconnect::{ReconnectPolicy, ReconnectState},
};
