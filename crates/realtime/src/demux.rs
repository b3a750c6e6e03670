//! Routing of one inbound delivery to listener callbacks.

use {
    engage_protocol::{EventFrame, MessageClass, parse_frames},
    tracing::{debug, trace, warn},
};

use crate::listener::EventListener;

/// Dispatch every record of `payload` in order. Returns how many records
/// reached a callback.
pub fn dispatch(payload: &str, listener: &dyn EventListener) -> usize {
    let mut delivered = 0;
    for record in parse_frames(payload) {
        let raw = match record {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "dropping malformed event frame");
                listener.on_frame_error(&e);
                continue;
            },
        };
        if raw.kind().is_none() {
            debug!(event = %raw.event, "ignoring unknown event");
            continue;
        }
        match raw.into_typed() {
            Ok(Some(frame)) => {
                if deliver(frame, listener) {
                    delivered += 1;
                }
            },
            Ok(None) => {},
            Err(e) => {
                warn!(error = %e, "dropping event with invalid payload");
                listener.on_frame_error(&e);
            },
        }
    }
    delivered
}

fn deliver(frame: EventFrame, listener: &dyn EventListener) -> bool {
    match frame {
        EventFrame::NewMessage(message) => match message.classify() {
            MessageClass::JidRemap { old_jid, new_jid } => {
                debug!(%old_jid, %new_jid, "jid remapped");
                listener.on_jid_remap(&old_jid, &new_jid);
            },
            MessageClass::Deliverable => {
                trace!(message_id = %message.message_id, "new message");
                listener.on_new_message(message);
            },
            MessageClass::Empty => {
                debug!(message_id = %message.message_id, "dropping empty message");
                return false;
            },
        },
        EventFrame::NewCustomer(data) => listener.on_new_customer(data),
        EventFrame::CustomerUpdated(data) => listener.on_customer_updated(data),
        EventFrame::MessageSent(data) => listener.on_message_sent(data),
        EventFrame::ConnectionStatus(data) => listener.on_connection_status(data),
    }
    true
}
