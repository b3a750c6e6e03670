use {
    engage_protocol::{FrameError, NewMessage},
    serde_json::Value,
};

/// Receives event channel notifications.
///
/// Every method defaults to doing nothing, so implementors only override
/// the events they care about. Calls are made from the channel's driver task
/// in delivery order and must not block.
pub trait EventListener: Send + Sync + 'static {
    fn on_new_message(&self, _message: NewMessage) {}

    fn on_new_customer(&self, _data: Value) {}

    fn on_customer_updated(&self, _data: Value) {}

    fn on_message_sent(&self, _data: Value) {}

    fn on_connection_status(&self, _data: Value) {}

    /// `true` when the channel opens, `false` when it closes for any reason.
    fn on_connection_change(&self, _connected: bool) {}

    /// A contact identifier was superseded.
    fn on_jid_remap(&self, _old_jid: &str, _new_jid: &str) {}

    /// A record in a delivery could not be decoded. Its siblings are still
    /// delivered.
    fn on_frame_error(&self, _error: &FrameError) {}
}
