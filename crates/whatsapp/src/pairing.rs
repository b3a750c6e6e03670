//! One-shot device pairing over the server's event stream.
//!
//! The server pushes zero or more `code` records followed by exactly one
//! terminal record (`success`, `error` or `timeout`). An attempt ends at the
//! terminal record, at a transport failure, or when the caller cancels it.
//! Nothing is retried; call [`PairingStream::start`] again for a new attempt.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use {
    engage_client::ApiClient,
    engage_protocol::{EVENT_STREAM_MIME, PairEvent, PairEventKind, paths},
    futures::StreamExt,
    reqwest::header::ACCEPT,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::sse::{EventStreamParser, StreamRecord};

pub const NO_CREDENTIAL: &str = "no authentication token";
pub const START_FAILED: &str = "failed to start pairing stream";

/// Outcome callbacks for one pairing attempt.
pub trait PairingListener: Send + Sync + 'static {
    /// A new code image (usually a `data:` URI) to display.
    fn on_code(&self, qr_image: &str);

    fn on_success(&self);

    fn on_error(&self, message: &str);

    fn on_timeout(&self);
}

/// Control handle for a running attempt.
#[derive(Debug, Clone)]
pub struct PairingHandle {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    closed: AtomicBool,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl Shared {
    fn new() -> Self {
        Self {
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns `false` if already closed.
    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        true
    }
}

impl PairingHandle {
    /// Abort the stream. No callback fires afterwards; later calls do nothing.
    pub fn cancel(&self) {
        if self.shared.close() {
            debug!("pairing stream cancelled");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolve once the reader has released the stream.
    pub async fn finished(&self) {
        self.shared.finished.cancelled().await;
    }
}

pub struct PairingStream;

impl PairingStream {
    /// Open the pairing stream and dispatch its records to `listener`.
    ///
    /// Without a credential `on_error` fires before this returns and no
    /// request is made.
    pub fn start(client: &ApiClient, listener: Arc<dyn PairingListener>) -> PairingHandle {
        let shared = Arc::new(Shared::new());
        let handle = PairingHandle {
            shared: Arc::clone(&shared),
        };

        if !client.session().is_authenticated() {
            warn!("pairing requested without a credential");
            listener.on_error(NO_CREDENTIAL);
            shared.close();
            shared.finished.cancel();
            return handle;
        }

        let client = client.clone();
        tokio::spawn(async move {
            let _finished = shared.finished.clone().drop_guard();
            let reader = Reader {
                client: &client,
                listener: listener.as_ref(),
                shared: &shared,
            };
            tokio::select! {
                () = shared.cancel.cancelled() => debug!("pairing stream released"),
                () = reader.run() => {},
            }
        });
        handle
    }
}

struct Reader<'a> {
    client: &'a ApiClient,
    listener: &'a dyn PairingListener,
    shared: &'a Shared,
}

enum Flow {
    Continue,
    Stop,
}

impl Reader<'_> {
    async fn run(&self) {
        let url = match self.client.url(paths::PAIRING_STREAM) {
            Ok(url) => url,
            Err(e) => return self.fail(&e.message),
        };
        let request = self
            .client
            .authorize(self.client.http().get(url))
            .header(ACCEPT, EVENT_STREAM_MIME);

        info!("opening pairing stream");
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return self.fail(&format!("{START_FAILED}: {e}")),
        };
        if !response.status().is_success() {
            let message = establish_error(response).await;
            return self.fail(&message);
        }

        let mut body = response.bytes_stream();
        let mut parser = EventStreamParser::new();
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => return self.fail(&format!("failed to read pairing stream: {e}")),
            };
            let records = match parser.feed(&chunk) {
                Ok(records) => records,
                Err(e) => return self.fail(&e.to_string()),
            };
            for record in records {
                if self.shared.is_closed() {
                    return;
                }
                if let Flow::Stop = self.dispatch(&record) {
                    return;
                }
            }
        }

        if parser.has_pending() {
            debug!("pairing stream ended inside a record");
        }
        info!("pairing stream ended without an outcome");
        self.shared.close();
    }

    fn dispatch(&self, record: &StreamRecord) -> Flow {
        let event = match PairEvent::from_record(record.event.as_deref(), &record.data) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, record_event = ?record.event, "dropping malformed pairing record");
                return Flow::Continue;
            },
        };

        match event.kind() {
            PairEventKind::Code => match event.image() {
                Some(image) => {
                    debug!(len = image.len(), "pairing code received");
                    if self.shared.is_closed() {
                        return Flow::Stop;
                    }
                    self.listener.on_code(image);
                },
                None => debug!("pairing code without image"),
            },
            PairEventKind::Success => {
                info!("device paired");
                if self.shared.close() {
                    self.listener.on_success();
                }
                return Flow::Stop;
            },
            PairEventKind::Error => {
                let message = event.error_message();
                warn!(error = message, "pairing failed");
                if self.shared.close() {
                    self.listener.on_error(message);
                }
                return Flow::Stop;
            },
            PairEventKind::Timeout => {
                info!("pairing timed out");
                if self.shared.close() {
                    self.listener.on_timeout();
                }
                return Flow::Stop;
            },
            PairEventKind::Other(name) => debug!(event = %name, "ignoring pairing record"),
        }
        Flow::Continue
    }

    /// Report a failure unless the attempt already ended.
    fn fail(&self, message: &str) {
        if !self.shared.close() {
            return;
        }
        warn!(error = message, "pairing stream failed");
        self.listener.on_error(message);
    }
}

/// Best-effort message for a rejected stream request.
async fn establish_error(response: reqwest::Response) -> String {
    let status = response.status();
    let status_line = match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    };
    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => value
            .get("error")
            .and_then(serde_json::Value::as_str)
            .filter(|message| !message.is_empty())
            .map_or_else(|| START_FAILED.to_string(), str::to_string),
        Err(_) => status_line,
    }
}
