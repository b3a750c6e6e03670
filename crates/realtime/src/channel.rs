//! Event channel client.
//!
//! One driver task owns the socket, the keep-alive ticker and the reconnect
//! timer. [`EventChannelHandle`]s talk to it over a command queue and read
//! its [`ChannelStatus`] from a watch channel, so no state is shared between
//! tasks.

use std::{future::Future, io, pin::Pin, sync::Arc, time::Duration};

use {
    engage_client::{Credential, SessionContext},
    engage_config::{RealtimeConfig, ServiceEndpoint, redact_token},
    engage_protocol::{KEEP_ALIVE_PAYLOAD, PING_INTERVAL_MS, paths},
    futures::{SinkExt, StreamExt},
    secrecy::ExposeSecret,
    tokio::{
        net::TcpStream,
        sync::{mpsc, watch},
        time::{Instant, Interval},
    },
    tokio_tungstenite::{
        MaybeTlsStream, WebSocketStream,
        tungstenite::{self, Message, protocol::CloseFrame},
    },
    tracing::{debug, info, warn},
};

use crate::{
    demux,
    error::{Error, Result},
    listener::EventListener,
    reconnect::{ReconnectPolicy, ReconnectState},
};

/// Stream type returned by `tokio_tungstenite::connect_async`.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    /// The socket is closed or being closed. After an abnormal close the
    /// channel stays here until the reconnect timer moves it to
    /// `Connecting`; otherwise it passes on to `Idle`.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    /// Reconnect attempts spent since the last successful open.
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub ping_interval: Duration,
    /// Bound on the TCP connect plus WebSocket handshake.
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(PING_INTERVAL_MS),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&RealtimeConfig> for ChannelConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            connect_timeout: config.connect_timeout(),
            reconnect: ReconnectPolicy {
                max_attempts: config.max_reconnect_attempts,
                delay: config.reconnect_delay(),
            },
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// Entry point for spawning a channel client.
pub struct EventChannel;

impl EventChannel {
    /// Spawn the driver on the current runtime. It starts `Idle`; call
    /// [`EventChannelHandle::connect`] to open the channel.
    pub fn spawn(
        endpoint: ServiceEndpoint,
        session: SessionContext,
        listener: Arc<dyn EventListener>,
        config: ChannelConfig,
    ) -> EventChannelHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let initial = ChannelStatus {
            state: ChannelState::Idle,
            attempts: 0,
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let driver = Driver {
            credentials: session.subscribe(),
            credentials_open: true,
            endpoint,
            session,
            listener,
            reconnect: ReconnectState::new(config.reconnect),
            config,
            commands: command_rx,
            status: status_tx,
            conn: Conn::None,
            retry_at: None,
        };
        tokio::spawn(driver.run());

        EventChannelHandle {
            commands: command_tx,
            status: status_rx,
        }
    }
}

/// Clonable control handle. Dropping the last one stops the driver.
#[derive(Debug, Clone)]
pub struct EventChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ChannelStatus>,
}

impl EventChannelHandle {
    /// Open the channel if a credential exists. No-op while connecting or open.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Close the channel and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Stop the driver and wait until it has released the socket.
    pub async fn shutdown(&self) {
        if self.command(Command::Shutdown).is_err() {
            return;
        }
        let mut status = self.status.clone();
        while status.changed().await.is_ok() {}
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status().state == ChannelState::Open
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Resolve once the driver reports `state`.
    pub async fn wait_for(&self, state: ChannelState) -> Result<ChannelStatus> {
        let mut status = self.status.clone();
        let current = status
            .wait_for(|s| s.state == state)
            .await
            .map_err(|_| Error::Stopped)?;
        Ok(*current)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Stopped)
    }
}

// ── Driver ───────────────────────────────────────────────────────────────────

type ConnectFuture =
    Pin<Box<dyn Future<Output = std::result::Result<WsStream, tungstenite::Error>> + Send>>;

enum Conn {
    None,
    Connecting(ConnectFuture),
    Open { socket: WsStream, ping: Interval },
}

enum ConnEvent {
    Opened(WsStream),
    ConnectFailed(tungstenite::Error),
    Message(Message),
    Closed(Option<CloseFrame>),
    Ended,
    Failed(tungstenite::Error),
    PingDue,
}

struct Driver {
    endpoint: ServiceEndpoint,
    session: SessionContext,
    listener: Arc<dyn EventListener>,
    config: ChannelConfig,
    reconnect: ReconnectState,
    commands: mpsc::UnboundedReceiver<Command>,
    credentials: watch::Receiver<Option<Credential>>,
    credentials_open: bool,
    status: watch::Sender<ChannelStatus>,
    conn: Conn,
    retry_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        debug!(endpoint = %self.endpoint, "event channel driver started");
        loop {
            let retry_at = self.retry_at;
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect) => self.disconnect().await,
                    Some(Command::Shutdown) | None => break,
                },
                changed = self.credentials.changed(), if self.credentials_open => match changed {
                    Ok(()) => self.credential_changed().await,
                    Err(_) => self.credentials_open = false,
                },
                () = sleep_until(retry_at) => {
                    self.retry_at = None;
                    self.open("reconnect");
                },
                event = next_conn_event(&mut self.conn) => self.handle(event).await,
            }
        }
        self.disconnect().await;
        debug!("event channel driver stopped");
    }

    fn state(&self) -> ChannelState {
        self.status.borrow().state
    }

    fn set_state(&self, state: ChannelState) {
        let attempts = self.reconnect.attempts();
        self.status.send_if_modified(|status| {
            let next = ChannelStatus { state, attempts };
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
    }

    /// Explicit connect request.
    fn connect(&mut self) {
        if matches!(self.state(), ChannelState::Connecting | ChannelState::Open) {
            debug!("event channel already active");
            return;
        }
        self.retry_at = None;
        self.open("connect");
    }

    fn open(&mut self, reason: &'static str) {
        let Some(credential) = self.session.current_credential().filter(Credential::is_valid)
        else {
            debug!(reason, "no credential, event channel stays idle");
            self.set_state(ChannelState::Idle);
            return;
        };
        let url = match self
            .endpoint
            .ws_url(paths::EVENTS, credential.token().expose_secret())
        {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "cannot build event channel url");
                self.set_state(ChannelState::Idle);
                return;
            },
        };

        info!(
            url = %redact_token(&url),
            reason,
            attempt = self.reconnect.attempts(),
            "opening event channel"
        );
        let target = url.to_string();
        let limit = self.config.connect_timeout;
        self.conn = Conn::Connecting(Box::pin(async move {
            match tokio::time::timeout(limit, tokio_tungstenite::connect_async(target)).await {
                Ok(result) => result.map(|(socket, _)| socket),
                Err(_) => Err(tungstenite::Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "event channel handshake timed out",
                ))),
            }
        }));
        self.set_state(ChannelState::Connecting);
    }

    /// Explicit disconnect: suppress reconnects, cancel timers, close.
    async fn disconnect(&mut self) {
        self.reconnect.suppress();
        self.retry_at = None;
        let was_active = matches!(self.state(), ChannelState::Connecting | ChannelState::Open);

        match std::mem::replace(&mut self.conn, Conn::None) {
            Conn::Open { mut socket, .. } => {
                self.set_state(ChannelState::Closing);
                close_socket(&mut socket).await;
            },
            Conn::Connecting(_) => debug!("abandoned pending event channel connect"),
            Conn::None => {},
        }

        self.set_state(ChannelState::Idle);
        if was_active {
            info!("event channel disconnected");
            self.listener.on_connection_change(false);
        }
    }

    async fn credential_changed(&mut self) {
        let present = self
            .credentials
            .borrow_and_update()
            .as_ref()
            .is_some_and(Credential::is_valid);
        match (present, self.state()) {
            (false, ChannelState::Connecting | ChannelState::Open | ChannelState::Closing) => {
                info!("credential lost, closing event channel");
                self.disconnect().await;
            },
            (true, ChannelState::Idle) => {
                info!("credential available, opening event channel");
                self.connect();
            },
            _ => {},
        }
    }

    async fn handle(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Opened(socket) => {
                self.reconnect.on_open();
                let period = self.config.ping_interval;
                let ping = tokio::time::interval_at(Instant::now() + period, period);
                self.conn = Conn::Open { socket, ping };
                self.set_state(ChannelState::Open);
                info!("event channel open");
                self.listener.on_connection_change(true);
            },
            ConnEvent::ConnectFailed(e) => {
                warn!(error = %e, "event channel connect failed");
                self.conn = Conn::None;
                self.closed_abnormally();
            },
            ConnEvent::Message(message) => self.on_message(message),
            ConnEvent::Closed(frame) => {
                match &frame {
                    Some(frame) => info!(
                        code = u16::from(frame.code),
                        reason = frame.reason.as_str(),
                        "event channel closed by server"
                    ),
                    None => info!("event channel closed by server"),
                }
                // Flush the close reply queued when the server's frame was read.
                if let Conn::Open { mut socket, .. } = std::mem::replace(&mut self.conn, Conn::None) {
                    self.set_state(ChannelState::Closing);
                    close_socket(&mut socket).await;
                }
                self.closed_abnormally();
            },
            ConnEvent::Ended => {
                info!("event channel stream ended");
                self.conn = Conn::None;
                self.closed_abnormally();
            },
            ConnEvent::Failed(e) => {
                warn!(error = %e, "event channel failed");
                self.conn = Conn::None;
                self.closed_abnormally();
            },
            ConnEvent::PingDue => {
                let Conn::Open { socket, .. } = &mut self.conn else {
                    return;
                };
                let ping = socket.send(Message::Text(KEEP_ALIVE_PAYLOAD.into()));
                let error = match tokio::time::timeout(SEND_TIMEOUT, ping).await {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => "send timed out".to_string(),
                };
                warn!(%error, "keep-alive failed");
                self.conn = Conn::None;
                self.closed_abnormally();
            },
        }
    }

    fn on_message(&self, message: Message) {
        match message {
            Message::Text(text) => {
                demux::dispatch(text.as_str(), self.listener.as_ref());
            },
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    demux::dispatch(text, self.listener.as_ref());
                },
                Err(e) => warn!(error = %e, "dropping non-utf8 event delivery"),
            },
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_) => {},
        }
    }

    fn closed_abnormally(&mut self) {
        self.listener.on_connection_change(false);
        match self.reconnect.on_abnormal_close() {
            Some(delay) => {
                self.retry_at = Some(Instant::now() + delay);
                info!(
                    attempt = self.reconnect.attempts(),
                    max_attempts = self.reconnect.policy().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "scheduling event channel reconnect"
                );
                self.set_state(ChannelState::Closing);
            },
            None => {
                warn!(
                    max_attempts = self.reconnect.policy().max_attempts,
                    "event channel reconnect budget exhausted"
                );
                self.set_state(ChannelState::Idle);
            },
        }
    }
}

async fn close_socket(socket: &mut WsStream) {
    match tokio::time::timeout(CLOSE_TIMEOUT, socket.close(None)).await {
        Ok(Ok(())) => debug!("event channel closed"),
        Ok(Err(e)) => debug!(error = %e, "event channel close failed"),
        Err(_) => debug!("event channel close timed out"),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Next event from whatever the connection slot holds. Pending forever when
/// the slot is empty.
async fn next_conn_event(conn: &mut Conn) -> ConnEvent {
    match conn {
        Conn::None => std::future::pending().await,
        Conn::Connecting(connecting) => match connecting.as_mut().await {
            Ok(socket) => ConnEvent::Opened(socket),
            Err(e) => ConnEvent::ConnectFailed(e),
        },
        Conn::Open { socket, ping } => tokio::select! {
            message = socket.next() => match message {
                Some(Ok(Message::Close(frame))) => ConnEvent::Closed(frame),
                Some(Ok(message)) => ConnEvent::Message(message),
                Some(Err(e)) => ConnEvent::Failed(e),
                None => ConnEvent::Ended,
            },
            _ = ping.tick() => ConnEvent::PingDue,
        },
    }
}
