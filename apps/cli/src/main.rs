mod output;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    anyhow::{Context, Result, bail},
    clap::{Parser, Subcommand},
    engage_client::{ApiClient, Navigator, RequestOptions, SessionContext, SessionStore},
    engage_config::{EngageConfig, ExecutionContext},
    engage_realtime::{ChannelConfig, ChannelState, EventChannel},
    engage_whatsapp::WhatsAppApi,
    reqwest::Method,
    tokio::sync::mpsc,
    tracing::{debug, info},
};

use crate::output::{EventPrinter, PairingForwarder, PairingOutcome};

/// Command-line client for the engage dashboard service.
///
/// Talks to the public API address in the interactive client context and
/// keeps the login session in the platform data directory.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Config file (defaults to `<config dir>/engage/engage.toml`).
    #[arg(long, global = true, env = "ENGAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session.
    Login {
        email: String,
        #[arg(long, env = "ENGAGE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// End the session on the server and locally.
    Logout,
    /// Show the logged-in user.
    Whoami,
    /// Stream live events as JSON lines until interrupted.
    Events,
    /// Connect the WhatsApp channel, pairing the device if required.
    Pair,
    /// Manage the WhatsApp channel connection.
    #[command(subcommand)]
    Whatsapp(WhatsAppCommand),
    /// Send an arbitrary request through the API gateway.
    Request {
        method: String,
        path: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum WhatsAppCommand {
    /// Show the channel connection state.
    Status,
    /// Disconnect the channel.
    Disconnect,
    /// Send a text message.
    Send { recipient_jid: String, message: String },
}

/// Tells the user to log in again once the server rejects the session.
struct LoginPrompt;

impl Navigator for LoginPrompt {
    fn goto_login(&self) {
        eprintln!("session expired, run `engage login` again");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    let session = match SessionStore::from_config(&config.session) {
        Some(store) => {
            debug!(path = %store.path().display(), "using persisted session");
            SessionContext::persistent(store)
        },
        None => SessionContext::new(),
    };
    let client = ApiClient::from_config(&config, ExecutionContext::Client, session)
        .context("failed to build API client")?
        .with_navigator(Arc::new(LoginPrompt));

    match cli.command {
        Command::Login { email, password } => {
            let user = client.login(&email, &password).await?;
            println!("logged in as {} <{}>", user.full_name, user.email);
        },
        Command::Logout => {
            if !client.session().is_authenticated() {
                println!("not logged in");
                return Ok(());
            }
            client.logout().await;
            println!("logged out");
        },
        Command::Whoami => {
            require_login(&client)?;
            let user = client.me().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        },
        Command::Events => run_events(&config, &client).await?,
        Command::Pair => run_pairing(&client).await?,
        Command::Whatsapp(command) => {
            require_login(&client)?;
            run_whatsapp(WhatsAppApi::new(client), command).await?;
        },
        Command::Request { method, path, body } => {
            let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                .with_context(|| format!("invalid method: {method}"))?;
            let mut options = RequestOptions::new(method);
            if let Some(body) = body {
                let body = serde_json::from_str(&body).context("--body is not valid JSON")?;
                options = options.json(body);
            }
            let response = client.send_raw(&path, options).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        },
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<EngageConfig> {
    match path {
        Some(path) => {
            let mut config = engage_config::load_from(path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            engage_config::loader::apply_env_overrides(&mut config, |key| {
                std::env::var(key).ok()
            });
            Ok(config)
        },
        None => engage_config::load().context("failed to load config"),
    }
}

fn require_login(client: &ApiClient) -> Result<()> {
    if !client.session().is_authenticated() {
        bail!("not logged in, run `engage login` first");
    }
    Ok(())
}

async fn run_events(config: &EngageConfig, client: &ApiClient) -> Result<()> {
    require_login(client)?;
    let handle = EventChannel::spawn(
        client.endpoint().clone(),
        client.session().clone(),
        Arc::new(EventPrinter),
        ChannelConfig::from(&config.realtime),
    );
    handle.connect()?;
    info!(endpoint = %client.endpoint(), "streaming events, Ctrl-C to stop");

    let mut status = handle.subscribe();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                debug!(state = ?current.state, attempts = current.attempts, "channel status");
                if !client.session().is_authenticated() {
                    bail!("session ended");
                }
                if current.state == ChannelState::Idle
                    && current.attempts >= config.realtime.max_reconnect_attempts
                {
                    bail!("event channel gave up after {} reconnect attempts", current.attempts);
                }
            },
        }
    }

    handle.disconnect()?;
    handle.shutdown().await;
    Ok(())
}

async fn run_pairing(client: &ApiClient) -> Result<()> {
    require_login(client)?;
    let api = WhatsAppApi::new(client.clone());

    let response = api.connect().await?;
    if response.is_connected() {
        println!("{}", response.message);
        return Ok(());
    }
    if !response.needs_pairing() {
        bail!("unexpected connect status: {}", response.status);
    }
    if let Some(code) = response.qr_code.as_deref() {
        println!("{code}");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = api.pair(Arc::new(PairingForwarder::new(tx)));
    info!("waiting for the device to scan the code, Ctrl-C to abort");

    loop {
        tokio::select! {
            biased;
            outcome = rx.recv() => match outcome {
                Some(PairingOutcome::Code(image)) => println!("{image}"),
                Some(PairingOutcome::Success) => {
                    println!("device paired");
                    return Ok(());
                },
                Some(PairingOutcome::Error(message)) => bail!("pairing failed: {message}"),
                Some(PairingOutcome::Timeout) => bail!("pairing timed out, run `engage pair` again"),
                None => break,
            },
            () = handle.finished() => break,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                handle.cancel();
                handle.finished().await;
                bail!("pairing aborted");
            },
        }
    }

    bail!("pairing stream ended without an outcome")
}

async fn run_whatsapp(api: WhatsAppApi, command: WhatsAppCommand) -> Result<()> {
    match command {
        WhatsAppCommand::Status => {
            let status = api.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        },
        WhatsAppCommand::Disconnect => {
            let response = api.disconnect().await?;
            println!("{}", response.message);
        },
        WhatsAppCommand::Send {
            recipient_jid,
            message,
        } => {
            let response = api.send_message(&recipient_jid, &message).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        },
    }
    Ok(())
}
