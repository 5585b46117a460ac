//! ymsg-client entry point.
//!
//! Loads the configuration, logs in over TCP, and prints every session event
//! until Ctrl-C (which logs out) or until the server ends the session.
//!
//! ```text
//! YMSG_USERNAME=alice YMSG_PASSWORD=secret ymsg-client [config.toml]
//! ```
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- TOML file, defaults when absent
//!  └─ Session::new(TcpConnector) -- registry, executor, event queue
//!  └─ ConferenceManager::attach  -- conference handlers
//!  └─ Session::login()           -- waits for LoggedOn / Failed / timeout
//!  └─ select! { ctrl_c, session ends }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ymsg_client::application::events::{SessionEvent, SessionListener};
use ymsg_client::infrastructure::network::TcpConnector;
use ymsg_client::infrastructure::storage::config::{load_config, OutputFormat};
use ymsg_client::{ConferenceManager, Session, SessionState};
use ymsg_core::ServiceType;

const DEFAULT_CONFIG_FILE: &str = "ymsg-client.toml";

/// One JSON output line.
#[derive(Serialize)]
struct JsonLine<'a> {
    service: Option<ServiceType>,
    event: &'a SessionEvent,
}

/// Prints events to stdout, one per line.
struct PrintingListener {
    format: OutputFormat,
}

impl SessionListener for PrintingListener {
    fn on_delivery(&self, service: Option<ServiceType>, event: &SessionEvent) {
        match self.format {
            OutputFormat::Json => match serde_json::to_string(&JsonLine { service, event }) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!("cannot serialize event: {e}"),
            },
            OutputFormat::Text => println!("{}", describe(event)),
        }
    }
}

fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::LoggedOn { username } => format!("logged on as {username}"),
        SessionEvent::ConnectionClosed { reason } => format!("connection closed: {reason}"),
        SessionEvent::ListReceived { list } => {
            format!("roster received ({} fields)", list.body.len())
        }
        SessionEvent::Message(m) if m.offline => format!("[offline] {}: {}", m.from, m.text),
        SessionEvent::Message(m) => format!("{}: {}", m.from, m.text),
        SessionEvent::StatusUpdate(s) => {
            let state = if s.online { "online" } else { "offline" };
            match &s.message {
                Some(text) => format!("{} is {state} ({}) {text}", s.user, s.status),
                None => format!("{} is {state} ({})", s.user, s.status),
            }
        }
        SessionEvent::NewMail { count } => format!("{count} new mail(s)"),
        SessionEvent::ConferenceMessage { room, from, text } => format!("[{room}] {from}: {text}"),
        SessionEvent::Error { service, message } => format!("server error on {service}: {message}"),
        other => format!("{other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // Initialise structured logging; RUST_LOG wins over the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("ymsg-client starting");

    let username = std::env::var("YMSG_USERNAME").context("YMSG_USERNAME is not set")?;
    let password = std::env::var("YMSG_PASSWORD").context("YMSG_PASSWORD is not set")?;

    let connector = Arc::new(TcpConnector::new(config.connector_config()));
    let session = Session::new(config.session_config(), connector);
    let _conferences = ConferenceManager::attach(&session, config.buffer_policy());
    session.add_listener(Arc::new(PrintingListener {
        format: config.output,
    }));

    session
        .login(&username, &password)
        .await
        .context("login failed")?;

    let mut state = session.subscribe_state();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("shutdown signal received");
            if let Err(e) = session.logout().await {
                warn!("logout: {e}");
            }
        }
        _ = state.wait_for(|s| *s != SessionState::LoggedOn) => {
            match session.last_error() {
                Some(e) => warn!("session ended: {e}"),
                None => info!("session ended by server"),
            }
        }
    }

    session.events().kill_and_drain().await;
    info!("ymsg-client stopped");
    Ok(())
}
