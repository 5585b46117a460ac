//! Session state machine: login, logout, reset, and the background read
//! path that drives the handshake.
//!
//! # Lifecycle
//!
//! ```text
//!            login()                AUTH               LOGON / LIST
//! Unstarted ────────► Connecting ─────────► Connected ─────────────► LoggedOn
//!     ▲                   │                     │                       │
//!     │ reset()           │ refusal / timeout / transport error         │ logout() or
//!     │                   ▼                     ▼                       │ server LOGOFF
//!     └──────────────── Failed ◄────────────────┘                       │
//!     ▲                                                                 │
//!     └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `login` returns once the state leaves `Connecting`/`Connected`, or when
//! the configured login timeout expires.  The handshake itself is driven by
//! the reader task: it decodes frames and hands them to the dispatch
//! registry, whose default handlers (see `handlers`) move the state along.
//!
//! The state lives in a `tokio::sync::watch` channel so the waiting caller
//! is woken on every transition instead of polling.

mod handlers;
mod keepalive;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, trace, warn};

use ymsg_core::{AuthError, FragmentBuffer, Packet, PacketBody, ServiceType};

use crate::application::channel::{read_packet, Connector, NetworkError};
use crate::application::dispatch::DispatchRegistry;
use crate::application::events::{EventQueue, SessionEvent, SessionListener};
use crate::application::executor::RequestExecutor;

pub use keepalive::{KeepAliveRequest, PingRequest};

// ── Public types ──────────────────────────────────────────────────────────────

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Unstarted,
    Connecting,
    Connected,
    LoggedOn,
    Failed,
}

impl SessionState {
    /// `true` while a `login` call is waiting on the handshake.
    pub fn is_logging_in(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tunables of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Upper bound on the whole handshake.
    pub login_timeout: Duration,
    /// Period of the KEEPALIVE packet.
    pub keepalive_interval: Duration,
    /// Period of the protocol-level PING packet.
    pub ping_interval: Duration,
    /// Presence status sent with the auth response.
    pub initial_status: u32,
    /// Client build string sent in field 135.
    pub client_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_timeout: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(60),
            ping_interval: Duration::from_secs(3600),
            initial_status: ymsg_core::status::AVAILABLE,
            client_version: "6,0,0,1710".to_string(),
        }
    }
}

/// Why the server refused a login (AUTHRESP field 66).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginRefusal {
    #[error("unknown username")]
    BadUsername,

    #[error("incorrect password")]
    BadPassword,

    /// The account is locked; the server may point at an unlock page.
    #[error("account locked")]
    Locked { url: Option<String> },

    #[error("login refused with code {0}")]
    Refused(i64),
}

impl LoginRefusal {
    pub fn from_code(code: i64, url: Option<&str>) -> Self {
        match code {
            3 => LoginRefusal::BadUsername,
            13 => LoginRefusal::BadPassword,
            14 => LoginRefusal::Locked {
                url: url.map(str::to_string),
            },
            other => LoginRefusal::Refused(other),
        }
    }
}

/// Errors returned by the session's public operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not allowed in the current state.  The state was
    /// not changed.
    #[error("operation requires state {expected}, but session is {actual}")]
    IllegalState {
        expected: &'static str,
        actual: SessionState,
    },

    #[error("login timed out after {0:?}")]
    Timeout(Duration),

    #[error("login rejected: {0}")]
    Rejected(LoginRefusal),

    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be decoded while the handshake was in progress.
    #[error("malformed packet during login: {0}")]
    Protocol(String),

    #[error("cannot answer the login challenge: {0}")]
    Crypto(#[from] AuthError),

    #[error("connection closed")]
    ConnectionClosed,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A client session.  Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

/// A non-owning handle, used by collaborators that must not keep the
/// session alive.
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<SessionState>,
    failure: Mutex<Option<SessionError>>,
    username: Mutex<Option<String>>,
    password: Mutex<Option<String>>,
    registry: Arc<DispatchRegistry>,
    executor: Arc<RequestExecutor>,
    events: Arc<EventQueue>,
    reader: Mutex<Option<JoinHandle<()>>>,
    list_buffer: Mutex<FragmentBuffer>,
}

impl Session {
    /// Builds a session and installs the default packet handlers.
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(SessionState::Unstarted);
        let inner = Arc::new(SessionInner {
            config,
            connector,
            state,
            failure: Mutex::new(None),
            username: Mutex::new(None),
            password: Mutex::new(None),
            registry: Arc::new(DispatchRegistry::new()),
            executor: Arc::new(RequestExecutor::new()),
            events: Arc::new(EventQueue::new()),
            reader: Mutex::new(None),
            list_buffer: Mutex::new(FragmentBuffer::for_list()),
        });
        handlers::register_defaults(&inner);
        Self { inner }
    }

    /// Logs in and waits for the outcome.
    ///
    /// # Errors
    ///
    /// - [`SessionError::IllegalState`] if the session is not `Unstarted`
    ///   (state untouched).
    /// - [`SessionError::InvalidArgument`] for an empty username or
    ///   password (state becomes `Failed`).
    /// - [`SessionError::Rejected`], [`SessionError::Timeout`],
    ///   [`SessionError::Transport`] and friends when the handshake fails.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), SessionError> {
        let inner = &self.inner;

        let current = inner.state();
        if current != SessionState::Unstarted {
            return Err(SessionError::IllegalState {
                expected: "Unstarted",
                actual: current,
            });
        }

        let username = username.trim().to_lowercase();
        if username.is_empty() || password.is_empty() {
            let err = SessionError::InvalidArgument(
                "username and password must not be empty".to_string(),
            );
            inner.fail(err.clone());
            return Err(err);
        }

        if !inner.transition(&[SessionState::Unstarted], SessionState::Connecting) {
            return Err(SessionError::IllegalState {
                expected: "Unstarted",
                actual: inner.state(),
            });
        }

        *lock(&inner.failure) = None;
        *lock(&inner.username) = Some(username.clone());
        *lock(&inner.password) = Some(password.to_string());
        inner.executor.set_session_id(0);
        lock(&inner.list_buffer).clear();
        info!(%username, "logging in");

        inner.events.start();
        let result = match inner.open_channel(&username).await {
            Ok(()) => inner.await_login().await,
            Err(e) => {
                inner.fail(e.clone());
                Err(e)
            }
        };

        lock(&inner.password).take();
        match &result {
            Ok(()) => info!(%username, "logged on"),
            Err(e) => {
                warn!(%username, "login failed: {e}");
                inner.teardown();
            }
        }
        result
    }

    /// Logs off and tears the session down.  The LOGOFF packet is sent on a
    /// best-effort basis; teardown happens regardless.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] unless the session is `LoggedOn`.
    pub async fn logout(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        if !inner.transition(&[SessionState::LoggedOn], SessionState::Unstarted) {
            return Err(SessionError::IllegalState {
                expected: "LoggedOn",
                actual: inner.state(),
            });
        }

        let username = inner.username().unwrap_or_default();
        let logoff = Packet::new(ServiceType::Logoff, PacketBody::new().with("0", username));
        if let Err(e) = inner.executor.submit(logoff).await {
            warn!("logoff packet not delivered: {e}");
        }

        inner.teardown();
        info!("logged off");
        Ok(())
    }

    /// Returns a failed (or never used) session to `Unstarted` so it can
    /// log in again.
    ///
    /// # Errors
    ///
    /// [`SessionError::IllegalState`] while a login is in progress or the
    /// session is logged on.
    pub fn reset(&self) -> Result<(), SessionError> {
        let inner = &self.inner;
        if !inner.transition(
            &[SessionState::Failed, SessionState::Unstarted],
            SessionState::Unstarted,
        ) {
            return Err(SessionError::IllegalState {
                expected: "Failed or Unstarted",
                actual: inner.state(),
            });
        }
        inner.teardown();
        *lock(&inner.failure) = None;
        debug!("session reset");
        Ok(())
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// A receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// The lower-cased username of the current (or last) login.
    pub fn username(&self) -> Option<String> {
        self.inner.username()
    }

    /// Why the session last failed, if it did.
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.last_error()
    }

    /// Registry for collaborators that handle additional service types.
    pub fn registry(&self) -> Arc<DispatchRegistry> {
        Arc::clone(&self.inner.registry)
    }

    /// Outbound path for collaborators.
    pub fn executor(&self) -> Arc<RequestExecutor> {
        Arc::clone(&self.inner.executor)
    }

    pub fn events(&self) -> Arc<EventQueue> {
        Arc::clone(&self.inner.events)
    }

    /// Registers a listener.  Listeners persist across logins.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.inner.events.add_listener(listener);
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("username", &self.username())
            .finish_non_exhaustive()
    }
}

// ── Internals ─────────────────────────────────────────────────────────────────

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn username(&self) -> Option<String> {
        lock(&self.username).clone()
    }

    fn last_error(&self) -> Option<SessionError> {
        lock(&self.failure).clone()
    }

    /// Moves to `to` if the current state is one of `from`.
    fn transition(&self, from: &[SessionState], to: SessionState) -> bool {
        let mut previous = None;
        let changed = self.state.send_if_modified(|state| {
            if from.contains(state) {
                previous = Some(*state);
                *state = to;
                true
            } else {
                false
            }
        });
        if let Some(previous) = previous {
            debug!(from = %previous, to = %to, "session state changed");
        }
        changed
    }

    fn set_state(&self, to: SessionState) {
        let previous = self.state.send_replace(to);
        if previous != to {
            debug!(from = %previous, to = %to, "session state changed");
        }
    }

    /// Records `error` and moves to `Failed`.
    fn fail(&self, error: SessionError) {
        debug!("session failed: {error}");
        *lock(&self.failure) = Some(error);
        self.set_state(SessionState::Failed);
    }

    /// Connects, starts the reader and writer, schedules the keepalive
    /// tasks, and sends the AUTH request.
    async fn open_channel(self: &Arc<Self>, username: &str) -> Result<(), SessionError> {
        let transport = self
            .connector
            .connect()
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        let (read_half, write_half) = tokio::io::split(transport);

        self.executor.attach(Box::new(write_half));
        let reader = tokio::spawn(read_loop(Arc::downgrade(self), read_half));
        if let Some(stale) = lock(&self.reader).replace(reader) {
            stale.abort();
        }

        let weak = Arc::downgrade(self);
        self.executor.schedule(
            Arc::new(PingRequest::new(weak.clone())),
            self.config.ping_interval,
        );
        self.executor.schedule(
            Arc::new(KeepAliveRequest::new(weak)),
            self.config.keepalive_interval,
        );

        let auth = Packet::new(ServiceType::Auth, PacketBody::new().with("1", username));
        self.executor
            .submit(auth)
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    /// Waits for the handshake to settle, bounded by the login timeout.
    async fn await_login(&self) -> Result<(), SessionError> {
        let mut rx = self.state.subscribe();
        let waited = time::timeout(
            self.config.login_timeout,
            rx.wait_for(|state| !state.is_logging_in()),
        )
        .await
        .map(|settled| settled.map(|state| *state));

        match waited {
            Ok(Ok(SessionState::LoggedOn)) => Ok(()),
            Ok(Ok(_)) => Err(self.last_error().unwrap_or(SessionError::ConnectionClosed)),
            Ok(Err(_)) => Err(SessionError::ConnectionClosed),
            Err(_) => {
                let err = SessionError::Timeout(self.config.login_timeout);
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Stops every background path of the session.  Idempotent.
    ///
    /// May run on the reader task itself; aborting the reader only takes
    /// effect at its next await point.
    fn teardown(&self) {
        self.executor.cancel_all();
        self.executor.detach();
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        self.events.kill();
        lock(&self.list_buffer).clear();
        debug!("session torn down");
    }

    fn on_packet(&self, packet: Packet) {
        if packet.session_id != 0 && packet.session_id != self.executor.session_id() {
            debug!(session_id = packet.session_id, "server assigned session id");
            self.executor.set_session_id(packet.session_id);
        }

        let service = packet.service;
        match self.registry.dispatch(packet) {
            Ok(outcome) => trace!(%service, ?outcome, "packet dispatched"),
            Err(e) => {
                warn!(%service, "handler failed: {e}");
                self.events.append(
                    SessionEvent::Exception {
                        message: e.to_string(),
                    },
                    Some(service),
                );
            }
        }
    }

    fn on_transport_lost(&self, error: &NetworkError) {
        match self.state() {
            SessionState::Connecting | SessionState::Connected => {
                error!("connection lost during login: {error}");
                self.fail(SessionError::Transport(error.to_string()));
            }
            SessionState::LoggedOn => {
                error!("connection lost: {error}");
                self.events.append(
                    SessionEvent::Exception {
                        message: error.to_string(),
                    },
                    None,
                );
                self.events.append(
                    SessionEvent::ConnectionClosed {
                        reason: error.to_string(),
                    },
                    None,
                );
                self.fail(SessionError::Transport(error.to_string()));
                self.teardown();
            }
            SessionState::Unstarted | SessionState::Failed => {
                debug!("reader stopped: {error}");
            }
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(reader) = lock(&self.reader).take() {
            reader.abort();
        }
        self.events.kill();
    }
}

/// Background read path: one frame at a time into the dispatch registry.
///
/// Holds only a weak reference so a dropped session stops its reader.
async fn read_loop<R>(session: Weak<SessionInner>, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    loop {
        let result = read_packet(&mut reader).await;
        let Some(inner) = session.upgrade() else {
            trace!("session dropped; reader exiting");
            break;
        };

        match result {
            Ok(packet) => inner.on_packet(packet),
            Err(NetworkError::Protocol(e)) if inner.state().is_logging_in() => {
                warn!("malformed packet during login: {e}");
                inner.fail(SessionError::Protocol(e.to_string()));
                break;
            }
            Err(NetworkError::Protocol(e)) => {
                warn!("malformed packet dropped: {e}");
            }
            Err(e) => {
                inner.on_transport_lost(&e);
                break;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel::MockConnector;

    fn idle_session() -> Session {
        Session::new(SessionConfig::default(), Arc::new(MockConnector::new()))
    }

    #[test]
    fn test_refusal_codes_map_to_typed_reasons() {
        assert_eq!(LoginRefusal::from_code(3, None), LoginRefusal::BadUsername);
        assert_eq!(LoginRefusal::from_code(13, None), LoginRefusal::BadPassword);
        assert_eq!(
            LoginRefusal::from_code(14, Some("http://unlock")),
            LoginRefusal::Locked {
                url: Some("http://unlock".to_string())
            }
        );
        assert_eq!(LoginRefusal::from_code(99, None), LoginRefusal::Refused(99));
    }

    #[test]
    fn test_new_session_is_unstarted_with_bootstrap_handlers() {
        let session = idle_session();

        assert_eq!(session.state(), SessionState::Unstarted);
        for service in [
            ServiceType::Auth,
            ServiceType::AuthResp,
            ServiceType::Logon,
            ServiceType::List,
            ServiceType::Logoff,
            ServiceType::Ping,
        ] {
            assert!(session.registry().is_registered(service), "{service}");
        }
    }

    #[tokio::test]
    async fn test_logout_requires_logged_on() {
        let session = idle_session();

        let result = session.logout().await;

        assert_eq!(
            result,
            Err(SessionError::IllegalState {
                expected: "LoggedOn",
                actual: SessionState::Unstarted
            })
        );
        assert_eq!(session.state(), SessionState::Unstarted);
    }

    #[tokio::test]
    async fn test_reset_recovers_from_argument_failure() {
        // Arrange
        let session = idle_session();
        let err = session.login("", "secret").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        assert_eq!(session.state(), SessionState::Failed);

        // Act
        session.reset().unwrap();

        // Assert
        assert_eq!(session.state(), SessionState::Unstarted);
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_server_logoff_leaves_failed_session_alone() {
        // Arrange
        let session = idle_session();
        let _ = session.login("", "").await;
        assert_eq!(session.state(), SessionState::Failed);

        // Act
        session
            .registry()
            .dispatch(Packet::new(ServiceType::Logoff, PacketBody::new()))
            .unwrap();

        // Assert
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.last_error().is_some());
    }

    #[test]
    fn test_weak_session_does_not_keep_session_alive() {
        let session = idle_session();
        let weak = session.downgrade();
        assert!(weak.upgrade().is_some());

        drop(session);

        assert!(weak.upgrade().is_none());
    }
}
