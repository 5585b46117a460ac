//! ymsg-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does ymsg-client do? (for beginners)
//!
//! It is the engine of an instant-messaging client speaking the YMSG
//! protocol.  A [`Session`] connects to the server, answers the login
//! challenge, and then keeps the connection alive while translating every
//! inbound packet into a [`SessionEvent`] for the application:
//!
//! 1. `Session::login` opens a transport through a [`Connector`] and sends
//!    AUTH.
//! 2. The server's challenge is answered by the core crate's negotiator.
//! 3. LOGON / LIST complete the handshake; `login` returns.
//! 4. Messages, presence changes, conference traffic and the like arrive as
//!    events on registered [`SessionListener`]s.
//! 5. `Session::logout` sends LOGOFF and stops every background task.

/// Application layer: the session engine.
pub mod application;

/// Infrastructure layer: TCP transport and configuration files.
pub mod infrastructure;

pub use application::channel::{Connector, Transport};
pub use application::conference::{BufferPolicy, ConferenceError, ConferenceManager};
pub use application::events::{SessionEvent, SessionListener};
pub use application::session::{Session, SessionConfig, SessionError, SessionState};
