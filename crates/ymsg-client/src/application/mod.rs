//! Application layer: the session engine.
//!
//! # How the pieces fit (for beginners)
//!
//! ```text
//!             ┌──────────── Session (state machine) ─────────────┐
//! Connector ─►│ reader task ─► DispatchRegistry ─► handlers ─────┼─► EventQueue ─► listeners
//!             │                                      │           │
//!             │ RequestExecutor ◄──── requests ◄─────┘           │
//!             │   └─ writer task, scheduled keepalives           │
//!             └──────────────────────────────────────────────────┘
//! ```
//!
//! - **`channel`** – the transport seam (`Connector`, `Transport`) and frame
//!   reading.
//! - **`dispatch`** – service type → handler map, including multi-packet
//!   collectors.
//! - **`events`** – decoded events and their ordered delivery queue.
//! - **`executor`** – FIFO outbound queue and per-session scheduler.
//! - **`session`** – login/logout state machine and default handlers.
//! - **`conference`** – a collaborator built on the registry and executor
//!   that buffers out-of-order conference packets.

pub mod channel;
pub mod conference;
pub mod dispatch;
pub mod events;
pub mod executor;
pub mod session;
