//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the client's TOML configuration, falls back
//! to defaults when the file is missing, and converts the file schema into
//! the runtime types the session and connector expect.

pub mod config;
