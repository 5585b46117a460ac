//! Infrastructure layer for the client.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `ymsg_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`network`** – TCP implementation of the application's `Connector`.
//! - **`storage`** – TOML configuration loading and saving.

pub mod network;
pub mod storage;
