//! Recurring requests that keep the server from evicting an idle session.
//!
//! Both hold the session weakly and stop rescheduling themselves once it is
//! gone, so a dropped session never leaves a timer behind.

use std::sync::Weak;

use ymsg_core::{Packet, PacketBody, ServiceType};

use super::SessionInner;
use crate::application::executor::{Request, RequestError};

/// Protocol-level PING, hourly by default.
pub struct PingRequest {
    session: Weak<SessionInner>,
}

impl PingRequest {
    pub(crate) fn new(session: Weak<SessionInner>) -> Self {
        Self { session }
    }
}

impl Request for PingRequest {
    fn build(&self) -> Result<Packet, RequestError> {
        if self.session.strong_count() == 0 {
            return Err(RequestError::StopRescheduling);
        }
        Ok(Packet::new(ServiceType::Ping, PacketBody::new()))
    }

    fn name(&self) -> &'static str {
        "ping"
    }
}

/// KEEPALIVE carrying the username, every minute by default.
pub struct KeepAliveRequest {
    session: Weak<SessionInner>,
}

impl KeepAliveRequest {
    pub(crate) fn new(session: Weak<SessionInner>) -> Self {
        Self { session }
    }
}

impl Request for KeepAliveRequest {
    fn build(&self) -> Result<Packet, RequestError> {
        let Some(session) = self.session.upgrade() else {
            return Err(RequestError::StopRescheduling);
        };
        let username = session.username().unwrap_or_default();
        Ok(Packet::new(
            ServiceType::KeepAlive,
            PacketBody::new().with("0", username),
        ))
    }

    fn name(&self) -> &'static str {
        "keepalive"
    }
}
