//! Response dispatch registry: routes each inbound packet to the handler
//! registered for its service type.
//!
//! # Handler shapes
//!
//! - **Single** – invoked once per inbound packet.
//! - **Collect** – a [`PacketCollector`] buffers packets of one service type
//!   until one arrives with the collector's *proceed status*, then merges
//!   them all and hands the merged packet to its wrapped handler.
//! - **Passthrough** – the packet is acknowledged and nothing else happens
//!   (used for PING replies, which only keep the connection warm).
//!
//! Registration is last-writer-wins: a collaborator may replace any default
//! handler installed during session bootstrap.  A packet whose service type
//! has no handler is logged and dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, trace};

use ymsg_core::{MergePolicy, Packet, ServiceType};

/// Errors a packet handler may report.  They never stop the reader; the
/// session turns them into `Exception` events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// A field the handler depends on is absent.
    #[error("{service} packet is missing field {key}")]
    MissingField { service: ServiceType, key: &'static str },

    /// A field is present but cannot be interpreted.
    #[error("{service} packet has invalid field {key}: {value:?}")]
    InvalidField {
        service: ServiceType,
        key: &'static str,
        value: String,
    },

    /// The session this handler belongs to is gone.
    #[error("session is no longer available")]
    SessionGone,
}

impl HandlerError {
    pub fn missing(service: ServiceType, key: &'static str) -> Self {
        HandlerError::MissingField { service, key }
    }
}

/// Reacts to one inbound packet.
///
/// Implemented for every `Fn(Packet) -> Result<(), HandlerError>` closure,
/// so most handlers are registered as closures.
pub trait PacketHandler: Send + Sync {
    fn handle(&self, packet: Packet) -> Result<(), HandlerError>;
}

impl<F> PacketHandler for F
where
    F: Fn(Packet) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, packet: Packet) -> Result<(), HandlerError> {
        self(packet)
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

/// Accumulates packets until the terminal status arrives.
pub struct PacketCollector {
    proceed_status: u32,
    policy: MergePolicy,
    inner: Arc<dyn PacketHandler>,
    pending: Mutex<Vec<Packet>>,
}

impl PacketCollector {
    /// Collector whose fragments are merged by appending every field.
    pub fn new(proceed_status: u32, inner: Arc<dyn PacketHandler>) -> Self {
        Self::with_policy(proceed_status, MergePolicy::new(), inner)
    }

    pub fn with_policy(
        proceed_status: u32,
        policy: MergePolicy,
        inner: Arc<dyn PacketHandler>,
    ) -> Self {
        Self {
            proceed_status,
            policy,
            inner,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Adds a packet.  Returns `Ok(true)` when it completed a cycle and the
    /// merged packet was delivered.
    pub fn offer(&self, packet: Packet) -> Result<bool, HandlerError> {
        let complete = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let terminal = packet.status == self.proceed_status;
            pending.push(packet);
            if terminal {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };

        let Some(packets) = complete else {
            return Ok(false);
        };

        let mut parts = packets.into_iter();
        let Some(mut merged) = parts.next() else {
            return Ok(false);
        };
        let count = parts.len() + 1;
        for part in parts {
            merged.merge_with(part, &self.policy);
        }

        trace!(service = %merged.service, parts = count, "collector delivering merged packet");
        self.inner.handle(merged)?;
        Ok(true)
    }

    /// Number of packets waiting for the terminal status.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    Single(Arc<dyn PacketHandler>),
    Collect(Arc<PacketCollector>),
    Passthrough,
}

/// What [`DispatchRegistry::dispatch`] did with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Buffered by a collector that is still waiting for its terminal packet.
    Collected,
    Passthrough,
    Unregistered,
}

/// Maps service types to handlers.
#[derive(Default)]
pub struct DispatchRegistry {
    handlers: RwLock<HashMap<ServiceType, Handler>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single-packet handler, replacing any earlier handler.
    pub fn register(&self, service: ServiceType, handler: impl PacketHandler + 'static) {
        self.insert(service, Handler::Single(Arc::new(handler)));
    }

    /// Registers a handler that is also referenced elsewhere.
    pub fn register_shared(&self, service: ServiceType, handler: Arc<dyn PacketHandler>) {
        self.insert(service, Handler::Single(handler));
    }

    /// Registers a collector that delivers once a packet with
    /// `proceed_status` arrives.
    pub fn register_collector(
        &self,
        service: ServiceType,
        proceed_status: u32,
        handler: Arc<dyn PacketHandler>,
    ) {
        let collector = PacketCollector::new(proceed_status, handler);
        self.insert(service, Handler::Collect(Arc::new(collector)));
    }

    /// Registers a service type whose packets need no processing.
    pub fn register_passthrough(&self, service: ServiceType) {
        self.insert(service, Handler::Passthrough);
    }

    /// Installs a prepared [`Handler`], replacing any earlier one.
    pub fn insert(&self, service: ServiceType, handler: Handler) {
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service, handler)
            .is_some();
        if replaced {
            debug!(%service, "handler replaced");
        }
    }

    /// Removes the handler for `service`.
    pub fn unregister(&self, service: ServiceType) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&service);
    }

    pub fn is_registered(&self, service: ServiceType) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&service)
    }

    /// Routes `packet` to its handler.
    ///
    /// The registry lock is released before the handler runs, so handlers may
    /// register or replace other handlers.
    pub fn dispatch(&self, packet: Packet) -> Result<DispatchOutcome, HandlerError> {
        let service = packet.service;
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&service)
            .cloned();

        match handler {
            Some(Handler::Single(h)) => {
                h.handle(packet)?;
                Ok(DispatchOutcome::Handled)
            }
            Some(Handler::Collect(collector)) => {
                if collector.offer(packet)? {
                    Ok(DispatchOutcome::Handled)
                } else {
                    Ok(DispatchOutcome::Collected)
                }
            }
            Some(Handler::Passthrough) => {
                trace!(%service, "passthrough packet");
                Ok(DispatchOutcome::Passthrough)
            }
            None => {
                debug!(%service, status = packet.status, "no handler registered; packet dropped");
                Ok(DispatchOutcome::Unregistered)
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ymsg_core::PacketBody;

    /// Hand-written test double that records every packet it receives.
    #[derive(Default)]
    struct RecordingHandler {
        received: Mutex<Vec<Packet>>,
        should_fail: bool,
    }

    impl PacketHandler for RecordingHandler {
        fn handle(&self, packet: Packet) -> Result<(), HandlerError> {
            let service = packet.service;
            self.received.lock().unwrap().push(packet);
            if self.should_fail {
                Err(HandlerError::missing(service, "1"))
            } else {
                Ok(())
            }
        }
    }

    fn logon(status: u32, friend: &str) -> Packet {
        Packet::new(ServiceType::Logon, PacketBody::new().with("7", friend)).with_status(status)
    }

    #[test]
    fn test_dispatch_routes_to_registered_handler() {
        // Arrange
        let registry = DispatchRegistry::new();
        let handler = Arc::new(RecordingHandler::default());
        registry.register_shared(ServiceType::Message, handler.clone());

        // Act
        let outcome = registry
            .dispatch(Packet::new(ServiceType::Message, PacketBody::new()))
            .unwrap();

        // Assert
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(handler.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unregistered_packet_is_dropped() {
        let registry = DispatchRegistry::new();
        let outcome = registry
            .dispatch(Packet::new(ServiceType::Unknown(0x77), PacketBody::new()))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Unregistered);
    }

    #[test]
    fn test_last_registration_wins() {
        // Arrange
        let registry = DispatchRegistry::new();
        let first = Arc::new(RecordingHandler::default());
        let second = Arc::new(RecordingHandler::default());
        registry.register_shared(ServiceType::Message, first.clone());
        registry.register_shared(ServiceType::Message, second.clone());

        // Act
        registry
            .dispatch(Packet::new(ServiceType::Message, PacketBody::new()))
            .unwrap();

        // Assert
        assert!(first.received.lock().unwrap().is_empty());
        assert_eq!(second.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_closure_handler_is_accepted() {
        let registry = DispatchRegistry::new();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        registry.register(ServiceType::Ping, move |_p: Packet| -> Result<(), HandlerError> {
            *counter.lock().unwrap() += 1;
            Ok(())
        });
        registry
            .dispatch(Packet::new(ServiceType::Ping, PacketBody::new()))
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn test_passthrough_is_acknowledged() {
        let registry = DispatchRegistry::new();
        registry.register_passthrough(ServiceType::Ping);
        let outcome = registry
            .dispatch(Packet::new(ServiceType::Ping, PacketBody::new()))
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Passthrough);
    }

    #[test]
    fn test_handler_error_is_returned() {
        let registry = DispatchRegistry::new();
        let handler = Arc::new(RecordingHandler {
            should_fail: true,
            ..Default::default()
        });
        registry.register_shared(ServiceType::Message, handler);
        let result = registry.dispatch(Packet::new(ServiceType::Message, PacketBody::new()));
        assert!(matches!(result, Err(HandlerError::MissingField { .. })));
    }

    #[test]
    fn test_collector_delivers_once_on_proceed_status() {
        // Arrange – proceed status S = 0; feed S+1, S+1, S
        let registry = DispatchRegistry::new();
        let handler = Arc::new(RecordingHandler::default());
        registry.register_collector(ServiceType::Logon, 0, handler.clone());

        // Act
        let o1 = registry.dispatch(logon(1, "alice")).unwrap();
        let o2 = registry.dispatch(logon(1, "bob")).unwrap();
        let o3 = registry.dispatch(logon(0, "carol")).unwrap();

        // Assert
        assert_eq!(o1, DispatchOutcome::Collected);
        assert_eq!(o2, DispatchOutcome::Collected);
        assert_eq!(o3, DispatchOutcome::Handled);
        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let friends: Vec<&str> = received[0].body.get_all("7").collect();
        assert_eq!(friends, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_collector_resets_after_delivery() {
        // Arrange
        let handler = Arc::new(RecordingHandler::default());
        let collector = PacketCollector::new(0, handler.clone());
        collector.offer(logon(1, "alice")).unwrap();
        collector.offer(logon(0, "bob")).unwrap();

        // Act
        let delivered = collector.offer(logon(1, "dave")).unwrap();

        // Assert – a fresh accumulation has begun
        assert!(!delivered);
        assert_eq!(collector.pending(), 1);
        assert_eq!(handler.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_handler_may_register_from_inside_dispatch() {
        // Arrange
        let registry = Arc::new(DispatchRegistry::new());
        let inner = Arc::clone(&registry);
        registry.register(ServiceType::Auth, move |_p: Packet| -> Result<(), HandlerError> {
            inner.register_passthrough(ServiceType::Ping);
            Ok(())
        });

        // Act
        registry
            .dispatch(Packet::new(ServiceType::Auth, PacketBody::new()))
            .unwrap();

        // Assert
        assert!(registry.is_registered(ServiceType::Ping));
    }
}
