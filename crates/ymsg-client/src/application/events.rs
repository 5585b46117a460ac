//! Decoded domain events and the asynchronous queue that delivers them.
//!
//! # Why a queue? (for beginners)
//!
//! Packets are decoded on the network reader task.  If that task called
//! application code directly, a slow listener (say, one that writes to a
//! database) would stall reading from the socket, and the server would
//! eventually drop the connection.  Instead the reader *appends* a
//! [`SessionEvent`] to the [`EventQueue`]; a separate delivery task pulls
//! events off strictly in order and invokes every registered
//! [`SessionListener`].
//!
//! Delivery is single-threaded on purpose: listeners see events in exactly
//! the order they were appended, and one slow listener delays the next
//! event rather than reordering it.  A listener that panics is caught and
//! logged; the next listener and the next event still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use ymsg_core::{Packet, ServiceType};

// ── Event payloads ────────────────────────────────────────────────────────────

/// An instant message, live or delivered offline at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    pub from: String,
    pub to: String,
    pub text: String,
    pub offline: bool,
}

/// A contact's presence changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub user: String,
    /// Raw presence code (field `"10"`).
    pub status: u32,
    /// Custom status text (field `"19"`), if any.
    pub message: Option<String>,
    pub online: bool,
}

/// Everything the session reports to listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    LoggedOn {
        username: String,
    },
    ConnectionClosed {
        reason: String,
    },
    /// Reassembled roster (LIST) packet, interpreted by roster collaborators.
    ListReceived {
        list: Packet,
    },
    Message(MessageEvent),
    StatusUpdate(StatusEvent),
    Typing {
        from: String,
        to: String,
        typing: bool,
    },
    NewMail {
        count: u32,
    },
    FriendAdded {
        friend: String,
        group: Option<String>,
    },
    FriendRemoved {
        friend: String,
        group: Option<String>,
    },
    GroupRenamed {
        old_name: String,
        new_name: String,
    },
    ContactRequest {
        from: String,
        message: Option<String>,
    },
    FileTransfer {
        from: String,
        url: Option<String>,
        filename: Option<String>,
        message: Option<String>,
    },
    ConferenceInvite {
        room: String,
        inviter: String,
        members: Vec<String>,
        message: Option<String>,
    },
    ConferenceLogon {
        room: String,
        user: String,
    },
    ConferenceLogoff {
        room: String,
        user: String,
    },
    ConferenceDecline {
        room: String,
        user: String,
        message: Option<String>,
    },
    ConferenceMessage {
        room: String,
        from: String,
        text: String,
    },
    /// Server-reported error (field `"16"`) attached to a packet.
    Error {
        service: ServiceType,
        message: String,
    },
    /// Something went wrong inside the engine after login.
    Exception {
        message: String,
    },
}

// ── Listener surface ──────────────────────────────────────────────────────────

/// Receives session events on the delivery task.
///
/// Every method has an empty default body, so an implementation overrides
/// only what it cares about.  [`on_event`](Self::on_event) is the single
/// dispatch point; override it instead to see every event uniformly, or
/// override [`on_delivery`](Self::on_delivery) to also learn which service
/// type produced the event.
#[allow(unused_variables)]
pub trait SessionListener: Send + Sync {
    fn on_logged_on(&self, username: &str) {}
    fn on_connection_closed(&self, reason: &str) {}
    fn on_list(&self, list: &Packet) {}
    fn on_message(&self, event: &MessageEvent) {}
    fn on_status_update(&self, event: &StatusEvent) {}
    fn on_typing(&self, from: &str, to: &str, typing: bool) {}
    fn on_new_mail(&self, count: u32) {}
    fn on_friend_added(&self, friend: &str, group: Option<&str>) {}
    fn on_friend_removed(&self, friend: &str, group: Option<&str>) {}
    fn on_group_renamed(&self, old_name: &str, new_name: &str) {}
    fn on_contact_request(&self, from: &str, message: Option<&str>) {}
    fn on_file_transfer(&self, event: &SessionEvent) {}
    fn on_conference_invite(&self, room: &str, inviter: &str, members: &[String]) {}
    fn on_conference_logon(&self, room: &str, user: &str) {}
    fn on_conference_logoff(&self, room: &str, user: &str) {}
    fn on_conference_decline(&self, room: &str, user: &str, message: Option<&str>) {}
    fn on_conference_message(&self, room: &str, from: &str, text: &str) {}
    fn on_error(&self, service: ServiceType, message: &str) {}
    fn on_exception(&self, message: &str) {}

    /// Called by the queue for every event.  `service` is the type of the
    /// packet the event was decoded from, `None` for synthesized events.
    fn on_delivery(&self, service: Option<ServiceType>, event: &SessionEvent) {
        self.on_event(event)
    }

    /// Routes `event` to the matching callback.
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::LoggedOn { username } => self.on_logged_on(username),
            SessionEvent::ConnectionClosed { reason } => self.on_connection_closed(reason),
            SessionEvent::ListReceived { list } => self.on_list(list),
            SessionEvent::Message(m) => self.on_message(m),
            SessionEvent::StatusUpdate(s) => self.on_status_update(s),
            SessionEvent::Typing { from, to, typing } => self.on_typing(from, to, *typing),
            SessionEvent::NewMail { count } => self.on_new_mail(*count),
            SessionEvent::FriendAdded { friend, group } => {
                self.on_friend_added(friend, group.as_deref())
            }
            SessionEvent::FriendRemoved { friend, group } => {
                self.on_friend_removed(friend, group.as_deref())
            }
            SessionEvent::GroupRenamed { old_name, new_name } => {
                self.on_group_renamed(old_name, new_name)
            }
            SessionEvent::ContactRequest { from, message } => {
                self.on_contact_request(from, message.as_deref())
            }
            SessionEvent::FileTransfer { .. } => self.on_file_transfer(event),
            SessionEvent::ConferenceInvite {
                room,
                inviter,
                members,
                ..
            } => self.on_conference_invite(room, inviter, members),
            SessionEvent::ConferenceLogon { room, user } => self.on_conference_logon(room, user),
            SessionEvent::ConferenceLogoff { room, user } => self.on_conference_logoff(room, user),
            SessionEvent::ConferenceDecline {
                room,
                user,
                message,
            } => self.on_conference_decline(room, user, message.as_deref()),
            SessionEvent::ConferenceMessage { room, from, text } => {
                self.on_conference_message(room, from, text)
            }
            SessionEvent::Error { service, message } => self.on_error(*service, message),
            SessionEvent::Exception { message } => self.on_exception(message),
        }
    }
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SessionListener for NoopListener {}

// ── Queue ─────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct QueuedEvent {
    service: Option<ServiceType>,
    event: SessionEvent,
}

type ListenerList = Arc<RwLock<Vec<Arc<dyn SessionListener>>>>;

/// Ordered, asynchronous delivery of [`SessionEvent`]s to listeners.
///
/// The queue can be started, killed, and started again; listeners survive
/// across those cycles so they only need to be registered once.
#[derive(Default)]
pub struct EventQueue {
    listeners: ListenerList,
    sender: Mutex<Option<mpsc::UnboundedSender<QueuedEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.  It receives every event appended afterwards.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Removes a listener previously added (compared by pointer).
    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Starts the delivery task.  A no-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if sender.is_some() {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = Arc::clone(&self.listeners);
        let handle = tokio::spawn(deliver_loop(rx, listeners));

        *sender = Some(tx);
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!("event delivery started");
    }

    /// Enqueues `event` for delivery.
    ///
    /// After [`kill`](Self::kill) (or before [`start`](Self::start)) the
    /// event is dropped with a warning.
    pub fn append(&self, event: SessionEvent, service: Option<ServiceType>) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let queued = QueuedEvent { service, event };
        match sender.as_ref() {
            Some(tx) => {
                if let Err(mpsc::error::SendError(lost)) = tx.send(queued) {
                    warn!(event = ?lost.event, "event delivery task gone; event dropped");
                }
            }
            None => warn!(event = ?queued.event, "event queue not running; event dropped"),
        }
    }

    /// Stops accepting events.  Events already queued are still delivered,
    /// then the delivery task exits.  Idempotent.
    pub fn kill(&self) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if sender.is_some() {
            debug!("event queue killed; draining remaining events");
        }
    }

    /// [`kill`](Self::kill)s the queue and waits until every queued event
    /// has been delivered.
    pub async fn kill_and_drain(&self) {
        self.kill();
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = worker {
            if let Err(e) = handle.await {
                warn!("event delivery task ended abnormally: {e}");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

async fn deliver_loop(mut rx: mpsc::UnboundedReceiver<QueuedEvent>, listeners: ListenerList) {
    while let Some(queued) = rx.recv().await {
        // Snapshot so a listener may add or remove listeners without deadlock.
        let snapshot: Vec<Arc<dyn SessionListener>> = listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        trace!(service = ?queued.service, listeners = snapshot.len(), "delivering event");
        for listener in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.on_delivery(queued.service, &queued.event)
            }));
            if outcome.is_err() {
                warn!(
                    service = ?queued.service,
                    event = ?queued.event,
                    "listener panicked; continuing with next listener"
                );
            }
        }
    }
    debug!("event delivery stopped");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every event it sees.
    #[derive(Default)]
    struct RecordingListener {
        seen: Mutex<Vec<SessionEvent>>,
    }

    impl SessionListener for RecordingListener {
        fn on_event(&self, event: &SessionEvent) {
            self.seen.lock().unwrap().push(event.clone());
        }
    }

    /// Panics on every event.
    struct PanickingListener;

    impl SessionListener for PanickingListener {
        fn on_event(&self, _event: &SessionEvent) {
            panic!("listener failure");
        }
    }

    /// Counts messages through the typed callback only.
    #[derive(Default)]
    struct MessageCounter {
        count: Mutex<usize>,
    }

    impl SessionListener for MessageCounter {
        fn on_message(&self, _event: &MessageEvent) {
            *self.count.lock().unwrap() += 1;
        }
    }

    /// Records the service type each event arrived with.
    #[derive(Default)]
    struct ServiceRecorder {
        services: Mutex<Vec<Option<ServiceType>>>,
    }

    impl SessionListener for ServiceRecorder {
        fn on_delivery(&self, service: Option<ServiceType>, _event: &SessionEvent) {
            self.services.lock().unwrap().push(service);
        }
    }

    fn mail(count: u32) -> SessionEvent {
        SessionEvent::NewMail { count }
    }

    #[tokio::test]
    async fn test_events_are_delivered_in_append_order() {
        // Arrange
        let queue = EventQueue::new();
        let recorder = Arc::new(RecordingListener::default());
        queue.add_listener(recorder.clone());
        queue.start();

        // Act
        for i in 0..5 {
            queue.append(mail(i), Some(ServiceType::NewMail));
        }
        queue.kill_and_drain().await;

        // Assert
        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen, (0..5).map(mail).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_listener_sees_originating_service_type() {
        // Arrange
        let queue = EventQueue::new();
        let recorder = Arc::new(ServiceRecorder::default());
        let typed = Arc::new(MessageCounter::default());
        queue.add_listener(recorder.clone());
        queue.add_listener(typed.clone());
        queue.start();

        // Act
        queue.append(mail(1), Some(ServiceType::NewMail));
        queue.append(
            SessionEvent::Message(MessageEvent {
                from: "bob".to_string(),
                to: "alice".to_string(),
                text: "hi".to_string(),
                offline: false,
            }),
            Some(ServiceType::Message),
        );
        queue.append(
            SessionEvent::Exception {
                message: "boom".to_string(),
            },
            None,
        );
        queue.kill_and_drain().await;

        // Assert – the default on_delivery still routes to typed callbacks
        assert_eq!(
            recorder.services.lock().unwrap().clone(),
            vec![Some(ServiceType::NewMail), Some(ServiceType::Message), None]
        );
        assert_eq!(*typed.count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_stop_delivery() {
        // Arrange
        let queue = EventQueue::new();
        let recorder = Arc::new(RecordingListener::default());
        queue.add_listener(Arc::new(PanickingListener));
        queue.add_listener(recorder.clone());
        queue.start();

        // Act
        queue.append(mail(1), None);
        queue.append(mail(2), None);
        queue.kill_and_drain().await;

        // Assert – second listener still ran, and for both events
        assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_events_after_kill_are_dropped() {
        // Arrange
        let queue = EventQueue::new();
        let recorder = Arc::new(RecordingListener::default());
        queue.add_listener(recorder.clone());
        queue.start();
        queue.append(mail(1), None);

        // Act
        queue.kill_and_drain().await;
        queue.append(mail(2), None);

        // Assert
        assert!(!queue.is_running());
        assert_eq!(recorder.seen.lock().unwrap().clone(), vec![mail(1)]);
    }

    #[tokio::test]
    async fn test_queue_restarts_and_keeps_listeners() {
        // Arrange
        let queue = EventQueue::new();
        let recorder = Arc::new(RecordingListener::default());
        queue.add_listener(recorder.clone());
        queue.start();
        queue.kill_and_drain().await;

        // Act
        queue.start();
        queue.append(mail(7), None);
        queue.kill_and_drain().await;

        // Assert
        assert_eq!(recorder.seen.lock().unwrap().clone(), vec![mail(7)]);
    }

    #[tokio::test]
    async fn test_default_on_event_routes_to_typed_callback() {
        // Arrange
        let queue = EventQueue::new();
        let counter = Arc::new(MessageCounter::default());
        queue.add_listener(counter.clone());
        queue.start();

        // Act
        queue.append(
            SessionEvent::Message(MessageEvent {
                from: "bob".into(),
                to: "alice".into(),
                text: "hi".into(),
                offline: false,
            }),
            Some(ServiceType::Message),
        );
        queue.append(mail(3), Some(ServiceType::NewMail));
        queue.kill_and_drain().await;

        // Assert
        assert_eq!(*counter.count.lock().unwrap(), 1);
    }

    #[test]
    fn test_noop_listener_accepts_every_event() {
        NoopListener.on_event(&SessionEvent::Exception {
            message: "boom".into(),
        });
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_string(&mail(4)).unwrap();
        assert_eq!(json, r#"{"event":"new_mail","count":4}"#);
    }
}
