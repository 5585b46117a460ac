//! Conference collaborator: multi-user conversations built on the dispatch
//! registry and the request executor.
//!
//! # Out-of-order packets
//!
//! The server may deliver a CONFLOGON, CONFLOGOFF or CONFMSG for a room
//! before the CONFINVITE that tells us the room exists.  Such packets are
//! kept in the room's `pending` list and replayed, in arrival order, right
//! after the invite has been applied.  Which service types are buffered is a
//! [`BufferPolicy`]; CONFDECLINE is not buffered by default and a premature
//! decline is logged and dropped.  A room entry is only created by an invite
//! or by a packet the policy buffers.
//!
//! Rooms we leave or decline are removed from the map and remembered by
//! name, so late traffic for them is dropped instead of recreating the room.
//! A fresh invite to the same name starts over.
//!
//! Each room sits behind its own mutex inside a `DashMap`, so traffic for
//! one conference never waits on another.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace, warn};

use ymsg_core::{Packet, PacketBody, ServiceType};

use crate::application::dispatch::HandlerError;
use crate::application::events::{EventQueue, SessionEvent};
use crate::application::executor::{PacketRequest, RequestExecutor};
use crate::application::session::{Session, SessionState, WeakSession};

/// Service types whose premature packets are held until the invite arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPolicy {
    buffered: HashSet<ServiceType>,
}

impl BufferPolicy {
    /// Buffers CONFLOGON, CONFLOGOFF and CONFMSG, plus CONFDECLINE when
    /// `buffer_declines` is set.
    pub fn new(buffer_declines: bool) -> Self {
        let mut buffered: HashSet<ServiceType> = [
            ServiceType::ConfLogon,
            ServiceType::ConfLogoff,
            ServiceType::ConfMsg,
        ]
        .into_iter()
        .collect();
        if buffer_declines {
            buffered.insert(ServiceType::ConfDecline);
        }
        Self { buffered }
    }

    pub fn buffers(&self, service: ServiceType) -> bool {
        self.buffered.contains(&service)
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConferenceError {
    #[error("conference {0} not found")]
    UnknownConference(String),

    #[error("session is not logged on")]
    NotLoggedOn,
}

/// Read-only view of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConferenceSnapshot {
    pub room: String,
    pub invited: bool,
    pub inviter: Option<String>,
    pub members: Vec<String>,
    /// Packets waiting for the invite.
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Conference {
    invited: bool,
    closed: bool,
    inviter: Option<String>,
    members: Vec<String>,
    pending: Vec<Packet>,
}

impl Conference {
    fn add_member(&mut self, user: &str) {
        if !self.members.iter().any(|m| m == user) {
            self.members.push(user.to_string());
        }
    }

    fn remove_member(&mut self, user: &str) {
        self.members.retain(|m| m != user);
    }
}

type Room = Arc<Mutex<Conference>>;

fn lock(room: &Room) -> MutexGuard<'_, Conference> {
    room.lock().unwrap_or_else(PoisonError::into_inner)
}

fn field<'a>(packet: &'a Packet, key: &'static str) -> Result<&'a str, HandlerError> {
    packet
        .value(key)
        .ok_or(HandlerError::missing(packet.service, key))
}

/// Owns the conference map of one session.
#[derive(Clone)]
pub struct ConferenceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    conferences: DashMap<String, Room>,
    left: DashSet<String>,
    policy: BufferPolicy,
    events: Arc<EventQueue>,
    executor: Arc<RequestExecutor>,
    session: WeakSession,
    created: AtomicU64,
}

impl ConferenceManager {
    /// Registers the conference handlers on `session`, replacing any
    /// earlier ones.
    pub fn attach(session: &Session, policy: BufferPolicy) -> Self {
        let inner = Arc::new(ManagerInner {
            conferences: DashMap::new(),
            left: DashSet::new(),
            policy,
            events: session.events(),
            executor: session.executor(),
            session: session.downgrade(),
            created: AtomicU64::new(0),
        });

        let registry = session.registry();
        for service in [
            ServiceType::ConfInvite,
            ServiceType::ConfAddInvite,
            ServiceType::ConfLogon,
            ServiceType::ConfLogoff,
            ServiceType::ConfDecline,
            ServiceType::ConfMsg,
        ] {
            let manager = Arc::clone(&inner);
            registry.register(service, move |packet: Packet| -> Result<(), HandlerError> {
                manager.on_packet(packet)
            });
        }
        debug!("conference handlers registered");
        Self { inner }
    }

    pub fn snapshot(&self, room: &str) -> Option<ConferenceSnapshot> {
        let conference = self.inner.find(room)?;
        let conference = lock(&conference);
        Some(ConferenceSnapshot {
            room: room.to_string(),
            invited: conference.invited,
            inviter: conference.inviter.clone(),
            members: conference.members.clone(),
            pending: conference.pending.len(),
        })
    }

    pub fn rooms(&self) -> Vec<String> {
        self.inner
            .conferences
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Starts a new conference and invites `users`.  Returns the room name.
    pub fn create(&self, users: &[&str], message: &str) -> Result<String, ConferenceError> {
        let me = self.inner.logged_on_user()?;
        let room = format!("{me}-{}", self.inner.created.fetch_add(1, Ordering::Relaxed));

        let mut conference = Conference {
            invited: true,
            inviter: Some(me.clone()),
            ..Conference::default()
        };
        let mut body = PacketBody::new().with("1", &me).with("50", &me);
        for user in users {
            conference.add_member(user);
            body.push("52", *user);
        }
        body.push("57", &room);
        body.push("58", message);
        body.push("13", "0");

        self.inner
            .conferences
            .insert(room.clone(), Arc::new(Mutex::new(conference)));
        self.inner.send("conference-create", ServiceType::ConfInvite, body);
        debug!(%room, invited = users.len(), "conference created");
        Ok(room)
    }

    /// Invites one more user into an existing room.
    pub fn invite(&self, room: &str, user: &str, message: &str) -> Result<(), ConferenceError> {
        let me = self.inner.logged_on_user()?;
        let conference = self.inner.known(room)?;

        let mut body = PacketBody::new().with("1", &me).with("51", user).with("57", room);
        for member in &lock(&conference).members {
            body.push("52", member);
            body.push("53", member);
        }
        body.push("58", message);
        body.push("13", "0");
        self.inner.send("conference-invite", ServiceType::ConfAddInvite, body);
        Ok(())
    }

    /// Joins a room we were invited to.
    pub fn accept(&self, room: &str) -> Result<(), ConferenceError> {
        let me = self.inner.logged_on_user()?;
        let conference = self.inner.known(room)?;

        let body = self.inner.member_body(&me, &conference, "3", room);
        self.inner.send("conference-accept", ServiceType::ConfLogon, body);
        Ok(())
    }

    /// Turns down an invitation.  The room is forgotten afterwards.
    pub fn decline(&self, room: &str, message: &str) -> Result<(), ConferenceError> {
        let me = self.inner.logged_on_user()?;
        let conference = self.inner.known(room)?;
        lock(&conference).closed = true;

        let body = self
            .inner
            .member_body(&me, &conference, "3", room)
            .with("14", message);
        self.inner.send("conference-decline", ServiceType::ConfDecline, body);
        self.inner.forget(room);
        Ok(())
    }

    /// Leaves a room.  The room is forgotten afterwards.
    pub fn leave(&self, room: &str) -> Result<(), ConferenceError> {
        let me = self.inner.logged_on_user()?;
        let conference = self.inner.known(room)?;
        lock(&conference).closed = true;

        let body = self.inner.member_body(&me, &conference, "3", room);
        self.inner.send("conference-leave", ServiceType::ConfLogoff, body);
        self.inner.forget(room);
        Ok(())
    }

    pub fn send_message(&self, room: &str, text: &str) -> Result<(), ConferenceError> {
        let me = self.inner.logged_on_user()?;
        let conference = self.inner.known(room)?;

        let mut body = self
            .inner
            .member_body(&me, &conference, "53", room)
            .with("14", text);
        if !text.is_ascii() {
            body.push("97", "1");
        }
        self.inner.send("conference-message", ServiceType::ConfMsg, body);
        Ok(())
    }
}

impl ManagerInner {
    fn find(&self, room: &str) -> Option<Room> {
        // Clone the Arc so the map shard is released before the room is locked.
        self.conferences.get(room).map(|entry| Arc::clone(entry.value()))
    }

    fn known(&self, room: &str) -> Result<Room, ConferenceError> {
        self.find(room)
            .ok_or_else(|| ConferenceError::UnknownConference(room.to_string()))
    }

    fn find_or_create(&self, room: &str) -> Room {
        let entry = self.conferences.entry(room.to_string()).or_default();
        Arc::clone(entry.value())
    }

    fn forget(&self, room: &str) {
        self.left.insert(room.to_string());
        self.conferences.remove(room);
    }

    /// Room an inbound packet applies to, or `None` when it is dropped.
    fn target(&self, room: &str, service: ServiceType) -> Option<Room> {
        if matches!(service, ServiceType::ConfInvite | ServiceType::ConfAddInvite) {
            self.left.remove(room);
            return Some(self.find_or_create(room));
        }
        if self.left.contains(room) {
            trace!(%room, %service, "packet for a conference we left dropped");
            return None;
        }
        if let Some(conference) = self.find(room) {
            return Some(conference);
        }
        if self.policy.buffers(service) {
            return Some(self.find_or_create(room));
        }
        warn!(
            %room,
            %service,
            "conference packet before invite dropped; service type is not buffered"
        );
        None
    }

    fn logged_on_user(&self) -> Result<String, ConferenceError> {
        let session = self.session.upgrade().ok_or(ConferenceError::NotLoggedOn)?;
        if session.state() != SessionState::LoggedOn {
            return Err(ConferenceError::NotLoggedOn);
        }
        session.username().ok_or(ConferenceError::NotLoggedOn)
    }

    /// Body addressed to every current member under `member_key`.
    fn member_body(&self, me: &str, conference: &Room, member_key: &str, room: &str) -> PacketBody {
        let mut body = PacketBody::new().with("1", me);
        for member in &lock(conference).members {
            body.push(member_key, member);
        }
        body.with("57", room)
    }

    fn send(&self, name: &'static str, service: ServiceType, body: PacketBody) {
        self.executor
            .execute(PacketRequest::new(name, Packet::new(service, body)));
    }

    fn on_packet(&self, packet: Packet) -> Result<(), HandlerError> {
        let service = packet.service;
        let room = field(&packet, "57")?.to_string();
        let Some(conference) = self.target(&room, service) else {
            return Ok(());
        };

        let mut emitted = Vec::new();
        {
            let mut state = lock(&conference);
            match service {
                ServiceType::ConfInvite | ServiceType::ConfAddInvite => {
                    emitted.push((invite(&mut state, &room, &packet), service));
                    let pending = std::mem::take(&mut state.pending);
                    if !pending.is_empty() {
                        debug!(%room, count = pending.len(), "replaying buffered conference packets");
                    }
                    for early in pending {
                        let early_service = early.service;
                        match apply(&mut state, &room, &early) {
                            Ok(Some(event)) => emitted.push((event, early_service)),
                            Ok(None) => {}
                            Err(e) => warn!(%room, "buffered conference packet dropped: {e}"),
                        }
                    }
                }
                _ if !state.invited => {
                    if self.policy.buffers(service) {
                        trace!(%room, %service, "conference packet buffered until invite");
                        state.pending.push(packet);
                    } else {
                        warn!(
                            %room,
                            %service,
                            "conference packet before invite dropped; service type is not buffered"
                        );
                    }
                }
                _ => {
                    if let Some(event) = apply(&mut state, &room, &packet)? {
                        emitted.push((event, service));
                    }
                }
            }
        }

        for (event, service) in emitted {
            self.events.append(event, Some(service));
        }
        Ok(())
    }
}

fn invite(state: &mut Conference, room: &str, packet: &Packet) -> SessionEvent {
    state.invited = true;
    let inviter = packet.value("50").unwrap_or_default().to_string();
    if !inviter.is_empty() {
        state.inviter = Some(inviter.clone());
        state.add_member(&inviter);
    }
    let invited: Vec<String> = packet.body.get_all("52").map(str::to_string).collect();
    for member in &invited {
        state.add_member(member);
    }
    SessionEvent::ConferenceInvite {
        room: room.to_string(),
        inviter,
        members: invited,
        message: packet.value("58").map(str::to_string),
    }
}

/// Applies a membership or message packet to an invited room.  Closed rooms
/// absorb updates silently.
fn apply(
    state: &mut Conference,
    room: &str,
    packet: &Packet,
) -> Result<Option<SessionEvent>, HandlerError> {
    let room = room.to_string();
    let event = match packet.service {
        ServiceType::ConfLogon => {
            let user = field(packet, "53")?;
            state.add_member(user);
            SessionEvent::ConferenceLogon {
                room,
                user: user.to_string(),
            }
        }
        ServiceType::ConfLogoff => {
            let user = field(packet, "56")?;
            state.remove_member(user);
            SessionEvent::ConferenceLogoff {
                room,
                user: user.to_string(),
            }
        }
        ServiceType::ConfDecline => {
            let user = field(packet, "54")?;
            state.remove_member(user);
            SessionEvent::ConferenceDecline {
                room,
                user: user.to_string(),
                message: packet.value("14").map(str::to_string),
            }
        }
        ServiceType::ConfMsg => SessionEvent::ConferenceMessage {
            room,
            from: field(packet, "3")?.to_string(),
            text: packet.value("14").unwrap_or_default().to_string(),
        },
        other => {
            trace!(service = %other, "not a conference update");
            return Ok(None);
        }
    };
    Ok((!state.closed).then_some(event))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
