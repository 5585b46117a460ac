//! Default packet handlers installed when a session is built.
//!
//! The bootstrap handlers (AUTH, AUTHRESP, LOGON, LIST, LOGOFF) drive the
//! login state machine.  The rest translate inbound packets into
//! [`SessionEvent`]s.  Any of them can be replaced through the registry.

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use ymsg_core::{compute_response, status, AuthVersion, Packet, PacketBody, ServiceType};

use super::{lock, LoginRefusal, SessionError, SessionInner, SessionState};
use crate::application::dispatch::{HandlerError, PacketHandler};
use crate::application::events::{MessageEvent, SessionEvent, StatusEvent};
use crate::application::executor::PacketRequest;

type Method = fn(&SessionInner, Packet) -> Result<(), HandlerError>;

pub(super) fn register_defaults(inner: &Arc<SessionInner>) {
    let registry = &inner.registry;

    registry.register(ServiceType::Auth, bind(inner, SessionInner::on_challenge));
    registry.register(ServiceType::AuthResp, bind(inner, SessionInner::on_auth_response));
    registry.register_collector(
        ServiceType::Logon,
        status::AVAILABLE,
        Arc::new(bind(inner, SessionInner::on_logon)),
    );
    registry.register(ServiceType::List, bind(inner, SessionInner::on_list));
    registry.register(ServiceType::Logoff, bind(inner, SessionInner::on_logoff));
    registry.register_passthrough(ServiceType::Ping);

    registry.register(ServiceType::Message, bind(inner, SessionInner::on_message));
    registry.register(ServiceType::Notify, bind(inner, SessionInner::on_notify));
    registry.register(ServiceType::NewMail, bind(inner, SessionInner::on_new_mail));
    registry.register(ServiceType::FriendAdd, bind(inner, SessionInner::on_friend_added));
    registry.register(ServiceType::FriendRemove, bind(inner, SessionInner::on_friend_removed));
    registry.register(ServiceType::GotGroupRename, bind(inner, SessionInner::on_group_renamed));
    registry.register(ServiceType::ContactNew, bind(inner, SessionInner::on_contact_new));
    registry.register(ServiceType::FileTransfer, bind(inner, SessionInner::on_file_transfer));
    for service in [
        ServiceType::IsAway,
        ServiceType::IsBack,
        ServiceType::StatusUpdate,
    ] {
        registry.register(service, bind(inner, SessionInner::on_status_change));
    }
}

/// Wraps a handler method in a closure that holds the session weakly.
fn bind(inner: &Arc<SessionInner>, method: Method) -> impl PacketHandler + 'static {
    let session = Arc::downgrade(inner);
    move |packet: Packet| -> Result<(), HandlerError> {
        match session.upgrade() {
            Some(inner) => method(&inner, packet),
            None => Err(HandlerError::SessionGone),
        }
    }
}

/// Friend sections of a LOGON/LOGOFF/status packet: the Nth "7" pairs with
/// the Nth "10" and "19".
fn friend_statuses(packet: &Packet, online: bool) -> Vec<StatusEvent> {
    packet
        .body
        .get_all("7")
        .enumerate()
        .map(|(i, user)| StatusEvent {
            user: user.to_string(),
            status: packet
                .body
                .get_nth("10", i)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(status::AVAILABLE),
            message: packet.body.get_nth("19", i).map(str::to_string),
            online,
        })
        .collect()
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

impl SessionInner {
    fn emit(&self, event: SessionEvent, service: ServiceType) {
        self.events.append(event, Some(service));
    }

    /// Field 16 carries a server-side error text on any packet.
    fn report_error(&self, packet: &Packet) {
        if let Some(message) = packet.value("16") {
            warn!(service = %packet.service, "server reported error: {message}");
            self.emit(
                SessionEvent::Error {
                    service: packet.service,
                    message: message.to_string(),
                },
                packet.service,
            );
        }
    }

    fn emit_statuses(&self, packet: &Packet, online: bool) {
        for event in friend_statuses(packet, online) {
            self.emit(SessionEvent::StatusUpdate(event), packet.service);
        }
    }

    fn mark_logged_on(&self) {
        if self.transition(&[SessionState::Connected], SessionState::LoggedOn) {
            let username = self.username().unwrap_or_default();
            info!(%username, "session logged on");
            self.emit(SessionEvent::LoggedOn { username }, ServiceType::Logon);
        }
    }

    // ── Login handshake ───────────────────────────────────────────────────

    fn on_challenge(&self, packet: Packet) -> Result<(), HandlerError> {
        if self.state() != SessionState::Connecting {
            debug!("AUTH challenge outside login ignored");
            return Ok(());
        }

        let Some(challenge) = packet.value("94") else {
            self.fail(SessionError::Protocol(
                "AUTH challenge without field 94".to_string(),
            ));
            return Ok(());
        };
        let version = AuthVersion::from_flag(packet.value("13"));
        let username = self.username().unwrap_or_default();
        let password = lock(&self.password).clone().unwrap_or_default();

        let response = match compute_response(version, &username, &password, challenge) {
            Ok(response) => response,
            Err(e) => {
                error!("cannot answer login challenge: {e}");
                self.fail(SessionError::Crypto(e));
                return Ok(());
            }
        };
        debug!(?version, "login challenge answered");

        self.transition(&[SessionState::Connecting], SessionState::Connected);
        let body = PacketBody::new()
            .with("0", &username)
            .with("6", response.plain)
            .with("96", response.crypt)
            .with("135", &self.config.client_version)
            .with("2", "1")
            .with("1", &username);
        self.executor.execute(PacketRequest::new(
            "auth-response",
            Packet::new(ServiceType::AuthResp, body).with_status(self.config.initial_status),
        ));
        Ok(())
    }

    fn on_auth_response(&self, packet: Packet) -> Result<(), HandlerError> {
        let Some(raw) = packet.value("66") else {
            trace!("AUTHRESP without refusal code");
            return Ok(());
        };
        let code = raw.trim().parse::<i64>().unwrap_or(-1);
        if code == 0 {
            return Ok(());
        }
        if !self.state().is_logging_in() {
            warn!(code, "login refusal outside login ignored");
            return Ok(());
        }

        let refusal = LoginRefusal::from_code(code, packet.value("20"));
        warn!(code, "server refused login: {refusal}");
        self.fail(SessionError::Rejected(refusal));
        Ok(())
    }

    fn on_logon(&self, packet: Packet) -> Result<(), HandlerError> {
        self.report_error(&packet);
        self.emit_statuses(&packet, true);
        self.mark_logged_on();
        Ok(())
    }

    fn on_list(&self, packet: Packet) -> Result<(), HandlerError> {
        let complete = lock(&self.list_buffer).offer(packet);
        if let Some(list) = complete {
            debug!(fields = list.body.len(), "roster list complete");
            self.emit(SessionEvent::ListReceived { list }, ServiceType::List);
            self.mark_logged_on();
        }
        Ok(())
    }

    fn on_logoff(&self, packet: Packet) -> Result<(), HandlerError> {
        if packet.has("7") {
            self.emit_statuses(&packet, false);
            return Ok(());
        }

        match self.state() {
            SessionState::LoggedOn => {
                if !self.transition(&[SessionState::LoggedOn], SessionState::Unstarted) {
                    return Ok(());
                }
                info!("server ended the session");
                self.emit(
                    SessionEvent::ConnectionClosed {
                        reason: "session ended by server".to_string(),
                    },
                    ServiceType::Logoff,
                );
                self.teardown();
            }
            SessionState::Connecting | SessionState::Connected => {
                warn!("server ended the session during login");
                self.fail(SessionError::ConnectionClosed);
            }
            other => debug!(state = %other, "server LOGOFF ignored; session is not live"),
        }
        Ok(())
    }

    // ── Event translation ─────────────────────────────────────────────────

    fn on_message(&self, packet: Packet) -> Result<(), HandlerError> {
        self.report_error(&packet);
        let offline = packet.status == status::OFFLINE;

        // Offline delivery at login batches several messages per packet.
        for (i, text) in packet.body.get_all("14").enumerate() {
            let from = packet
                .body
                .get_nth("4", i)
                .or_else(|| packet.body.get_nth("1", i))
                .unwrap_or_default();
            let to = packet.body.get_nth("5", i).unwrap_or_default();
            self.emit(
                SessionEvent::Message(MessageEvent {
                    from: from.to_string(),
                    to: to.to_string(),
                    text: text.to_string(),
                    offline,
                }),
                ServiceType::Message,
            );
        }
        Ok(())
    }

    fn on_notify(&self, packet: Packet) -> Result<(), HandlerError> {
        if !packet
            .value("49")
            .is_some_and(|kind| kind.eq_ignore_ascii_case("TYPING"))
        {
            trace!(kind = ?packet.value("49"), "non-typing notification ignored");
            return Ok(());
        }
        let from = packet
            .value("4")
            .ok_or(HandlerError::missing(ServiceType::Notify, "4"))?;
        self.emit(
            SessionEvent::Typing {
                from: from.to_string(),
                to: packet.value("5").unwrap_or_default().to_string(),
                typing: packet.value("13") == Some("1"),
            },
            ServiceType::Notify,
        );
        Ok(())
    }

    fn on_new_mail(&self, packet: Packet) -> Result<(), HandlerError> {
        let count = match packet.value("9") {
            Some(raw) => raw.trim().parse().map_err(|_| HandlerError::InvalidField {
                service: ServiceType::NewMail,
                key: "9",
                value: raw.to_string(),
            })?,
            None => 0,
        };
        self.emit(SessionEvent::NewMail { count }, ServiceType::NewMail);
        Ok(())
    }

    fn on_friend_added(&self, packet: Packet) -> Result<(), HandlerError> {
        self.report_error(&packet);
        let friend = packet
            .value("7")
            .ok_or(HandlerError::missing(ServiceType::FriendAdd, "7"))?;
        self.emit(
            SessionEvent::FriendAdded {
                friend: friend.to_string(),
                group: owned(packet.value("65")),
            },
            ServiceType::FriendAdd,
        );
        Ok(())
    }

    fn on_friend_removed(&self, packet: Packet) -> Result<(), HandlerError> {
        self.report_error(&packet);
        let friend = packet
            .value("7")
            .ok_or(HandlerError::missing(ServiceType::FriendRemove, "7"))?;
        self.emit(
            SessionEvent::FriendRemoved {
                friend: friend.to_string(),
                group: owned(packet.value("65")),
            },
            ServiceType::FriendRemove,
        );
        Ok(())
    }

    fn on_group_renamed(&self, packet: Packet) -> Result<(), HandlerError> {
        let (Some(old_name), Some(new_name)) = (packet.value("67"), packet.value("65")) else {
            debug!("incomplete group rename ignored");
            return Ok(());
        };
        self.emit(
            SessionEvent::GroupRenamed {
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
            },
            ServiceType::GotGroupRename,
        );
        Ok(())
    }

    fn on_contact_new(&self, packet: Packet) -> Result<(), HandlerError> {
        // Echo of our own FRIENDADD/REMOVE.
        if packet.body.is_empty() {
            trace!("empty CONTACTNEW ignored");
            return Ok(());
        }
        if packet.has("7") {
            self.emit_statuses(&packet, true);
            return Ok(());
        }
        let from = packet
            .value("3")
            .ok_or(HandlerError::missing(ServiceType::ContactNew, "3"))?;
        self.emit(
            SessionEvent::ContactRequest {
                from: from.to_string(),
                message: owned(packet.value("14")),
            },
            ServiceType::ContactNew,
        );
        Ok(())
    }

    fn on_file_transfer(&self, packet: Packet) -> Result<(), HandlerError> {
        let from = packet.value("4").unwrap_or_default().to_string();

        // Without an expiry the packet only acknowledges our own upload.
        if !packet.has("38") {
            self.emit(
                SessionEvent::Message(MessageEvent {
                    from,
                    to: packet.value("5").unwrap_or_default().to_string(),
                    text: packet.value("14").unwrap_or_default().to_string(),
                    offline: false,
                }),
                ServiceType::FileTransfer,
            );
            return Ok(());
        }

        self.emit(
            SessionEvent::FileTransfer {
                from,
                url: owned(packet.value("20")),
                filename: owned(packet.value("27")),
                message: owned(packet.value("14")),
            },
            ServiceType::FileTransfer,
        );
        Ok(())
    }

    fn on_status_change(&self, packet: Packet) -> Result<(), HandlerError> {
        self.report_error(&packet);
        self.emit_statuses(&packet, true);
        Ok(())
    }
}
