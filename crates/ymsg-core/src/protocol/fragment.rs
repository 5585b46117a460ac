//! Reassembly of logical responses that the server splits across packets.
//!
//! A long roster (LIST) does not fit a single 64 KiB frame, so the server
//! sends it in pieces.  A long field such as the buddy list `"87"` may be cut
//! in the middle of a value; the next piece continues the string.  Only the
//! final piece carries the terminal marker key (`"59"` for LIST).
//!
//! [`FragmentBuffer`] keeps one in-progress packet per service type and
//! merges each arriving piece into it with a [`MergePolicy`].

use std::collections::HashMap;

use tracing::trace;

use crate::protocol::messages::ServiceType;
use crate::protocol::packet::{MergePolicy, Packet};

/// Fields of a LIST response that are split mid-value across fragments:
/// buddy list, ignore list and identity list.
pub const LIST_CONCAT_KEYS: [&str; 3] = ["87", "88", "89"];

/// Key whose presence marks the last LIST fragment.
pub const LIST_TERMINAL_KEY: &str = "59";

/// Accumulates fragments per service type until the terminal key arrives.
#[derive(Debug, Clone)]
pub struct FragmentBuffer {
    policy: MergePolicy,
    terminal_key: String,
    in_progress: HashMap<ServiceType, Packet>,
}

impl FragmentBuffer {
    pub fn new(policy: MergePolicy, terminal_key: impl Into<String>) -> Self {
        Self {
            policy,
            terminal_key: terminal_key.into(),
            in_progress: HashMap::new(),
        }
    }

    /// Buffer configured for roster LIST responses.
    pub fn for_list() -> Self {
        Self::new(
            MergePolicy::concatenating(LIST_CONCAT_KEYS),
            LIST_TERMINAL_KEY,
        )
    }

    /// Adds a fragment.
    ///
    /// Returns the merged packet, and clears the slot for its service type,
    /// when `packet` carries the terminal key.  Otherwise the fragment is
    /// kept and `None` is returned.
    pub fn offer(&mut self, packet: Packet) -> Option<Packet> {
        let service = packet.service;
        let is_terminal = packet.has(&self.terminal_key);

        let merged = match self.in_progress.remove(&service) {
            Some(mut primary) => {
                primary.merge_with(packet, &self.policy);
                primary
            }
            None => packet,
        };

        if is_terminal {
            trace!(%service, fields = merged.body.len(), "fragmented response complete");
            Some(merged)
        } else {
            trace!(%service, "buffering fragment");
            self.in_progress.insert(service, merged);
            None
        }
    }

    /// Returns `true` if a partial packet is waiting for `service`.
    pub fn is_pending(&self, service: ServiceType) -> bool {
        self.in_progress.contains_key(&service)
    }

    /// Discards every partial packet.
    pub fn clear(&mut self) {
        self.in_progress.clear();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
