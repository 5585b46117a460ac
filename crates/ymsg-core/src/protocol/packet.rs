//! The decoded packet and its ordered, multi-valued key/value body.
//!
//! # Why an ordered list instead of a map? (for beginners)
//!
//! A YMSG body looks like a dictionary, but the same key may legally appear
//! many times.  Repetition encodes arrays: in a roster packet the Nth `"7"`
//! (buddy id) and the Nth `"10"` (status) together describe the Nth buddy.
//! The *position* of a field is therefore part of its meaning, so the body is
//! a `Vec<(String, String)>` that preserves insertion order exactly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::messages::{status, ServiceType, PROTOCOL_VERSION};

// ── Body ──────────────────────────────────────────────────────────────────────

/// Ordered key/value pairs of a packet body.  Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketBody {
    fields: Vec<(String, String)>,
}

impl PacketBody {
    /// Creates an empty body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field, keeping any earlier fields with the same key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// Returns the first value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns the `n`th (zero-based) value stored under `key`.
    pub fn get_nth<'a>(&'a self, key: &'a str, n: usize) -> Option<&'a str> {
        self.get_all(key).nth(n)
    }

    /// Iterates every value stored under `key`, in body order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if at least one field has this key.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Iterates all fields in body order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn last_index_of(&self, key: &str) -> Option<usize> {
        self.fields.iter().rposition(|(k, _)| k == key)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PacketBody {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

// ── Merge rules ───────────────────────────────────────────────────────────────

/// How a continuation fragment's field combines with the primary packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeRule {
    /// Append the value onto the primary's last value for the key.
    Concatenate,
    /// Overwrite the primary's last value for the key in place.
    Replace,
    /// Add the field as another same-key entry.
    #[default]
    Append,
}

/// Per-key [`MergeRule`]s; keys without an entry use [`MergeRule::Append`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePolicy {
    rules: HashMap<String, MergeRule>,
}

impl MergePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy where the listed keys concatenate and every other key appends.
    pub fn concatenating<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut policy = Self::new();
        for key in keys {
            policy = policy.with_rule(key, MergeRule::Concatenate);
        }
        policy
    }

    pub fn with_rule(mut self, key: impl Into<String>, rule: MergeRule) -> Self {
        self.rules.insert(key.into(), rule);
        self
    }

    pub fn rule_for(&self, key: &str) -> MergeRule {
        self.rules.get(key).copied().unwrap_or_default()
    }
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// One framed protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Protocol version from the header.
    pub version: u16,
    /// Operation this packet belongs to.
    pub service: ServiceType,
    /// Service-dependent status code (see [`crate::protocol::messages::status`]).
    pub status: u32,
    /// Server-assigned session id; zero until login completes.
    pub session_id: u32,
    /// Ordered key/value body.
    pub body: PacketBody,
}

impl Packet {
    /// Creates a packet with the default version, status `AVAILABLE`, and
    /// session id 0.
    pub fn new(service: ServiceType, body: PacketBody) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service,
            status: status::AVAILABLE,
            session_id: 0,
            body,
        }
    }

    /// Builder: sets the status code.
    pub fn with_status(mut self, status: u32) -> Self {
        self.status = status;
        self
    }

    /// Builder: sets the session id.
    pub fn with_session_id(mut self, session_id: u32) -> Self {
        self.session_id = session_id;
        self
    }

    /// Shorthand for `self.body.get(key)`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.body.get(key)
    }

    /// Shorthand for `self.body.contains(key)`.
    pub fn has(&self, key: &str) -> bool {
        self.body.contains(key)
    }

    /// Merges a continuation fragment into this packet.
    ///
    /// The header of `self` is kept.  Each field of `continuation` is applied
    /// in order according to `policy`.
    pub fn merge_with(&mut self, continuation: Packet, policy: &MergePolicy) {
        for (key, value) in continuation.body.fields {
            let rule = policy.rule_for(&key);
            match (rule, self.body.last_index_of(&key)) {
                (MergeRule::Concatenate, Some(idx)) => self.body.fields[idx].1.push_str(&value),
                (MergeRule::Replace, Some(idx)) => self.body.fields[idx].1 = value,
                _ => self.body.fields.push((key, value)),
            }
        }
    }

    /// Appends every field of `other` as new entries.
    pub fn append(&mut self, other: Packet) {
        self.body.fields.extend(other.body.fields);
    }
}

/// Merges `continuation` into `primary`: keys in `concatenable_keys` that
/// exist in both are concatenated; all other continuation fields are appended
/// as additional same-key entries.
pub fn merge(primary: &mut Packet, continuation: Packet, concatenable_keys: &[&str]) {
    let policy = MergePolicy::concatenating(concatenable_keys.iter().copied());
    primary.merge_with(continuation, &policy);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
