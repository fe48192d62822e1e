//! The conversation ledger.
//!
//! The [`Ledger`] is the authoritative, ordered record of a session.  Slot 0
//! always holds the system instruction; every later slot is a turn spoken by
//! the user or the model.  The turn history sent to the remote service (the
//! mirror) is never stored separately: [`Ledger::mirror`] projects it from the
//! ledger, so the two cannot drift apart.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Number of characters kept from each end of a long message in a preview.
const PREVIEW_EDGE_CHARS: usize = 100;

/// Messages longer than this are abbreviated in previews.
const PREVIEW_MAX_CHARS: usize = 205;

/// Who produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The system instruction at slot 0.
    System,
    /// A turn typed (or attached) by the user.
    User,
    /// A reply from the model.
    Model,
}

impl Role {
    /// Display name used in session files and exports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Model => "Model",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("system") {
            Ok(Role::System)
        } else {
            Speaker::from_str(s).map(Role::from)
        }
    }
}

impl Serialize for Role {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The author of a conversational turn.  The system instruction is not a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    /// The user.
    User,
    /// The model.
    Model,
}

impl Speaker {
    /// Display name used in session files and exports.
    pub fn as_str(&self) -> &'static str {
        Role::from(*self).as_str()
    }

    /// Role name used on the wire by the remote service.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Speaker::User => "user",
            Speaker::Model => "model",
        }
    }
}

impl From<Speaker> for Role {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Role::User,
            Speaker::Model => Role::Model,
        }
    }
}

impl TryFrom<Role> for Speaker {
    type Error = Error;

    fn try_from(role: Role) -> Result<Self> {
        match role {
            Role::User => Ok(Speaker::User),
            Role::Model => Ok(Speaker::Model),
            Role::System => Err(Error::persistence(
                "the system instruction cannot appear as a turn",
                None,
            )),
        }
    }
}

impl FromStr for Speaker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("user") {
            Ok(Speaker::User)
        } else if s.eq_ignore_ascii_case("model") {
            Ok(Speaker::Model)
        } else {
            Err(Error::persistence(format!("unknown role: {s}"), None))
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl Serialize for Speaker {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Speaker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    role: Role,
    content: String,
    token_count: u64,
}

impl Message {
    fn new(role: Role, content: String, token_count: u64) -> Self {
        Self {
            role,
            content,
            token_count,
        }
    }

    /// The entry's role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The entry's full text.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Tokens attributed to this entry.
    pub fn token_count(&self) -> u64 {
        self.token_count
    }

    /// A single-line preview of the content.
    ///
    /// Long content keeps its first and last hundred characters around an
    /// ellipsis; newlines become spaces.
    pub fn preview(&self) -> String {
        content_preview(&self.content)
    }
}

/// Abbreviates `content` for list views.
pub fn content_preview(content: &str) -> String {
    let len = content.chars().count();
    let preview = if len > PREVIEW_MAX_CHARS {
        let head: String = content.chars().take(PREVIEW_EDGE_CHARS).collect();
        let tail: String = content.chars().skip(len - PREVIEW_EDGE_CHARS).collect();
        format!("{head} ... {tail}")
    } else {
        content.to_string()
    };
    preview.replace('\n', " ")
}

/// A turn as the remote service sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said.
    pub content: String,
}

impl Turn {
    /// Creates a new turn.
    pub fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            speaker,
            content: content.into(),
        }
    }
}

/// Per-index results of [`Ledger::remove_batch`], in processing order
/// (highest index first).
#[derive(Debug, Clone, Default)]
pub struct RemovalReport {
    outcomes: Vec<(usize, Result<Message>)>,
}

impl RemovalReport {
    /// Every requested index with its outcome.
    pub fn outcomes(&self) -> &[(usize, Result<Message>)] {
        &self.outcomes
    }

    /// Indices that were removed.
    pub fn removed(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(index, _)| *index)
            .collect()
    }

    /// Indices that were rejected, with the reason.
    pub fn failed(&self) -> Vec<(usize, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(index, outcome)| outcome.as_ref().err().map(|err| (*index, err)))
            .collect()
    }

    /// Returns true if at least one entry was removed.
    pub fn any_removed(&self) -> bool {
        self.outcomes.iter().any(|(_, outcome)| outcome.is_ok())
    }

    /// Returns true if every requested index was removed.
    pub fn all_removed(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| outcome.is_ok())
    }
}

/// The ordered record of a session, system instruction included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    messages: Vec<Message>,
}

impl Ledger {
    /// Creates a ledger holding only the system instruction.
    pub fn new(system_instruction: impl Into<String>, system_tokens: u64) -> Self {
        Self {
            messages: vec![Message::new(
                Role::System,
                system_instruction.into(),
                system_tokens,
            )],
        }
    }

    /// Appends a turn and returns its index.
    pub fn append(&mut self, speaker: Speaker, content: impl Into<String>, token_count: u64) -> usize {
        self.messages
            .push(Message::new(speaker.into(), content.into(), token_count));
        self.messages.len() - 1
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> Result<&Message> {
        self.messages
            .get(index)
            .ok_or_else(|| Error::invalid_index(index, self.messages.len()))
    }

    /// Number of entries, the system instruction included.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true when the ledger holds no turns beyond the system instruction.
    pub fn is_empty(&self) -> bool {
        self.messages.len() <= 1
    }

    /// The system instruction entry.
    pub fn system(&self) -> &Message {
        &self.messages[0]
    }

    /// All entries in order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Entries after the system instruction.
    pub fn turns(&self) -> &[Message] {
        &self.messages[1..]
    }

    /// The most recent entry spoken by `speaker`.
    pub fn last_of(&self, speaker: Speaker) -> Option<&Message> {
        let role = Role::from(speaker);
        self.turns().iter().rev().find(|m| m.role == role)
    }

    /// Installs a new system instruction in slot 0.
    pub fn replace_system(&mut self, system_instruction: impl Into<String>, system_tokens: u64) {
        self.messages[0] = Message::new(Role::System, system_instruction.into(), system_tokens);
    }

    /// Removes a batch of entries, best effort.
    ///
    /// Indices are processed highest first so earlier removals never shift an
    /// index still waiting to be processed.  Index 0 and indices past the end
    /// are rejected individually; the rest of the batch proceeds.
    pub fn remove_batch<I>(&mut self, indices: I) -> RemovalReport
    where
        I: IntoIterator<Item = usize>,
    {
        let indices: BTreeSet<usize> = indices.into_iter().collect();
        let mut report = RemovalReport::default();
        for index in indices.into_iter().rev() {
            let outcome = if index == 0 || index >= self.messages.len() {
                Err(Error::invalid_index(index, self.messages.len()))
            } else {
                Ok(self.messages.remove(index))
            };
            report.outcomes.push((index, outcome));
        }
        report
    }

    /// Drops every turn, keeping the system instruction.
    pub fn clear(&mut self) {
        self.messages.truncate(1);
    }

    /// The turn history as sent to the remote service: every entry after
    /// slot 0, in order.  `mirror()[i - 1]` corresponds to `self.get(i)`.
    pub fn mirror(&self) -> Vec<Turn> {
        self.turns()
            .iter()
            .filter_map(|m| {
                Speaker::try_from(m.role)
                    .ok()
                    .map(|speaker| Turn::new(speaker, m.content.clone()))
            })
            .collect()
    }

    /// Sum of every retained entry's tokens, the system instruction included.
    pub fn context_total_tokens(&self) -> u64 {
        self.messages.iter().map(|m| m.token_count).sum()
    }

    /// Converts a raw token count reported by the service, which includes the
    /// system instruction's overhead, into the tokens the turn itself uses.
    pub fn net_tokens(&self, raw_count: u64) -> u64 {
        raw_count.saturating_sub(self.system().token_count)
    }
}
