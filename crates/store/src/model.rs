use std::{fmt, str::FromStr};

use {
    parley_common::types::{MessageKind, ResponseSpec, TenantKey},
    serde::{Deserialize, Serialize},
};

use crate::error::Error;

/// One conversation partner of a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: i64,
    pub tenant_key: TenantKey,
    pub external_id: String,
    pub alias: Option<String>,
    pub current_step: String,
    pub advisor_flag: bool,
    pub last_activity_at: i64,
    pub created_at: i64,
}

impl Contact {
    /// A contact that is not stored yet. The id is assigned by the first
    /// committed turn.
    pub fn new(
        tenant_key: TenantKey,
        external_id: impl Into<String>,
        initial_step: impl Into<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: 0,
            tenant_key,
            external_id: external_id.into(),
            alias: None,
            current_step: initial_step.into(),
            advisor_flag: false,
            last_activity_at: now_ms,
            created_at: now_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            other => Err(Error::corrupt_row("messages", format!("direction {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    #[default]
    None,
    Pending,
    Done,
    Failed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(Error::corrupt_row(
                "messages",
                format!("transcription status {other:?}"),
            )),
        }
    }
}

/// A stored message. History is append-only; only the transcription fields
/// are ever updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: i64,
    pub tenant_key: TenantKey,
    pub contact_id: i64,
    pub direction: Direction,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_ref: Option<String>,
    pub transcription_status: TranscriptionStatus,
    pub wa_id: Option<String>,
    /// Step the contact was at when an outbound message was produced.
    pub step: Option<String>,
    /// Rule whose response this outbound message carries.
    pub rule_id: Option<i64>,
    pub created_at: i64,
}

/// Fields for [`ConversationStore::append_message`](crate::ConversationStore::append_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub contact_id: i64,
    pub direction: Direction,
    pub kind: MessageKind,
    pub text: Option<String>,
    pub media_ref: Option<String>,
    pub transcription_status: TranscriptionStatus,
    pub wa_id: Option<String>,
    pub step: Option<String>,
    pub rule_id: Option<i64>,
    pub created_at: i64,
}

impl NewMessage {
    pub fn inbound(contact_id: i64, kind: MessageKind, created_at: i64) -> Self {
        Self {
            contact_id,
            direction: Direction::Inbound,
            kind,
            text: None,
            media_ref: None,
            transcription_status: TranscriptionStatus::None,
            wa_id: None,
            step: None,
            rule_id: None,
            created_at,
        }
    }

    pub fn outbound(contact_id: i64, response: &ResponseSpec, created_at: i64) -> Self {
        Self {
            contact_id,
            direction: Direction::Outbound,
            kind: response.kind(),
            text: Some(response.body().to_string()),
            media_ref: None,
            transcription_status: TranscriptionStatus::None,
            wa_id: None,
            step: None,
            rule_id: None,
            created_at,
        }
    }
}

/// Everything one inbound turn writes: the contact's new state, the inbound
/// message and the replies produced for it.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub contact: Contact,
    /// A set `wa_id` is the dedupe key of the whole turn.
    pub inbound: NewMessage,
    pub outbound: Vec<NewMessage>,
}

impl TurnRecord {
    pub fn new(contact: Contact, inbound: NewMessage) -> Self {
        Self {
            contact,
            inbound,
            outbound: Vec::new(),
        }
    }
}

/// Result of [`ConversationStore::commit_turn`](crate::ConversationStore::commit_turn).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnCommit {
    Committed {
        contact_id: i64,
        inbound_id: i64,
        outbound_ids: Vec<i64>,
    },
    /// The inbound `wa_id` was committed before. Nothing was written.
    Duplicate,
}

/// A step rule. `match_spec` is `*` or a comma separated list of
/// alternatives; `next_step` is empty, one step, or a comma separated chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub step: String,
    pub match_spec: String,
    pub response: Option<ResponseSpec>,
    pub next_step: String,
    pub priority: i64,
}

/// Fields for creating or replacing a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub step: String,
    pub match_spec: String,
    #[serde(default)]
    pub response: Option<ResponseSpec>,
    #[serde(default)]
    pub next_step: String,
    #[serde(default)]
    pub priority: i64,
}

impl NewRule {
    pub fn new(step: &str, match_spec: &str, next_step: &str) -> Self {
        Self {
            step: step.into(),
            match_spec: match_spec.into(),
            response: None,
            next_step: next_step.into(),
            priority: 0,
        }
    }

    #[must_use]
    pub fn with_response(mut self, response: ResponseSpec) -> Self {
        self.response = Some(response);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// A global command row: normalized keyword bound to a handler id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalCommand {
    pub keyword: String,
    pub handler: String,
}
