use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Error, text::normalize_text};

// ── Tenant key ──────────────────────────────────────────────────────────────

const MAX_TENANT_KEY_LEN: usize = 64;

/// Validated tenant identifier: lowercase ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantKey(String);

impl TenantKey {
    /// Trim, lowercase and validate a raw key.
    pub fn parse(raw: &str) -> crate::Result<Self> {
        let key = raw.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(Error::invalid("tenant key", "must not be empty"));
        }
        if key.len() > MAX_TENANT_KEY_LEN {
            return Err(Error::invalid(
                "tenant key",
                format!("longer than {MAX_TENANT_KEY_LEN} characters"),
            ));
        }
        if let Some(bad) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(Error::invalid(
                "tenant key",
                format!("unexpected character {bad:?}"),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantKey {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TenantKey> for String {
    fn from(value: TenantKey) -> Self {
        value.0
    }
}

impl FromStr for TenantKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ── Messages ────────────────────────────────────────────────────────────────

/// Kind of a stored or inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Audio,
    Image,
    Video,
    Document,
    Interactive,
    Other,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Interactive => "interactive",
            Self::Other => "other",
        }
    }
}

impl FromStr for MessageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "audio" | "voice" => Ok(Self::Audio),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "interactive" | "button" | "list" => Ok(Self::Interactive),
            "other" => Ok(Self::Other),
            other => Err(Error::invalid("message kind", other.to_string())),
        }
    }
}

/// The option a contact picked from a list or button prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveReply {
    pub id: String,
    pub title: String,
}

/// A delivery-layer independent inbound chat event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Raw tenant key as supplied by the delivery layer. Absent means "use the
    /// default tenant".
    #[serde(default)]
    pub tenant_key: Option<String>,
    pub contact_external_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub interactive_reply: Option<InteractiveReply>,
    /// Provider message id, used to drop duplicate deliveries.
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
}

impl InboundEvent {
    pub fn text(contact_external_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tenant_key: None,
            contact_external_id: contact_external_id.into(),
            text: Some(text.into()),
            kind: MessageKind::Text,
            media_ref: None,
            interactive_reply: None,
            provider_message_id: None,
            contact_name: None,
        }
    }

    #[must_use]
    pub fn for_tenant(mut self, key: impl Into<String>) -> Self {
        self.tenant_key = Some(key.into());
        self
    }

    /// Text used for matching: the typed text, or the title of the picked option.
    pub fn match_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.interactive_reply.as_ref().map(|r| r.title.as_str()))
    }
}

// ── Responses ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }
}

/// A selectable button or list row. `step`, when set, replaces the rule's
/// next step if this option is the one the contact picks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveOption {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub rows: Vec<InteractiveOption>,
}

/// What a rule or command handler asks the outbound transport to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseSpec {
    Text {
        body: String,
    },
    Media {
        kind: MediaKind,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Buttons {
        body: String,
        buttons: Vec<InteractiveOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
    },
    List {
        body: String,
        sections: Vec<ListSection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        footer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        button: Option<String>,
    },
}

impl ResponseSpec {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Media { kind, .. } => match kind {
                MediaKind::Image => MessageKind::Image,
                MediaKind::Audio => MessageKind::Audio,
                MediaKind::Video => MessageKind::Video,
                MediaKind::Document => MessageKind::Document,
            },
            Self::Buttons { .. } | Self::List { .. } => MessageKind::Interactive,
        }
    }

    /// Human readable body, stored in message history.
    pub fn body(&self) -> &str {
        match self {
            Self::Text { body } | Self::Buttons { body, .. } | Self::List { body, .. } => body,
            Self::Media { caption, url, .. } => caption.as_deref().unwrap_or(url.as_str()),
        }
    }

    /// All selectable options, in display order.
    pub fn options(&self) -> Vec<&InteractiveOption> {
        match self {
            Self::Buttons { buttons, .. } => buttons.iter().collect(),
            Self::List { sections, .. } => sections.iter().flat_map(|s| s.rows.iter()).collect(),
            Self::Text { .. } | Self::Media { .. } => Vec::new(),
        }
    }

    /// Find the option a reply refers to: exact id first, then folded title.
    pub fn find_option(&self, reply: &InteractiveReply) -> Option<&InteractiveOption> {
        let options = self.options();
        if let Some(opt) = options.iter().copied().find(|o| o.id == reply.id) {
            return Some(opt);
        }
        let wanted = normalize_text(&reply.title);
        options
            .into_iter()
            .find(|o| normalize_text(&o.title) == wanted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn option(id: &str, title: &str, step: Option<&str>) -> InteractiveOption {
        InteractiveOption {
            id: id.into(),
            title: title.into(),
            description: None,
            step: step.map(Into::into),
        }
    }

    #[test]
    fn tenant_key_is_normalized_and_validated() {
        assert_eq!(TenantKey::parse("  Acme_01 ").unwrap().as_str(), "acme_01");
        assert!(TenantKey::parse("").is_err());
        assert!(TenantKey::parse("acme corp").is_err());
        assert!(TenantKey::parse("../etc").is_err());
        assert!(TenantKey::parse(&"x".repeat(65)).is_err());
    }

    #[test]
    fn tenant_key_deserialize_rejects_invalid() {
        let ok: TenantKey = serde_json::from_str("\"Shop\"").unwrap();
        assert_eq!(ok.as_str(), "shop");
        assert!(serde_json::from_str::<TenantKey>("\"a/b\"").is_err());
    }

    #[test]
    fn response_spec_json_shape() {
        let spec: ResponseSpec = serde_json::from_value(serde_json::json!({
            "type": "list",
            "body": "Elige",
            "sections": [{ "rows": [{ "id": "1", "title": "Ventas", "step": "ventas" }] }]
        }))
        .unwrap();
        assert_eq!(spec.kind(), MessageKind::Interactive);
        assert_eq!(spec.options().len(), 1);
        assert_eq!(spec.options()[0].step.as_deref(), Some("ventas"));
    }

    #[test]
    fn find_option_prefers_id_then_title() {
        let spec = ResponseSpec::Buttons {
            body: "¿Seguimos?".into(),
            buttons: vec![option("si", "Sí", Some("confirmar")), option("no", "No", None)],
            header: None,
            footer: None,
        };
        let by_id = InteractiveReply {
            id: "no".into(),
            title: "whatever".into(),
        };
        assert_eq!(spec.find_option(&by_id).unwrap().id, "no");

        let by_title = InteractiveReply {
            id: "unknown".into(),
            title: "si".into(),
        };
        assert_eq!(
            spec.find_option(&by_title).unwrap().step.as_deref(),
            Some("confirmar")
        );
    }

    #[test]
    fn match_text_falls_back_to_reply_title() {
        let mut event = InboundEvent::text("5491100000000", "  ");
        event.interactive_reply = Some(InteractiveReply {
            id: "1".into(),
            title: "Ventas".into(),
        });
        assert_eq!(event.match_text(), Some("Ventas"));
    }
}
