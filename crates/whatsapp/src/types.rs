//! Cloud API webhook payloads and their conversion to [`InboundEvent`]s.

use {
    parley_common::types::{InboundEvent, InteractiveReply, MessageKind},
    serde::Deserialize,
    std::collections::HashMap,
    tracing::debug,
};

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<PhoneMetadata>,
    #[serde(default)]
    pub contacts: Vec<WaContact>,
    #[serde(default)]
    pub messages: Vec<WaMessage>,
    /// Delivery receipts. Parsed to tolerate the shape, otherwise ignored.
    #[serde(default)]
    pub statuses: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct PhoneMetadata {
    #[serde(default)]
    pub display_phone_number: Option<String>,
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WaContact {
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<WaProfile>,
}

#[derive(Debug, Deserialize)]
pub struct WaProfile {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct WaMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub text: Option<WaText>,
    #[serde(default)]
    pub interactive: Option<WaInteractive>,
    #[serde(default)]
    pub button: Option<WaButton>,
    #[serde(default)]
    pub audio: Option<WaMedia>,
    #[serde(default)]
    pub voice: Option<WaMedia>,
    #[serde(default)]
    pub image: Option<WaMedia>,
    #[serde(default)]
    pub video: Option<WaMedia>,
    #[serde(default)]
    pub document: Option<WaMedia>,
}

#[derive(Debug, Deserialize)]
pub struct WaText {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct WaInteractive {
    #[serde(default)]
    pub button_reply: Option<WaReply>,
    #[serde(default)]
    pub list_reply: Option<WaReply>,
}

#[derive(Debug, Deserialize)]
pub struct WaReply {
    pub id: String,
    pub title: String,
}

/// Quick-reply button of a template message.
#[derive(Debug, Deserialize)]
pub struct WaButton {
    #[serde(default)]
    pub payload: Option<String>,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct WaMedia {
    pub id: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// An inbound event plus the business number it was sent to.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub phone_number_id: Option<String>,
    pub event: InboundEvent,
    pub mime_type: Option<String>,
}

impl WaMessage {
    fn media(&self) -> Option<(MessageKind, &WaMedia)> {
        match self.message_type.as_str() {
            "audio" => self.audio.as_ref().map(|m| (MessageKind::Audio, m)),
            "voice" => self
                .voice
                .as_ref()
                .or(self.audio.as_ref())
                .map(|m| (MessageKind::Audio, m)),
            "image" => self.image.as_ref().map(|m| (MessageKind::Image, m)),
            "video" => self.video.as_ref().map(|m| (MessageKind::Video, m)),
            "document" => self.document.as_ref().map(|m| (MessageKind::Document, m)),
            _ => None,
        }
    }

    fn reply(&self) -> Option<InteractiveReply> {
        if let Some(interactive) = &self.interactive {
            let reply = interactive
                .list_reply
                .as_ref()
                .or(interactive.button_reply.as_ref())?;
            return Some(InteractiveReply {
                id: reply.id.clone(),
                title: reply.title.clone(),
            });
        }
        self.button.as_ref().map(|b| InteractiveReply {
            id: b.payload.clone().unwrap_or_else(|| b.text.clone()),
            title: b.text.clone(),
        })
    }

    /// Convert to a normalized event. Unsupported types yield `None`.
    pub fn to_event(&self, contact_name: Option<&str>) -> Option<(InboundEvent, Option<String>)> {
        let mut event = InboundEvent::text(&self.from, "");
        event.text = None;
        event.provider_message_id = Some(self.id.clone());
        event.contact_name = contact_name.map(str::to_string);
        let mut mime_type = None;

        if let Some(text) = &self.text {
            event.text = Some(text.body.trim().to_string());
        } else if let Some(reply) = self.reply() {
            event.kind = MessageKind::Interactive;
            event.text = Some(reply.title.trim().to_lowercase());
            event.interactive_reply = Some(reply);
        } else if let Some((kind, media)) = self.media() {
            event.kind = kind;
            event.media_ref = Some(media.id.clone());
            event.text = media.caption.clone().filter(|c| !c.trim().is_empty());
            mime_type = media.mime_type.clone();
        } else {
            debug!(message_type = %self.message_type, from = %self.from, "unsupported message type");
            return None;
        }
        Some((event, mime_type))
    }
}

impl WebhookPayload {
    /// All inbound messages in delivery order. Status callbacks and other
    /// fields are skipped.
    pub fn messages(&self) -> Vec<ParsedMessage> {
        let mut out = Vec::new();
        for change in self.entry.iter().flat_map(|e| e.changes.iter()) {
            if change.field != "messages" {
                debug!(field = %change.field, "ignoring non-message webhook change");
                continue;
            }
            let value = &change.value;
            let names: HashMap<&str, &str> = value
                .contacts
                .iter()
                .filter_map(|c| c.profile.as_ref().map(|p| (c.wa_id.as_str(), p.name.as_str())))
                .collect();
            let phone_number_id = value.metadata.as_ref().map(|m| m.phone_number_id.clone());
            for message in &value.messages {
                let name = names.get(message.from.as_str()).copied();
                if let Some((event, mime_type)) = message.to_event(name) {
                    out.push(ParsedMessage {
                        phone_number_id: phone_number_id.clone(),
                        event,
                        mime_type,
                    });
                }
            }
        }
        out
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn payload(messages: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "WABA",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "metadata": {"display_phone_number": "15550001", "phone_number_id": "PN1"},
                        "contacts": [{"wa_id": "5215551234", "profile": {"name": "Ana"}}],
                        "messages": messages
                    }
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn text_message() {
        let parsed = payload(serde_json::json!([{
            "id": "wamid.1", "from": "5215551234", "type": "text",
            "text": {"body": "  Hola "}
        }]))
        .messages();
        assert_eq!(parsed.len(), 1);
        let m = &parsed[0];
        assert_eq!(m.phone_number_id.as_deref(), Some("PN1"));
        assert_eq!(m.event.text.as_deref(), Some("Hola"));
        assert_eq!(m.event.kind, MessageKind::Text);
        assert_eq!(m.event.contact_name.as_deref(), Some("Ana"));
        assert_eq!(m.event.provider_message_id.as_deref(), Some("wamid.1"));
    }

    #[test]
    fn list_and_button_replies() {
        let parsed = payload(serde_json::json!([
            {"id": "w2", "from": "5215551234", "type": "interactive",
             "interactive": {"type": "list_reply", "list_reply": {"id": "ventas", "title": " Ventas "}}},
            {"id": "w3", "from": "5215551234", "type": "interactive",
             "interactive": {"type": "button_reply", "button_reply": {"id": "si", "title": "Sí"}}}
        ]))
        .messages();
        assert_eq!(parsed[0].event.text.as_deref(), Some("ventas"));
        assert_eq!(parsed[0].event.interactive_reply.as_ref().unwrap().id, "ventas");
        assert_eq!(parsed[1].event.kind, MessageKind::Interactive);
        assert_eq!(parsed[1].event.text.as_deref(), Some("sí"));
    }

    #[test]
    fn voice_note_carries_media_id() {
        let parsed = payload(serde_json::json!([{
            "id": "w4", "from": "5215551234", "type": "audio",
            "audio": {"id": "MEDIA123", "mime_type": "audio/ogg; codecs=opus", "voice": true}
        }]))
        .messages();
        let m = &parsed[0];
        assert_eq!(m.event.kind, MessageKind::Audio);
        assert_eq!(m.event.media_ref.as_deref(), Some("MEDIA123"));
        assert!(m.event.text.is_none());
        assert_eq!(m.mime_type.as_deref(), Some("audio/ogg; codecs=opus"));
    }

    #[test]
    fn unsupported_and_status_changes_are_skipped() {
        let mut p = payload(serde_json::json!([
            {"id": "w5", "from": "5215551234", "type": "sticker", "sticker": {"id": "S"}}
        ]));
        p.entry[0].changes.push(
            serde_json::from_value(serde_json::json!({
                "field": "message_template_status_update",
                "value": {}
            }))
            .unwrap(),
        );
        assert!(p.messages().is_empty());
    }
}
