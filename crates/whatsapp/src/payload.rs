//! Outbound message bodies for `POST /{phone_number_id}/messages`.

use {
    parley_common::types::{InteractiveOption, ListSection, ResponseSpec},
    serde_json::{Value, json},
    tracing::warn,
};

pub const DEFAULT_LIST_HEADER: &str = "Menú";
pub const DEFAULT_LIST_FOOTER: &str = "Selecciona una opción";
pub const DEFAULT_LIST_BUTTON: &str = "Ver opciones";
pub const EMPTY_LIST_FALLBACK: &str = "No hay opciones disponibles.";

/// The Cloud API accepts at most three reply buttons.
pub const MAX_BUTTONS: usize = 3;

/// Build the request body. Option `step` fields never reach the wire.
pub fn build_payload(to: &str, response: &ResponseSpec) -> Value {
    match response {
        ResponseSpec::Text { body } => text(to, body),
        ResponseSpec::Media { kind, url, caption } => {
            let mut media = json!({ "link": url });
            if let Some(caption) = caption.as_deref().filter(|c| !c.is_empty())
                && let Some(obj) = media.as_object_mut()
            {
                obj.insert("caption".into(), Value::String(caption.to_string()));
            }
            let mut message = json!({
                "messaging_product": "whatsapp",
                "to": to,
                "type": kind.as_str(),
            });
            if let Some(obj) = message.as_object_mut() {
                obj.insert(kind.as_str().to_string(), media);
            }
            message
        },
        ResponseSpec::Buttons {
            body,
            buttons,
            header,
            footer,
        } => {
            if buttons.is_empty() {
                return text(to, body);
            }
            if buttons.len() > MAX_BUTTONS {
                warn!(count = buttons.len(), "too many reply buttons, extra ones dropped");
            }
            let buttons: Vec<Value> = buttons
                .iter()
                .take(MAX_BUTTONS)
                .map(|b| json!({ "type": "reply", "reply": { "id": b.id, "title": b.title } }))
                .collect();
            let mut interactive = json!({
                "type": "button",
                "body": { "text": body },
                "action": { "buttons": buttons },
            });
            if let Some(obj) = interactive.as_object_mut() {
                if let Some(header) = header {
                    obj.insert("header".into(), json!({ "type": "text", "text": header }));
                }
                if let Some(footer) = footer {
                    obj.insert("footer".into(), json!({ "text": footer }));
                }
            }
            interactive_message(to, interactive)
        },
        ResponseSpec::List {
            body,
            sections,
            header,
            footer,
            button,
        } => {
            let sections: Vec<Value> = sections
                .iter()
                .filter(|s| !s.rows.is_empty())
                .map(section)
                .collect();
            if sections.is_empty() {
                warn!(to, "empty list, sending text fallback");
                let fallback = if body.trim().is_empty() {
                    EMPTY_LIST_FALLBACK
                } else {
                    body.as_str()
                };
                return text(to, fallback);
            }
            interactive_message(
                to,
                json!({
                    "type": "list",
                    "header": { "type": "text", "text": header.as_deref().unwrap_or(DEFAULT_LIST_HEADER) },
                    "body": { "text": body },
                    "footer": { "text": footer.as_deref().unwrap_or(DEFAULT_LIST_FOOTER) },
                    "action": {
                        "button": button.as_deref().unwrap_or(DEFAULT_LIST_BUTTON),
                        "sections": sections,
                    },
                }),
            )
        },
    }
}

fn text(to: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "text",
        "text": { "body": body },
    })
}

fn interactive_message(to: &str, interactive: Value) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": to,
        "type": "interactive",
        "interactive": interactive,
    })
}

fn section(section: &ListSection) -> Value {
    let rows: Vec<Value> = section.rows.iter().map(row).collect();
    let mut value = json!({ "rows": rows });
    if let Some(title) = &section.title
        && let Some(obj) = value.as_object_mut()
    {
        obj.insert("title".into(), Value::String(title.clone()));
    }
    value
}

fn row(option: &InteractiveOption) -> Value {
    let mut value = json!({ "id": option.id, "title": option.title });
    if let Some(description) = &option.description
        && let Some(obj) = value.as_object_mut()
    {
        obj.insert("description".into(), Value::String(description.clone()));
    }
    value
}
