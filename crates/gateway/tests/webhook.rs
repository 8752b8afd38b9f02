//! WhatsApp webhook: subscription handshake, signatures and tenant routing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use {
    common::{start, text_rule},
    parley_common::types::TenantKey,
    parley_store::ConversationStore,
    parley_tenants::TenantRegistration,
    parley_whatsapp::{SIGNATURE_HEADER, sign},
    reqwest::StatusCode,
    secrecy::Secret,
    serde_json::{Value, json},
};

const SECRET: &str = "s3cret";

fn payload(phone_number_id: &str, messages: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": {"display_phone_number": "15550001", "phone_number_id": phone_number_id},
                    "contacts": [{"wa_id": "5215551234", "profile": {"name": "Ana"}}],
                    "messages": messages
                }
            }]
        }]
    }))
    .unwrap()
}

fn text_message(id: &str, body: &str) -> Value {
    json!({"id": id, "from": "5215551234", "type": "text", "text": {"body": body}})
}

async fn post_signed(gw: &common::TestGateway, body: Vec<u8>) -> reqwest::Response {
    let signature = sign(&body, SECRET);
    gw.http
        .post(gw.url("/webhook"))
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn subscription_handshake() {
    let gw = start(|c| c.whatsapp.verify_token = Some("vt".into())).await;

    let resp = gw
        .http
        .get(gw.url("/webhook?hub.mode=subscribe&hub.verify_token=vt&hub.challenge=1158201444"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "1158201444");

    let resp = gw
        .http
        .get(gw.url("/webhook?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn handshake_without_configured_token_is_forbidden() {
    let gw = start(|_| {}).await;
    let resp = gw
        .http
        .get(gw.url("/webhook?hub.mode=subscribe&hub.verify_token=&hub.challenge=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unsigned_or_tampered_bodies_are_rejected() {
    let gw = start(|c| c.whatsapp.app_secret = Some(Secret::new(SECRET.into()))).await;
    let body = payload("PN1", json!([text_message("wamid.1", "hola")]));

    let resp = gw
        .http
        .post(gw.url("/webhook"))
        .header("content-type", "application/json")
        .body(body.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = gw
        .http
        .post(gw.url("/webhook"))
        .header(SIGNATURE_HEADER, sign(b"something else", SECRET))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(gw.outbound.sent().is_empty());
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let gw = start(|c| c.whatsapp.app_secret = Some(Secret::new(SECRET.into()))).await;
    let resp = post_signed(&gw, b"{not json".to_vec()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_is_dispatched_in_order_and_redeliveries_dropped() {
    let gw = start(|c| c.whatsapp.app_secret = Some(Secret::new(SECRET.into()))).await;
    gw.add_rules("default", vec![
        text_rule("menu_principal", "iniciar", "opciones", "Bienvenido"),
        text_rule("opciones", "1", "uno", "Elegiste uno"),
        text_rule("uno", "2", "dos", "Elegiste dos"),
        text_rule("dos", "*", "", "Listo"),
    ])
    .await;

    let body = payload("PN1", json!([
        text_message("wamid.1", "iniciar"),
        text_message("wamid.2", "1"),
        text_message("wamid.3", "2"),
        {"id": "wamid.4", "from": "5215551234", "type": "sticker", "sticker": {"id": "S1"}}
    ]));
    let resp = post_signed(&gw, body.clone()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let summary: Value = resp.json().await.unwrap();
    assert_eq!(summary["processed"], 3);
    assert_eq!(summary["failed"], 0);
    assert_eq!(gw.outbound.bodies_to("5215551234"), vec![
        "Bienvenido",
        "Elegiste uno",
        "Elegiste dos"
    ]);

    // The provider retries the same delivery.
    let resp = post_signed(&gw, body).await;
    let summary: Value = resp.json().await.unwrap();
    assert_eq!(summary["processed"], 0);
    assert_eq!(summary["duplicates"], 3);
    assert_eq!(gw.outbound.sent().len(), 3);

    let handle = gw
        .router()
        .get(&TenantKey::parse("default").unwrap())
        .await
        .unwrap();
    let contact = handle
        .conversations()
        .get_contact("5215551234")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contact.current_step, "dos");
}

#[tokio::test]
async fn phone_number_id_selects_the_tenant() {
    let gw = start(|_| {}).await;
    let dir = tempfile::tempdir().unwrap();
    gw.state
        .registry()
        .register(TenantRegistration {
            key: TenantKey::parse("acme").unwrap(),
            display_name: Some("Acme".into()),
            store_location: format!("sqlite://{}", dir.path().join("acme.db").display()),
            metadata: Some(json!({"whatsapp": {"phone_number_id": "PN-ACME"}})),
        })
        .await
        .unwrap();
    gw.add_rules("acme", vec![
        text_rule("menu_principal", "iniciar", "acme_menu", "Hola desde Acme"),
        text_rule("acme_menu", "*", "", "Acme"),
    ])
    .await;

    let resp = gw
        .http
        .post(gw.url("/webhook"))
        .body(payload("PN-ACME", json!([text_message("wamid.9", "iniciar")])))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let sent = gw.outbound.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tenant.as_str(), "acme");

    let default = gw
        .router()
        .get(&TenantKey::parse("default").unwrap())
        .await
        .unwrap();
    assert!(
        default
            .conversations()
            .get_contact("5215551234")
            .await
            .unwrap()
            .is_none()
    );
}
