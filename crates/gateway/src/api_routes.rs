//! Management and ingestion API under `/api`.

use {
    axum::{
        Json,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
    },
    parley_common::types::{InboundEvent, TenantKey},
    parley_rules::CommandAction,
    parley_store::{ConversationStore, NewRule, RuleStore},
    parley_tenants::{StoreHandle, Tenant, TenantRegistration},
    serde::Deserialize,
    serde_json::json,
    tracing::info,
};

use crate::{
    dispatcher::DispatchOutcome,
    error::{Error, Result},
    extract::{TenantQuery, requested_tenant},
    state::AppState,
};

const DEFAULT_PAGE: u32 = 50;
const MAX_PAGE: u32 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    /// Message id cursor for history paging.
    #[serde(default)]
    pub before: Option<i64>,
}

impl PageQuery {
    fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterTenantBody {
    pub key: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Defaults to a database file under the data directory.
    #[serde(default)]
    pub store_location: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct AliasBody {
    #[serde(default)]
    pub alias: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandBody {
    pub keyword: String,
    pub handler: String,
}

fn parse_key(raw: &str) -> Result<TenantKey> {
    TenantKey::parse(raw).map_err(|e| Error::bad_request(e.to_string()))
}

async fn tenant(state: &AppState, raw: &str) -> Result<Tenant> {
    let key = parse_key(raw)?;
    state
        .gateway
        .registry()
        .get(&key)
        .await?
        .ok_or_else(|| Error::not_found(format!("tenant {key}")))
}

async fn handle(state: &AppState, raw: &str) -> Result<StoreHandle> {
    let tenant = tenant(state, raw).await?;
    Ok(state.gateway.router().get_for(&tenant).await?)
}

// ── Ingestion ────────────────────────────────────────────────────────────────

/// `POST /api/inbound`: dispatch a normalized event from another delivery
/// layer. The body's `tenant_key` wins over the tenant header and query.
pub async fn inbound_handler(
    State(state): State<AppState>,
    Query(query): Query<TenantQuery>,
    headers: HeaderMap,
    Json(mut event): Json<InboundEvent>,
) -> Result<Json<DispatchOutcome>> {
    if event.tenant_key.as_deref().is_none_or(|k| k.trim().is_empty()) {
        event.tenant_key = requested_tenant(
            &headers,
            &state.gateway.config.registry.tenant_header,
            &query,
        );
    }
    let outcome = state.gateway.dispatcher.dispatch(event).await?;
    Ok(Json(outcome))
}

// ── Tenants ──────────────────────────────────────────────────────────────────

pub async fn list_tenants_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let tenants = state.gateway.registry().list().await?;
    Ok(Json(json!({ "tenants": tenants })))
}

pub async fn register_tenant_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterTenantBody>,
) -> Result<impl IntoResponse> {
    let key = parse_key(&body.key)?;
    let store_location = body
        .store_location
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| state.gateway.config.default_store_location(key.as_str()));
    let registry = state.gateway.registry();
    let existed = registry.get(&key).await?.is_some();
    let tenant = registry
        .register(TenantRegistration {
            key,
            display_name: body.display_name,
            store_location,
            metadata: body.metadata,
        })
        .await?;
    // Pick up edited metadata on the next lookup.
    state.gateway.router().invalidate(&tenant.key).await;
    info!(tenant = %tenant.key, existed, "tenant registered");
    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(tenant)))
}

pub async fn get_tenant_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Tenant>> {
    Ok(Json(tenant(&state, &key).await?))
}

// ── Contacts ─────────────────────────────────────────────────────────────────

pub async fn list_contacts_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let store = handle(&state, &key).await?.conversations();
    let contacts = store
        .list_contacts(page.limit(), page.offset.unwrap_or(0))
        .await?;
    Ok(Json(json!({ "contacts": contacts })))
}

pub async fn get_contact_handler(
    State(state): State<AppState>,
    Path((key, external_id)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let store = handle(&state, &key).await?.conversations();
    let contact = store
        .get_contact(&external_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("contact {external_id}")))?;
    Ok(Json(contact))
}

pub async fn delete_contact_handler(
    State(state): State<AppState>,
    Path((key, external_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let store = handle(&state, &key).await?.conversations();
    if !store.delete_contact(&external_id).await? {
        return Err(Error::not_found(format!("contact {external_id}")));
    }
    info!(tenant = %key, contact = %external_id, "contact deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_alias_handler(
    State(state): State<AppState>,
    Path((key, external_id)): Path<(String, String)>,
    Json(body): Json<AliasBody>,
) -> Result<impl IntoResponse> {
    let store = handle(&state, &key).await?.conversations();
    if !store.set_alias(&external_id, body.alias.as_deref()).await? {
        return Err(Error::not_found(format!("contact {external_id}")));
    }
    let contact = store
        .get_contact(&external_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("contact {external_id}")))?;
    Ok(Json(contact))
}

pub async fn list_messages_handler(
    State(state): State<AppState>,
    Path((key, external_id)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse> {
    let store = handle(&state, &key).await?.conversations();
    let contact = store
        .get_contact(&external_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("contact {external_id}")))?;
    let messages = store
        .list_messages(contact.id, page.before, page.limit())
        .await?;
    Ok(Json(json!({ "contact": contact, "messages": messages })))
}

// ── Rules ────────────────────────────────────────────────────────────────────

pub async fn list_rules_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    let rules = handle(&state, &key).await?.rules().list_rules().await?;
    Ok(Json(json!({ "rules": rules })))
}

pub async fn create_rule_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(rule): Json<NewRule>,
) -> Result<impl IntoResponse> {
    let created = handle(&state, &key).await?.rules().create_rule(rule).await?;
    info!(tenant = %key, rule_id = created.id, step = %created.step, "rule created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_rule_handler(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, i64)>,
    Json(rule): Json<NewRule>,
) -> Result<impl IntoResponse> {
    let updated = handle(&state, &key)
        .await?
        .rules()
        .update_rule(id, rule)
        .await?
        .ok_or_else(|| Error::not_found(format!("rule {id}")))?;
    info!(tenant = %key, rule_id = id, "rule updated");
    Ok(Json(updated))
}

pub async fn delete_rule_handler(
    State(state): State<AppState>,
    Path((key, id)): Path<(String, i64)>,
) -> Result<StatusCode> {
    if !handle(&state, &key).await?.rules().delete_rule(id).await? {
        return Err(Error::not_found(format!("rule {id}")));
    }
    info!(tenant = %key, rule_id = id, "rule deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ── Global commands ──────────────────────────────────────────────────────────

pub async fn list_commands_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse> {
    let commands = handle(&state, &key).await?.rules().list_commands().await?;
    Ok(Json(json!({ "commands": commands })))
}

pub async fn upsert_command_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<impl IntoResponse> {
    let action: CommandAction = body.handler.parse().map_err(Error::BadRequest)?;
    let store = handle(&state, &key).await?;
    let command = store
        .rules()
        .upsert_command(&body.keyword, action.as_str())
        .await?;
    state.gateway.dispatcher.commands().invalidate(store.tenant_key());
    info!(tenant = %key, keyword = %command.keyword, handler = %command.handler, "global command saved");
    Ok(Json(command))
}

pub async fn delete_command_handler(
    State(state): State<AppState>,
    Path((key, keyword)): Path<(String, String)>,
) -> Result<StatusCode> {
    let store = handle(&state, &key).await?;
    if !store.rules().delete_command(&keyword).await? {
        return Err(Error::not_found(format!("command {keyword}")));
    }
    state.gateway.dispatcher.commands().invalidate(store.tenant_key());
    info!(tenant = %key, keyword = %keyword, "global command deleted");
    Ok(StatusCode::NO_CONTENT)
}
