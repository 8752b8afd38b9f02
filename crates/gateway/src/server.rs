use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, State},
        response::IntoResponse,
        routing::{get, post, put},
    },
    parley_channels::{ChannelOutbound, FsMediaStore, LogOutbound, MediaStore},
    parley_common::types::TenantKey,
    parley_config::ParleyConfig,
    parley_tenants::{ConnectionRouter, RouterOptions, SqliteTenantRegistry, TenantRegistry},
    parley_voice::{
        FfmpegNormalizer, PipelineDeps, PipelineOptions, TranscriptionPipeline, WhisperCliStt,
    },
    parley_whatsapp::{CredentialSource, GraphClient, WhatsAppMediaStore, WhatsAppOutbound},
    serde_json::json,
    tower_http::{
        catch_panic::CatchPanicLayer,
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{MetricsRecorderConfig, init_metrics};

use crate::{
    api_routes::*,
    dispatcher::{Dispatcher, DispatcherOptions},
    sink::StoreTranscriptSink,
    state::{AppState, GatewayState},
    webhook_routes::{receive_handler, verify_handler},
};

/// Webhook and API bodies are small JSON documents.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app_state = AppState { gateway: state };

    let protected = Router::new()
        .route("/api/inbound", post(inbound_handler))
        .route(
            "/api/tenants",
            get(list_tenants_handler).post(register_tenant_handler),
        )
        .route("/api/tenants/{key}", get(get_tenant_handler))
        .route("/api/tenants/{key}/contacts", get(list_contacts_handler))
        .route(
            "/api/tenants/{key}/contacts/{external_id}",
            get(get_contact_handler).delete(delete_contact_handler),
        )
        .route(
            "/api/tenants/{key}/contacts/{external_id}/alias",
            put(set_alias_handler),
        )
        .route(
            "/api/tenants/{key}/contacts/{external_id}/messages",
            get(list_messages_handler),
        )
        .route(
            "/api/tenants/{key}/rules",
            get(list_rules_handler).post(create_rule_handler),
        )
        .route(
            "/api/tenants/{key}/rules/{id}",
            put(update_rule_handler).delete(delete_rule_handler),
        )
        .route(
            "/api/tenants/{key}/commands",
            get(list_commands_handler).post(upsert_command_handler),
        )
        .route(
            "/api/tenants/{key}/commands/{keyword}",
            axum::routing::delete(delete_command_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            crate::auth_middleware::require_api_token,
        ));

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/webhook", get(verify_handler).post(receive_handler))
        .merge(protected);

    #[cfg(feature = "prometheus")]
    let router = router.route(
        "/metrics",
        get(crate::metrics_routes::prometheus_metrics_handler),
    );

    #[cfg(feature = "metrics")]
    let router = router.layer(axum::middleware::from_fn(
        crate::metrics_middleware::http_metrics_middleware,
    ));

    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .with_state(app_state)
}

/// Wire the registry, router, delivery layer and transcription pipeline from
/// `config`.
pub async fn build_gateway_state(config: Arc<ParleyConfig>) -> anyhow::Result<GatewayState> {
    let default_key = TenantKey::parse(&config.registry.default_tenant)?;
    let registry_url = config.registry_database_url();
    let registry = SqliteTenantRegistry::open(&registry_url, default_key.clone())
        .await?
        .with_auto_select_single(config.registry.auto_select_single);
    let default_tenant = registry
        .ensure_default_registered(
            &config.registry.default_tenant_name,
            &config.default_store_location(default_key.as_str()),
        )
        .await?;
    info!(registry = %registry_url, default_tenant = %default_tenant.key, "tenant registry ready");
    let registry: Arc<dyn TenantRegistry> = Arc::new(registry);

    let router = Arc::new(ConnectionRouter::new(
        Arc::clone(&registry),
        RouterOptions::from(&config.router),
    ));
    let sweep_every = Duration::from_secs(config.router.sweep_interval_secs.max(1));
    let _sweeper = router.spawn_sweeper(sweep_every);

    let media_cache = FsMediaStore::new(config.media_dir());
    let (outbound, media): (Arc<dyn ChannelOutbound>, Arc<dyn MediaStore>) =
        if config.whatsapp.is_configured() {
            let client = GraphClient::new(&config.whatsapp)?;
            let credentials = Arc::new(CredentialSource::new(
                Arc::clone(&registry),
                &config.whatsapp,
            ));
            info!(api_version = %config.whatsapp.api_version, "whatsapp delivery enabled");
            (
                Arc::new(WhatsAppOutbound::new(client.clone(), Arc::clone(&credentials))),
                Arc::new(WhatsAppMediaStore::new(media_cache, client, credentials)),
            )
        } else {
            warn!("whatsapp is not configured, responses are only logged");
            (Arc::new(LogOutbound), Arc::new(media_cache))
        };

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&router),
        outbound,
        DispatcherOptions::from_config(&config.sessions),
    );
    if let Some(pipeline) = start_transcription(&config, &router, media) {
        dispatcher = dispatcher.with_transcription(Arc::new(pipeline));
    }

    let state = GatewayState::new(Arc::clone(&config), Arc::new(dispatcher));

    #[cfg(feature = "metrics")]
    let state = {
        let handle = init_metrics(MetricsRecorderConfig {
            enabled: config.metrics.enabled,
            global_labels: vec![("service".to_string(), "parley".to_string())],
        })?;
        state.with_metrics_handle(handle)
    };

    Ok(state)
}

fn start_transcription(
    config: &ParleyConfig,
    router: &Arc<ConnectionRouter>,
    media: Arc<dyn MediaStore>,
) -> Option<TranscriptionPipeline> {
    let tx = &config.transcription;
    if !tx.enabled {
        info!("transcription disabled");
        return None;
    }
    let Some(normalizer) = FfmpegNormalizer::locate(tx.ffmpeg_path.as_deref()) else {
        warn!("ffmpeg not found, voice notes will not be transcribed");
        return None;
    };
    let stt = WhisperCliStt::new(
        tx.whisper_path.clone(),
        tx.model_path.clone(),
        tx.language.clone(),
    );
    let pipeline = TranscriptionPipeline::start(PipelineOptions::from(tx), PipelineDeps {
        media,
        normalizer: Arc::new(normalizer),
        stt: Arc::new(stt),
        sink: Arc::new(StoreTranscriptSink::new(Arc::clone(router))),
    });
    info!(workers = tx.workers, backlog = tx.backlog, "transcription pipeline started");
    Some(pipeline)
}

/// Serve until `shutdown` resolves, then drain the transcription workers and
/// close every tenant pool.
pub async fn start_gateway(
    config: ParleyConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let state = Arc::new(build_gateway_state(Arc::clone(&config)).await?);
    let app = build_gateway_app(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        %addr,
        version = state.version,
        api_auth = config.server.api_token.is_some(),
        "parley gateway listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("shutting down");
    if let Some(pipeline) = state.dispatcher.transcription() {
        pipeline.shutdown().await;
    }
    state.router().close_all().await;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let gateway = &state.gateway;
    Json(json!({
        "status": "ok",
        "version": gateway.version,
        "open_tenants": gateway.router().cached_tenants().len(),
        "active_sessions": gateway.dispatcher.gate().active_sessions(),
        "transcription": gateway.dispatcher.transcription().is_some(),
    }))
}
