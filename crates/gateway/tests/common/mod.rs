//! Shared harness: a gateway on an ephemeral port with file-backed tenant
//! databases in a temp dir and a recording transport.

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use {
    parley_channels::{ChannelOutbound, RecordingOutbound},
    parley_common::types::TenantKey,
    parley_config::ParleyConfig,
    parley_gateway::{
        Dispatcher, DispatcherOptions, GatewayState, build_gateway_app,
    },
    parley_store::{NewRule, RuleStore},
    parley_tenants::{ConnectionRouter, RouterOptions, SqliteTenantRegistry, TenantRegistry},
    tokio::net::TcpListener,
};

pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: Arc<GatewayState>,
    pub outbound: Arc<RecordingOutbound>,
    pub http: reqwest::Client,
    _dir: tempfile::TempDir,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        self.state.router()
    }

    pub async fn add_rules(&self, tenant: &str, rules: Vec<NewRule>) {
        let handle = self
            .router()
            .get(&TenantKey::parse(tenant).unwrap())
            .await
            .unwrap();
        let store = handle.rules();
        for rule in rules {
            store.create_rule(rule).await.unwrap();
        }
    }
}

pub fn config(dir: &tempfile::TempDir) -> ParleyConfig {
    let mut config = ParleyConfig::default();
    config.registry.data_dir = Some(dir.path().to_path_buf());
    config.transcription.enabled = false;
    config.metrics.enabled = false;
    config
}

/// Registry under `config`'s data dir with the default tenant registered.
pub async fn registry(config: &ParleyConfig) -> Arc<dyn TenantRegistry> {
    let default = TenantKey::parse(&config.registry.default_tenant).unwrap();
    let registry = SqliteTenantRegistry::open(&config.registry_database_url(), default.clone())
        .await
        .unwrap()
        .with_auto_select_single(config.registry.auto_select_single);
    registry
        .ensure_default_registered("Default", &config.default_store_location(default.as_str()))
        .await
        .unwrap();
    Arc::new(registry)
}

pub async fn start(customize: impl FnOnce(&mut ParleyConfig)) -> TestGateway {
    start_with(customize, |d| d).await
}

/// Like [`start`], with a hook to finish the dispatcher (e.g. attach a
/// transcription pipeline).
pub async fn start_with(
    customize: impl FnOnce(&mut ParleyConfig),
    finish: impl FnOnce(Dispatcher) -> Dispatcher,
) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(&dir);
    customize(&mut config);

    let registry = registry(&config).await;
    let router = Arc::new(ConnectionRouter::new(registry, RouterOptions::from(&config.router)));
    let outbound = Arc::new(RecordingOutbound::new());
    let dispatcher = finish(Dispatcher::new(
        Arc::clone(&router),
        Arc::clone(&outbound) as Arc<dyn ChannelOutbound>,
        DispatcherOptions::from_config(&config.sessions),
    ));
    let state = Arc::new(GatewayState::new(Arc::new(config), Arc::new(dispatcher)));

    let app = build_gateway_app(Arc::clone(&state));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestGateway {
        addr,
        state,
        outbound,
        http: reqwest::Client::new(),
        _dir: dir,
    }
}

pub fn text_rule(step: &str, spec: &str, next: &str, body: &str) -> NewRule {
    NewRule::new(step, spec, next)
        .with_response(parley_common::types::ResponseSpec::text(body))
}
