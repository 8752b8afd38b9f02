/// Config schema types (server, registry, router, sessions, transcription,
/// whatsapp, metrics).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    pub router: RouterConfig,
    pub sessions: SessionsConfig,
    pub transcription: TranscriptionConfig,
    pub whatsapp: WhatsAppConfig,
    pub metrics: MetricsConfig,
}

impl ParleyConfig {
    /// Data directory: explicit `registry.data_dir`, else the platform default.
    pub fn data_dir(&self) -> PathBuf {
        self.registry
            .data_dir
            .clone()
            .unwrap_or_else(crate::loader::default_data_dir)
    }

    /// Master registry database URL.
    pub fn registry_database_url(&self) -> String {
        match &self.registry.database_url {
            Some(url) => url.clone(),
            None => format!("sqlite://{}", self.data_dir().join("parley.db").display()),
        }
    }

    /// Store location assigned to a tenant registered without an explicit one.
    pub fn default_store_location(&self, tenant_key: &str) -> String {
        format!(
            "sqlite://{}",
            self.data_dir()
                .join("tenants")
                .join(format!("{tenant_key}.db"))
                .display()
        )
    }

    /// Root directory for per-tenant media files.
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir().join("media")
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
    /// Bearer token required on `/api/*` when set.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_token: Option<Secret<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            api_token: None,
        }
    }
}

/// Tenant registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Master database URL. Defaults to `sqlite://<data_dir>/parley.db`.
    pub database_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    /// Tenant used when an inbound event carries no key.
    pub default_tenant: String,
    pub default_tenant_name: String,
    /// Request header carrying the tenant key.
    pub tenant_header: String,
    /// Use the only registered tenant when no key is supplied.
    pub auto_select_single: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            data_dir: None,
            default_tenant: "default".into(),
            default_tenant_name: "Default".into(),
            tenant_header: "x-tenant-key".into(),
            auto_select_single: true,
        }
    }
}

/// Per-tenant connection router.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Close handles unused for this long.
    pub idle_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Pool size per tenant.
    pub max_connections: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 900,
            sweep_interval_secs: 60,
            connect_timeout_secs: 10,
            max_retries: 3,
            backoff_base_ms: 200,
            max_connections: 5,
        }
    }
}

/// Session gate and conversation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Inactivity after which a contact returns to the initial step.
    pub inactivity_timeout_secs: u64,
    pub lock_timeout_secs: u64,
    pub critical_section_timeout_secs: u64,
    /// Flag the contact for a human advisor when no rule matches.
    pub advisor_on_no_match: bool,
    /// Sent before the welcome message when a session expired.
    pub timeout_notice: String,
    /// Sent by the restart command before the welcome message.
    pub restart_notice: String,
    /// How long a tenant's global command table is reused before it is read
    /// again. Picks up edits made by other processes. `0` reads every time.
    pub command_cache_ttl_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 600,
            lock_timeout_secs: 10,
            critical_section_timeout_secs: 15,
            advisor_on_no_match: false,
            timeout_notice: "Tu sesión se cerró por inactividad.".into(),
            restart_notice: "Perfecto, volvamos a empezar.".into(),
            command_cache_ttl_secs: 60,
        }
    }
}

/// Background voice transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub enabled: bool,
    pub workers: usize,
    /// Jobs allowed to wait for a free worker before submissions are rejected.
    pub backlog: usize,
    pub job_timeout_secs: u64,
    /// Clips longer than this are not transcribed.
    pub max_duration_ms: u64,
    pub ffmpeg_path: Option<String>,
    pub whisper_path: Option<String>,
    pub model_path: Option<String>,
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: 2,
            backlog: 32,
            job_timeout_secs: 120,
            max_duration_ms: 300_000,
            ffmpeg_path: None,
            whisper_path: None,
            model_path: None,
            language: Some("es".into()),
        }
    }
}

/// WhatsApp Cloud API delivery layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Token echoed back during webhook subscription.
    pub verify_token: Option<String>,
    /// App secret used to check `X-Hub-Signature-256`.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub app_secret: Option<Secret<String>>,
    /// Fallback access token for tenants without their own.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<Secret<String>>,
    pub phone_number_id: Option<String>,
    pub api_version: String,
    pub graph_base_url: String,
}

impl WhatsAppConfig {
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() || self.verify_token.is_some()
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            verify_token: None,
            app_secret: None,
            access_token: None,
            phone_number_id: None,
            api_version: "v19.0".into(),
            graph_base_url: "https://graph.facebook.com".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = ParleyConfig::default();
        assert_eq!(cfg.sessions.inactivity_timeout_secs, 600);
        assert_eq!(cfg.registry.default_tenant, "default");
        assert_eq!(cfg.whatsapp.api_version, "v19.0");
        assert!(!cfg.sessions.advisor_on_no_match);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
            [transcription]
            workers = 4

            [registry]
            data_dir = "/tmp/parley-test"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.transcription.workers, 4);
        assert_eq!(cfg.transcription.backlog, 32);
        assert_eq!(
            cfg.registry_database_url(),
            "sqlite:///tmp/parley-test/parley.db"
        );
        assert_eq!(
            cfg.default_store_location("acme"),
            "sqlite:///tmp/parley-test/tenants/acme.db"
        );
    }

    #[test]
    fn secrets_are_serialized_in_plain_text_for_saving() {
        let mut cfg = ParleyConfig::default();
        cfg.whatsapp.app_secret = Some(Secret::new("s3cret".into()));
        let out = toml::to_string(&cfg).unwrap();
        assert!(out.contains("s3cret"));
    }
}
