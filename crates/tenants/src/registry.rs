//! Master registry mapping tenant keys to their isolated store locations.

use std::str::FromStr;

use {
    async_trait::async_trait,
    dashmap::DashMap,
    parley_common::{time::now_ms, types::TenantKey},
    serde::{Deserialize, Serialize},
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::{debug, info},
};

use crate::error::{Error, Result};

/// A registered tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tenant {
    pub key: TenantKey,
    pub display_name: String,
    /// sqlx SQLite URL of the tenant database. Fixed once registered.
    pub store_location: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Tenant {
    /// String value at a dotted path in `metadata`, e.g. `whatsapp.phone_number_id`.
    pub fn metadata_str(&self, path: &str) -> Option<&str> {
        path.split('.')
            .try_fold(&self.metadata, |value, part| value.get(part))
            .and_then(serde_json::Value::as_str)
    }
}

/// Input to [`TenantRegistry::register`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRegistration {
    pub key: TenantKey,
    #[serde(default)]
    pub display_name: Option<String>,
    pub store_location: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Create or update a tenant. Idempotent on the key; the store location
    /// of an existing tenant cannot change.
    async fn register(&self, registration: TenantRegistration) -> Result<Tenant>;

    async fn get(&self, key: &TenantKey) -> Result<Option<Tenant>>;

    /// Resolve an optional raw key. An explicit key that is not registered is
    /// [`Error::TenantNotFound`]; an absent key selects the default tenant.
    async fn resolve(&self, key: Option<&str>) -> Result<Tenant>;

    async fn list(&self) -> Result<Vec<Tenant>>;

    /// Tenant whose metadata holds `value` at the dotted `path`. When several
    /// do, the first by key wins.
    async fn find_by_metadata(&self, path: &str, value: &str) -> Result<Option<Tenant>>;
}

/// JSON path for a dotted metadata path. Only plain identifiers are accepted
/// since the path is spliced into SQL.
fn json_path(path: &str) -> Result<String> {
    let valid = !path.is_empty()
        && path.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !valid {
        return Err(parley_common::Error::invalid("metadata path", format!("{path:?}")).into());
    }
    Ok(format!("$.{path}"))
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    key: String,
    display_name: String,
    store_location: String,
    metadata: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = Error;

    fn try_from(r: TenantRow) -> Result<Self> {
        Ok(Self {
            key: TenantKey::parse(&r.key)?,
            display_name: r.display_name,
            store_location: r.store_location,
            metadata: serde_json::from_str(&r.metadata)?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

/// Open (creating if needed) a SQLite database at `url` with the pool
/// settings every parley database uses.
pub async fn open_sqlite(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    if !url.contains(":memory:")
        && let Some(parent) = options.get_filename().parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            parley_common::Error::message(format!("create {}: {e}", parent.display()))
        })?;
    }
    Ok(SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?)
}

/// SQLite-backed registry with an in-process read cache.
pub struct SqliteTenantRegistry {
    pool: SqlitePool,
    default_key: TenantKey,
    auto_select_single: bool,
    cache: DashMap<TenantKey, Tenant>,
}

impl SqliteTenantRegistry {
    pub fn new(pool: SqlitePool, default_key: TenantKey) -> Self {
        Self {
            pool,
            default_key,
            auto_select_single: true,
            cache: DashMap::new(),
        }
    }

    /// Open the master database at `url` and apply the registry schema.
    pub async fn open(url: &str, default_key: TenantKey) -> Result<Self> {
        let pool = open_sqlite(url, 4).await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool, default_key))
    }

    /// Apply the registry schema.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    #[must_use]
    pub fn with_auto_select_single(mut self, enabled: bool) -> Self {
        self.auto_select_single = enabled;
        self
    }

    pub fn default_key(&self) -> &TenantKey {
        &self.default_key
    }

    /// Register the default tenant unless it already exists.
    pub async fn ensure_default_registered(
        &self,
        display_name: &str,
        store_location: &str,
    ) -> Result<Tenant> {
        if let Some(existing) = self.get(&self.default_key).await? {
            return Ok(existing);
        }
        info!(tenant = %self.default_key, store_location, "registering default tenant");
        self.register(TenantRegistration {
            key: self.default_key.clone(),
            display_name: Some(display_name.to_string()),
            store_location: store_location.to_string(),
            metadata: Some(serde_json::json!({ "source": "default" })),
        })
        .await
    }

    async fn only_tenant(&self) -> Result<Option<Tenant>> {
        let rows = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants LIMIT 2")
            .fetch_all(&self.pool)
            .await?;
        if rows.len() != 1 {
            return Ok(None);
        }
        rows.into_iter().next().map(Tenant::try_from).transpose()
    }
}

#[async_trait]
impl TenantRegistry for SqliteTenantRegistry {
    async fn register(&self, registration: TenantRegistration) -> Result<Tenant> {
        let location = registration.store_location.trim().to_string();
        if location.is_empty() {
            return Err(parley_common::Error::invalid("store location", "must not be empty").into());
        }
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE key = ?")
            .bind(registration.key.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = &existing
            && row.store_location != location
        {
            return Err(Error::StoreLocationImmutable {
                tenant: registration.key,
                existing: row.store_location.clone(),
                requested: location,
            });
        }

        let display_name = registration
            .display_name
            .or_else(|| existing.as_ref().map(|r| r.display_name.clone()))
            .unwrap_or_else(|| registration.key.to_string());
        let metadata = match (registration.metadata, &existing) {
            (Some(m), _) => serde_json::to_string(&m)?,
            (None, Some(row)) => row.metadata.clone(),
            (None, None) => "{}".to_string(),
        };

        sqlx::query(
            r#"INSERT INTO tenants (key, display_name, store_location, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET
                 display_name = excluded.display_name,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at"#,
        )
        .bind(registration.key.as_str())
        .bind(&display_name)
        .bind(&location)
        .bind(&metadata)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE key = ?")
            .bind(registration.key.as_str())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        let tenant = Tenant::try_from(row)?;
        debug!(tenant = %tenant.key, created = existing.is_none(), "tenant registered");
        self.cache.insert(tenant.key.clone(), tenant.clone());
        Ok(tenant)
    }

    async fn get(&self, key: &TenantKey) -> Result<Option<Tenant>> {
        if let Some(hit) = self.cache.get(key) {
            return Ok(Some(hit.clone()));
        }
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE key = ?")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let tenant = row.map(Tenant::try_from).transpose()?;
        if let Some(t) = &tenant {
            self.cache.insert(t.key.clone(), t.clone());
        }
        Ok(tenant)
    }

    async fn resolve(&self, key: Option<&str>) -> Result<Tenant> {
        let raw = key.map(str::trim).filter(|k| !k.is_empty());
        if let Some(raw) = raw {
            let key =
                TenantKey::parse(raw).map_err(|_| Error::TenantNotFound(raw.to_string()))?;
            return self
                .get(&key)
                .await?
                .ok_or_else(|| Error::TenantNotFound(key.to_string()));
        }

        if let Some(tenant) = self.get(&self.default_key).await? {
            return Ok(tenant);
        }
        if self.auto_select_single
            && let Some(only) = self.only_tenant().await?
        {
            debug!(tenant = %only.key, "no tenant key supplied, using the only registered tenant");
            return Ok(only);
        }
        Err(Error::NoDefaultTenant)
    }

    async fn list(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Tenant::try_from).collect()
    }

    async fn find_by_metadata(&self, path: &str, value: &str) -> Result<Option<Tenant>> {
        // The literal path lets SQLite use the expression index.
        let row = sqlx::query_as::<_, TenantRow>(&format!(
            "SELECT * FROM tenants WHERE json_extract(metadata, '{}') = ? ORDER BY key LIMIT 1",
            json_path(path)?
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Tenant::try_from).transpose()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    async fn registry() -> SqliteTenantRegistry {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteTenantRegistry::init(&pool).await.unwrap();
        SqliteTenantRegistry::new(pool, TenantKey::parse("default").unwrap())
    }

    fn registration(key: &str, location: &str) -> TenantRegistration {
        TenantRegistration {
            key: TenantKey::parse(key).unwrap(),
            display_name: None,
            store_location: location.into(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn register_is_idempotent_and_updates_metadata() {
        let reg = registry().await;
        let first = reg
            .register(registration("acme", "sqlite:///tmp/acme.db"))
            .await
            .unwrap();
        assert_eq!(first.display_name, "acme");
        assert_eq!(first.metadata, serde_json::json!({}));

        let mut again = registration("acme", "sqlite:///tmp/acme.db");
        again.display_name = Some("Acme Corp".into());
        again.metadata = Some(serde_json::json!({"whatsapp": {"phone_number_id": "123"}}));
        let second = reg.register(again).await.unwrap();
        assert_eq!(second.display_name, "Acme Corp");
        assert_eq!(second.metadata_str("whatsapp.phone_number_id"), Some("123"));
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(reg.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_location_cannot_move() {
        let reg = registry().await;
        reg.register(registration("acme", "sqlite:///tmp/a.db"))
            .await
            .unwrap();
        let err = reg
            .register(registration("acme", "sqlite:///tmp/b.db"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreLocationImmutable { .. }));
        let tenant = reg.resolve(Some("acme")).await.unwrap();
        assert_eq!(tenant.store_location, "sqlite:///tmp/a.db");
    }

    #[tokio::test]
    async fn explicit_unknown_key_never_falls_back() {
        let reg = registry().await;
        reg.ensure_default_registered("Default", "sqlite:///tmp/d.db")
            .await
            .unwrap();
        let err = reg.resolve(Some("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::TenantNotFound(k) if k == "ghost"));
        let err = reg.resolve(Some("not a key!")).await.unwrap_err();
        assert!(matches!(err, Error::TenantNotFound(_)));
    }

    #[tokio::test]
    async fn absent_key_uses_default() {
        let reg = registry().await;
        reg.register(registration("acme", "sqlite:///tmp/a.db"))
            .await
            .unwrap();
        let default = reg
            .ensure_default_registered("Default", "sqlite:///tmp/d.db")
            .await
            .unwrap();
        assert_eq!(default.metadata_str("source"), Some("default"));
        assert_eq!(reg.resolve(None).await.unwrap().key, default.key);
        assert_eq!(reg.resolve(Some("  ")).await.unwrap().key, default.key);
    }

    #[tokio::test]
    async fn absent_key_selects_only_tenant_without_default() {
        let reg = registry().await;
        assert!(matches!(
            reg.resolve(None).await.unwrap_err(),
            Error::NoDefaultTenant
        ));
        reg.register(registration("solo", "sqlite:///tmp/solo.db"))
            .await
            .unwrap();
        assert_eq!(reg.resolve(None).await.unwrap().key.as_str(), "solo");

        reg.register(registration("second", "sqlite:///tmp/second.db"))
            .await
            .unwrap();
        assert!(reg.resolve(None).await.is_err());
    }

    #[tokio::test]
    async fn ensure_default_keeps_existing_registration() {
        let reg = registry().await;
        reg.ensure_default_registered("Default", "sqlite:///tmp/d.db")
            .await
            .unwrap();
        let again = reg
            .ensure_default_registered("Renamed", "sqlite:///tmp/other.db")
            .await
            .unwrap();
        assert_eq!(again.store_location, "sqlite:///tmp/d.db");
        assert_eq!(again.display_name, "Default");
    }

    #[tokio::test]
    async fn find_by_metadata_matches_nested_value() {
        let reg = registry().await;
        let mut acme = registration("acme", "sqlite:///tmp/acme.db");
        acme.metadata = Some(serde_json::json!({"whatsapp": {"phone_number_id": "PN1"}}));
        reg.register(acme).await.unwrap();
        reg.register(registration("other", "sqlite:///tmp/other.db"))
            .await
            .unwrap();

        let found = reg
            .find_by_metadata("whatsapp.phone_number_id", "PN1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.key.as_str(), "acme");
        assert!(
            reg.find_by_metadata("whatsapp.phone_number_id", "PN2")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn find_by_metadata_rejects_unsafe_paths() {
        let reg = registry().await;
        for path in ["", "whatsapp..id", "x') OR 1=1 --"] {
            let err = reg.find_by_metadata(path, "v").await.unwrap_err();
            assert!(matches!(err, Error::Common(e) if e.is_invalid_input()));
        }
    }
}
