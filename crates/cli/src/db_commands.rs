use {
    anyhow::Context,
    clap::Subcommand,
    parley_common::types::TenantKey,
    parley_config::ParleyConfig,
    parley_tenants::{Tenant, TenantRegistry, open_tenant_store},
};

use crate::open_registry;

#[derive(Subcommand)]
pub enum DbAction {
    /// Bring tenant databases up to the current schema (all tenants when omitted).
    Migrate { tenant: Option<String> },
}

pub async fn handle_db(action: DbAction, config: &ParleyConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Migrate { tenant } => run_migrations(config, tenant.as_deref()).await,
    }
}

/// The registry schema is migrated on open; tenant stores are migrated one
/// by one so a broken location does not hide the others.
async fn run_migrations(config: &ParleyConfig, tenant: Option<&str>) -> anyhow::Result<()> {
    let registry = open_registry(config).await?;
    println!("Registry ready at {}", config.registry_database_url());

    let tenants: Vec<Tenant> = match tenant {
        Some(raw) => {
            let key = TenantKey::parse(raw)?;
            let tenant = registry
                .get(&key)
                .await?
                .with_context(|| format!("tenant '{key}' is not registered"))?;
            vec![tenant]
        },
        None => registry.list().await?,
    };

    let mut failed = 0usize;
    for tenant in &tenants {
        match open_tenant_store(&tenant.store_location, 1).await {
            Ok(pool) => {
                pool.close().await;
                println!("  - {} migrations complete", tenant.key);
            },
            Err(e) => {
                failed += 1;
                eprintln!("  - {} failed: {e}", tenant.key);
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} tenant database(s) failed to migrate", tenants.len());
    }
    println!("All migrations complete.");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, parley_tenants::TenantRegistration};

    fn config(dir: &std::path::Path) -> ParleyConfig {
        let mut config = ParleyConfig::default();
        config.registry.data_dir = Some(dir.to_path_buf());
        config
    }

    #[tokio::test]
    async fn migrates_every_registered_tenant() {
        let temp = tempfile::tempdir().unwrap();
        let config = config(temp.path());
        let registry = open_registry(&config).await.unwrap();
        registry
            .register(TenantRegistration {
                key: TenantKey::parse("acme").unwrap(),
                display_name: None,
                store_location: config.default_store_location("acme"),
                metadata: None,
            })
            .await
            .unwrap();

        handle_db(DbAction::Migrate { tenant: None }, &config)
            .await
            .unwrap();

        // Running twice is a no-op.
        handle_db(
            DbAction::Migrate {
                tenant: Some("acme".into()),
            },
            &config,
        )
        .await
        .unwrap();

        let pool = open_tenant_store(&config.default_store_location("acme"), 1)
            .await
            .unwrap();
        let _: (i64,) = sqlx::query_as("SELECT count(*) FROM rules")
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn unknown_tenant_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        let config = config(temp.path());
        let err = handle_db(
            DbAction::Migrate {
                tenant: Some("ghost".into()),
            },
            &config,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
