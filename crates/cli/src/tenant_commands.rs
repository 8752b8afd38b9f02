use {
    anyhow::{Context, Result},
    clap::Subcommand,
    parley_common::types::TenantKey,
    parley_config::ParleyConfig,
    parley_tenants::{Tenant, TenantRegistration, TenantRegistry},
};

use crate::open_registry;

#[derive(Subcommand)]
pub enum TenantAction {
    /// Register a tenant or update its name and metadata.
    Register {
        key: String,
        /// Database location, e.g. `sqlite:///var/lib/parley/acme.db`.
        /// Defaults to a file under the data directory.
        location: Option<String>,
        /// Display name.
        #[arg(long)]
        name: Option<String>,
        /// Metadata as a JSON object.
        #[arg(long)]
        metadata: Option<String>,
    },
    /// List registered tenants.
    List,
    /// Show which tenant a key (or no key) resolves to.
    Resolve { key: Option<String> },
}

pub async fn handle_tenants(action: TenantAction, config: &ParleyConfig) -> Result<()> {
    let registry = open_registry(config).await?;
    match action {
        TenantAction::Register {
            key,
            location,
            name,
            metadata,
        } => {
            let key = TenantKey::parse(&key)?;
            let metadata = metadata
                .as_deref()
                .map(parse_metadata)
                .transpose()?;
            let store_location =
                location.unwrap_or_else(|| config.default_store_location(key.as_str()));
            let tenant = registry
                .register(TenantRegistration {
                    key,
                    display_name: name,
                    store_location,
                    metadata,
                })
                .await?;
            println!("Registered {}", describe(&tenant));
        },
        TenantAction::List => {
            let tenants = registry.list().await?;
            if tenants.is_empty() {
                println!("No tenants registered.");
            }
            for tenant in &tenants {
                let marker = if &tenant.key == registry.default_key() {
                    " (default)"
                } else {
                    ""
                };
                println!("  {}{marker}", describe(tenant));
            }
        },
        TenantAction::Resolve { key } => {
            let tenant = registry.resolve(key.as_deref()).await?;
            println!("{}", describe(&tenant));
            println!("{}", serde_json::to_string_pretty(&tenant.metadata)?);
        },
    }
    Ok(())
}

fn parse_metadata(raw: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--metadata must be valid JSON")?;
    anyhow::ensure!(value.is_object(), "--metadata must be a JSON object");
    Ok(value)
}

fn describe(tenant: &Tenant) -> String {
    format!(
        "{} \"{}\" -> {}",
        tenant.key, tenant.display_name, tenant.store_location
    )
}
