mod config_commands;
mod db_commands;
mod rule_commands;
mod tenant_commands;

use std::path::PathBuf;

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    parley_common::types::TenantKey,
    parley_config::ParleyConfig,
    parley_tenants::SqliteTenantRegistry,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "parley", about = "Parley, multi-tenant conversational automation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./parley.toml and the user config dir).
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,
    /// Data directory for the registry, tenant databases and media.
    #[arg(long, global = true, env = "PARLEY_DATA_DIR")]
    data_dir: Option<PathBuf>,
    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    bind: Option<String>,
    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (default when no subcommand is provided).
    Gateway,
    /// Tenant registry management.
    Tenants {
        #[command(subcommand)]
        action: tenant_commands::TenantAction,
    },
    /// Step rules of one tenant.
    Rules {
        #[command(subcommand)]
        action: rule_commands::RuleAction,
    },
    /// Database management.
    Db {
        #[command(subcommand)]
        action: db_commands::DbAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Config from `--config` or discovery, with command-line overrides applied.
fn load_config(cli: &Cli) -> anyhow::Result<ParleyConfig> {
    let mut config = match &cli.config {
        Some(path) => parley_config::load_config(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => parley_config::discover_and_load(),
    };
    if let Some(dir) = &cli.data_dir {
        config.registry.data_dir = Some(dir.clone());
    }
    if let Some(bind) = &cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

/// Open the master registry described by `config` and make sure the default
/// tenant exists.
pub(crate) async fn open_registry(config: &ParleyConfig) -> anyhow::Result<SqliteTenantRegistry> {
    let default_key = TenantKey::parse(&config.registry.default_tenant)?;
    let url = config.registry_database_url();
    let registry = SqliteTenantRegistry::open(&url, default_key.clone())
        .await
        .with_context(|| format!("opening tenant registry at {url}"))?
        .with_auto_select_single(config.registry.auto_select_single);
    registry
        .ensure_default_registered(
            &config.registry.default_tenant_name,
            &config.default_store_location(default_key.as_str()),
        )
        .await?;
    Ok(registry)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;

    match cli.command {
        None | Some(Commands::Gateway) => {
            info!(version = env!("CARGO_PKG_VERSION"), "parley starting");
            parley_gateway::start_gateway(config, shutdown_signal()).await
        },
        Some(Commands::Tenants { action }) => tenant_commands::handle_tenants(action, &config).await,
        Some(Commands::Rules { action }) => rule_commands::handle_rules(action, &config).await,
        Some(Commands::Db { action }) => db_commands::handle_db(action, &config).await,
        Some(Commands::Config { action }) => config_commands::handle_config(action, cli.config),
    }
}
