//! Tenant-wide keywords that preempt the step rules.
//!
//! A command matches only when the whole normalized message equals its
//! keyword. Tables are cached per tenant for a bounded time and dropped with
//! [`CommandInterceptor::invalidate`] after an edit made through this
//! process.

use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use {
    dashmap::DashMap,
    parley_common::{text::normalize_text, types::TenantKey},
    parley_store::{Contact, GlobalCommand, RuleStore},
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, labels, rules as rule_metrics};

use crate::{
    INITIAL_STEP,
    book::RuleBook,
    engine::{Emission, RuleEngine},
    error::Result,
};

/// What a global command does to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandAction {
    /// Back to the initial step, then the welcome flow.
    Restart,
    /// Back to the initial step without replying.
    CloseSession,
    /// Raise the advisor flag so a human takes over.
    Handoff,
}

impl CommandAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Restart => "restart",
            Self::CloseSession => "close_session",
            Self::Handoff => "handoff",
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(Self::Restart),
            "close_session" | "close" => Ok(Self::CloseSession),
            "handoff" | "advisor" => Ok(Self::Handoff),
            other => Err(format!("unknown command handler: {other}")),
        }
    }
}

/// Normalized keyword to action, for one tenant.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: HashMap<String, CommandAction>,
}

impl CommandTable {
    pub fn from_commands(rows: Vec<GlobalCommand>) -> Self {
        let mut commands = HashMap::with_capacity(rows.len());
        for row in rows {
            match row.handler.parse::<CommandAction>() {
                Ok(action) => {
                    commands.insert(normalize_text(&row.keyword), action);
                },
                Err(e) => warn!(keyword = %row.keyword, error = %e, "skipping global command"),
            }
        }
        Self { commands }
    }

    pub fn lookup(&self, text: &str) -> Option<CommandAction> {
        self.commands.get(&normalize_text(text)).copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Session changes produced by a handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEffect {
    pub action: CommandAction,
    pub keyword: String,
    pub next_step: String,
    pub advisor_flag: bool,
    pub emissions: Vec<Emission>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    Handled(CommandEffect),
    NotMatched,
}

/// Cache entry for one tenant. The generation moves on every invalidation so
/// a load that raced with one is never stored.
#[derive(Default)]
struct CacheSlot {
    generation: u64,
    table: Option<(Arc<CommandTable>, Instant)>,
}

pub struct CommandInterceptor {
    tables: DashMap<TenantKey, CacheSlot>,
    ttl: Duration,
    restart_notice: String,
}

impl CommandInterceptor {
    pub fn new(restart_notice: impl Into<String>) -> Self {
        Self {
            tables: DashMap::new(),
            ttl: Duration::from_secs(60),
            restart_notice: restart_notice.into(),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Cached table for `tenant`, loaded from `store` when absent or older
    /// than the TTL.
    pub async fn table(&self, tenant: &TenantKey, store: &dyn RuleStore) -> Result<Arc<CommandTable>> {
        let generation = match self.tables.get(tenant) {
            Some(slot) => {
                if let Some((table, loaded_at)) = &slot.table
                    && loaded_at.elapsed() < self.ttl
                {
                    return Ok(Arc::clone(table));
                }
                slot.generation
            },
            None => 0,
        };

        let table = Arc::new(CommandTable::from_commands(store.list_commands().await?));
        debug!(tenant = %tenant, commands = table.len(), "loaded global commands");

        let mut slot = self.tables.entry(tenant.clone()).or_default();
        if slot.generation == generation {
            slot.table = Some((Arc::clone(&table), Instant::now()));
        } else {
            debug!(tenant = %tenant, "global commands changed while loading, not cached");
        }
        Ok(table)
    }

    pub fn invalidate(&self, tenant: &TenantKey) {
        let mut slot = self.tables.entry(tenant.clone()).or_default();
        slot.generation += 1;
        if slot.table.take().is_some() {
            debug!(tenant = %tenant, "global command table invalidated");
        }
    }

    /// Check `text` against the tenant's commands. Runs before rule
    /// evaluation; a handled command skips the step rules for this message.
    pub async fn try_handle(
        &self,
        contact: &Contact,
        text: &str,
        store: &dyn RuleStore,
        book: &RuleBook,
        engine: &RuleEngine,
    ) -> Result<Interception> {
        let table = self.table(&contact.tenant_key, store).await?;
        let Some(action) = table.lookup(text) else {
            return Ok(Interception::NotMatched);
        };

        info!(
            tenant = %contact.tenant_key,
            contact = %contact.external_id,
            %action,
            "global command"
        );
        #[cfg(feature = "metrics")]
        counter!(
            rule_metrics::COMMANDS_TOTAL,
            labels::TENANT => contact.tenant_key.to_string(),
            labels::HANDLER => action.as_str()
        )
        .increment(1);

        let keyword = normalize_text(text);
        let effect = match action {
            CommandAction::Restart => {
                let welcome = engine.welcome(book);
                let mut emissions = vec![Emission::notice(&self.restart_notice, INITIAL_STEP)];
                emissions.extend(welcome.emissions);
                CommandEffect {
                    action,
                    keyword,
                    next_step: welcome.next_step,
                    advisor_flag: false,
                    emissions,
                }
            },
            CommandAction::CloseSession => CommandEffect {
                action,
                keyword,
                next_step: INITIAL_STEP.to_string(),
                advisor_flag: false,
                emissions: Vec::new(),
            },
            CommandAction::Handoff => CommandEffect {
                action,
                keyword,
                next_step: contact.current_step.clone(),
                advisor_flag: true,
                emissions: Vec::new(),
            },
        };
        Ok(Interception::Handled(effect))
    }
}
