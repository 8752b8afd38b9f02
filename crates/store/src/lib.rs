//! Per-tenant persistence: contacts, message history, step rules and global
//! commands.
//!
//! Every table lives in exactly one tenant database. Nothing here knows about
//! other tenants; the connection router hands out a pool per tenant and these
//! stores are built on top of it.

pub mod conversation;
pub mod error;
pub mod model;
pub mod rule_store;

pub use {
    conversation::{ConversationStore, SqliteConversationStore},
    error::{Error, Result},
    model::{
        Contact, Direction, GlobalCommand, Message, NewMessage, NewRule, Rule, TranscriptionStatus,
        TurnCommit, TurnRecord,
    },
    rule_store::{RuleStore, SqliteRuleStore},
};

/// Run the tenant schema migrations on a freshly opened pool.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
