//! Step rules, next-step chains and global commands.
//!
//! Everything in here is evaluated against an in-memory snapshot
//! ([`RuleBook`]); loading and persisting are the caller's job.

pub mod book;
pub mod commands;
pub mod engine;
pub mod error;
pub mod matching;
pub mod steps;

pub use {
    book::RuleBook,
    commands::{CommandAction, CommandEffect, CommandInterceptor, CommandTable, Interception},
    engine::{EngineOptions, Emission, RuleEngine, Transition, Turn, TurnKind},
    error::{Error, Result, RuleConfigurationError},
    matching::{MatchSpec, WILDCARD, WildcardPolicy, select_rule},
    steps::{expand_steps, step_chain},
};

/// Step assigned to new contacts and to sessions that expired or restarted.
pub const INITIAL_STEP: &str = "menu_principal";

/// Synthetic input evaluated at [`INITIAL_STEP`] to produce the welcome.
pub const WELCOME_TRIGGER: &str = "iniciar";
