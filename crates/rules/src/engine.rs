//! The per-contact conversation state machine.
//!
//! Each tenant-defined step is a state. An inbound message at step `S` is
//! matched against the rules of `S` in `(priority, id)` order and the first
//! match wins. The winning rule's next-step spec (or the step carried by the
//! interactive option the contact picked) is expanded into a chain; every
//! intermediate step contributes its wildcard response and only the last
//! step is returned for persistence.

use {
    parley_common::{
        text::normalize_step,
        types::{InteractiveReply, ResponseSpec},
    },
    parley_store::Rule,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, rules as rule_metrics};

use crate::{
    INITIAL_STEP, WELCOME_TRIGGER,
    book::RuleBook,
    error::RuleConfigurationError,
    matching::{WildcardPolicy, select_rule},
    steps::step_chain,
};

/// A response to hand to the outbound transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emission {
    pub response: ResponseSpec,
    /// Rule that produced the response, if any.
    pub rule_id: Option<i64>,
    /// Step the response belongs to.
    pub step: String,
}

impl Emission {
    pub fn notice(body: &str, step: &str) -> Self {
        Self {
            response: ResponseSpec::text(body),
            rule_id: None,
            step: step.to_string(),
        }
    }
}

/// Result of evaluating one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Step to persist. Equal to the current step when nothing advanced.
    pub next_step: String,
    pub matched_rule: Option<i64>,
    /// Ask for the advisor flag to be raised.
    pub advisor_requested: bool,
    pub emissions: Vec<Emission>,
    pub config_error: Option<RuleConfigurationError>,
}

impl Transition {
    fn stay(step: String) -> Self {
        Self {
            next_step: step,
            matched_rule: None,
            advisor_requested: false,
            emissions: Vec::new(),
            config_error: None,
        }
    }

    pub fn matched(&self) -> bool {
        self.matched_rule.is_some()
    }
}

/// Why a turn is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// A regular inbound message.
    Message,
    /// The synthetic trigger that opens a new or expired session.
    Welcome,
    /// The contact's own text replayed right after a welcome. Wildcards only
    /// match at steps without specific rules, and a miss is silent.
    Replay,
}

/// Input to [`RuleEngine::evaluate`].
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub kind: TurnKind,
    pub current_step: &'a str,
    pub text: &'a str,
    /// Option picked from a list/button prompt.
    pub reply: Option<&'a InteractiveReply>,
    /// Rule whose response was the most recent prompt sent to the contact.
    pub last_prompt: Option<&'a Rule>,
}

impl<'a> Turn<'a> {
    pub fn message(current_step: &'a str, text: &'a str) -> Self {
        Self {
            kind: TurnKind::Message,
            current_step,
            text,
            reply: None,
            last_prompt: None,
        }
    }

    pub fn welcome() -> Self {
        Self {
            kind: TurnKind::Welcome,
            current_step: INITIAL_STEP,
            text: WELCOME_TRIGGER,
            reply: None,
            last_prompt: None,
        }
    }

    #[must_use]
    pub fn replay(mut self) -> Self {
        self.kind = TurnKind::Replay;
        self
    }

    #[must_use]
    pub fn with_reply(mut self, reply: Option<&'a InteractiveReply>, last_prompt: Option<&'a Rule>) -> Self {
        self.reply = reply;
        self.last_prompt = last_prompt;
        self
    }

    fn policy(&self) -> WildcardPolicy {
        match self.kind {
            TurnKind::Message | TurnKind::Welcome => WildcardPolicy::Always,
            TurnKind::Replay => WildcardPolicy::OnlyWithoutSpecificRules,
        }
    }

    /// Step carried by the picked option of the last prompt, if any.
    fn option_step(&self) -> Option<&'a str> {
        let reply = self.reply?;
        let prompt = self.last_prompt?;
        prompt
            .response
            .as_ref()?
            .find_option(reply)?
            .step
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Raise the advisor flag when a message matches no rule.
    pub advisor_on_no_match: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    options: EngineOptions,
}

impl RuleEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    /// Evaluate one turn against a snapshot of the tenant's rules. Pure: the
    /// caller persists `next_step` and delivers the emissions.
    pub fn evaluate(&self, book: &RuleBook, turn: &Turn<'_>) -> Transition {
        let current = normalize_step(turn.current_step);
        let Some(rule) = select_rule(book.rules_at(&current), turn.text, turn.policy()) else {
            debug!(step = %current, kind = ?turn.kind, "no rule matched");
            #[cfg(feature = "metrics")]
            if turn.kind == TurnKind::Message {
                counter!(rule_metrics::MISSES_TOTAL).increment(1);
            }
            let mut stay = Transition::stay(current);
            stay.advisor_requested =
                turn.kind == TurnKind::Message && self.options.advisor_on_no_match;
            return stay;
        };

        #[cfg(feature = "metrics")]
        counter!(rule_metrics::MATCHES_TOTAL).increment(1);

        let mut transition = Transition::stay(current.clone());
        transition.matched_rule = Some(rule.id);
        if let Some(response) = &rule.response {
            transition.emissions.push(Emission {
                response: response.clone(),
                rule_id: Some(rule.id),
                step: current.clone(),
            });
        }

        let spec = match turn.option_step() {
            Some(step) => {
                debug!(rule_id = rule.id, step, "interactive option overrides next step");
                step
            },
            None => rule.next_step.as_str(),
        };
        let chain = step_chain(&current, spec);

        if let Some(unknown) = chain.iter().find(|s| !book.knows(s)) {
            let error = RuleConfigurationError {
                rule_id: rule.id,
                step: current.clone(),
                unknown: unknown.clone(),
            };
            warn!(%error, "rule points to an unknown step, contact stays");
            #[cfg(feature = "metrics")]
            counter!(rule_metrics::CONFIG_ERRORS_TOTAL).increment(1);
            transition.config_error = Some(error);
            return transition;
        }

        let Some((last, intermediate)) = chain.split_last() else {
            return transition;
        };
        for step in intermediate {
            if let Some(pass) = book.wildcard_at(step)
                && let Some(response) = &pass.response
            {
                transition.emissions.push(Emission {
                    response: response.clone(),
                    rule_id: Some(pass.id),
                    step: step.clone(),
                });
            }
        }
        transition.next_step = last.clone();
        transition
    }

    /// Open a session: evaluate the welcome trigger at the initial step.
    pub fn welcome(&self, book: &RuleBook) -> Transition {
        self.evaluate(book, &Turn::welcome())
    }
}
