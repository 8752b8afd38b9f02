use std::collections::{BTreeMap, HashMap};

use parley_store::{Rule, RuleStore};

use crate::{INITIAL_STEP, error::Result, matching::MatchSpec};

/// All rules of one tenant, grouped by step in `(priority, id)` order.
///
/// Loaded once per inbound event so that a multi-step chain is resolved
/// against a single consistent snapshot without further queries.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    by_step: BTreeMap<String, Vec<Rule>>,
    by_id: HashMap<i64, (String, usize)>,
}

impl RuleBook {
    /// Build from rules sorted by `(step, priority, id)`.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        let mut book = Self::default();
        for rule in rules {
            let step_rules = book.by_step.entry(rule.step.clone()).or_default();
            book.by_id
                .insert(rule.id, (rule.step.clone(), step_rules.len()));
            step_rules.push(rule);
        }
        book
    }

    pub async fn load(store: &dyn RuleStore) -> Result<Self> {
        Ok(Self::from_rules(store.list_rules().await?))
    }

    pub fn rules_at(&self, step: &str) -> &[Rule] {
        self.by_step.get(step).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn rule(&self, id: i64) -> Option<&Rule> {
        let (step, idx) = self.by_id.get(&id)?;
        self.by_step.get(step)?.get(*idx)
    }

    /// Whether `step` is defined by some rule or is the reserved initial step.
    pub fn knows(&self, step: &str) -> bool {
        step == INITIAL_STEP || self.by_step.contains_key(step)
    }

    /// First wildcard rule at `step`, used for the message emitted while
    /// passing through an intermediate step.
    pub fn wildcard_at(&self, step: &str) -> Option<&Rule> {
        self.rules_at(step)
            .iter()
            .find(|r| MatchSpec::parse(&r.match_spec).is_wildcard())
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.by_step.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_step.is_empty()
    }
}
