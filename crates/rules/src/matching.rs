//! Rule match specs and first-match-wins selection.

use {
    parley_common::text::{normalize_text, split_alternatives},
    parley_store::Rule,
};

pub const WILDCARD: &str = "*";

/// Parsed form of a rule's `match_spec`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchSpec {
    /// `*`: matches any input.
    Any,
    /// Comma separated alternatives, compared after normalization.
    OneOf(Vec<String>),
}

impl MatchSpec {
    pub fn parse(spec: &str) -> Self {
        if spec.trim() == WILDCARD {
            return Self::Any;
        }
        Self::OneOf(split_alternatives(spec))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// `input` must already be normalized.
    pub fn matches(&self, input: &str) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(alternatives) => alternatives.iter().any(|a| a == input),
        }
    }
}

/// When a wildcard rule is allowed to match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WildcardPolicy {
    #[default]
    Always,
    /// Only at steps that have no specific rules. Used when replaying the
    /// contact's first text right after the welcome message.
    OnlyWithoutSpecificRules,
}

/// First rule, in the given order, whose spec matches `input`.
///
/// `rules` must already be sorted by `(priority, id)`. Wildcards are not
/// moved to the end; a wildcard ordered first shadows everything after it.
pub fn select_rule<'a>(rules: &'a [Rule], input: &str, policy: WildcardPolicy) -> Option<&'a Rule> {
    let input = normalize_text(input);
    let specs: Vec<MatchSpec> = rules.iter().map(|r| MatchSpec::parse(&r.match_spec)).collect();
    let wildcard_allowed = match policy {
        WildcardPolicy::Always => true,
        WildcardPolicy::OnlyWithoutSpecificRules => specs.iter().all(MatchSpec::is_wildcard),
    };
    rules
        .iter()
        .zip(&specs)
        .find(|(_, spec)| {
            if spec.is_wildcard() {
                wildcard_allowed
            } else {
                spec.matches(&input)
            }
        })
        .map(|(rule, _)| rule)
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn rule(id: i64, match_spec: &str, next: &str) -> Rule {
        Rule {
            id,
            step: "s".into(),
            match_spec: match_spec.into(),
            response: None,
            next_step: next.into(),
            priority: 0,
        }
    }

    #[rstest]
    #[case("*", "anything", true)]
    #[case("hola, buenas", "buenas", true)]
    #[case("Hola, Buenas", "hola", true)]
    #[case("menú", "menu", true)]
    #[case("hola", "hola que tal", false)]
    #[case("si,sí", "no", false)]
    fn match_spec_cases(#[case] spec: &str, #[case] input: &str, #[case] expected: bool) {
        assert_eq!(MatchSpec::parse(spec).matches(&normalize_text(input)), expected);
    }

    #[test]
    fn first_match_wins_in_given_order() {
        let rules = vec![rule(1, "hola", "saludo"), rule(2, "*", "fallback")];
        assert_eq!(
            select_rule(&rules, "HOLA", WildcardPolicy::Always).map(|r| r.id),
            Some(1)
        );
        assert_eq!(
            select_rule(&rules, "xyz", WildcardPolicy::Always).map(|r| r.id),
            Some(2)
        );
    }

    #[test]
    fn wildcard_ordered_first_shadows_later_rules() {
        let rules = vec![rule(1, "*", "a"), rule(2, "hola", "b")];
        assert_eq!(
            select_rule(&rules, "hola", WildcardPolicy::Always).map(|r| r.id),
            Some(1)
        );
    }

    #[test]
    fn restricted_wildcard_only_without_specific_rules() {
        let mixed = vec![rule(1, "hola", "a"), rule(2, "*", "b")];
        assert!(select_rule(&mixed, "xyz", WildcardPolicy::OnlyWithoutSpecificRules).is_none());
        assert_eq!(
            select_rule(&mixed, "hola", WildcardPolicy::OnlyWithoutSpecificRules).map(|r| r.id),
            Some(1)
        );

        let only_wildcard = vec![rule(3, "*", "c")];
        assert_eq!(
            select_rule(&only_wildcard, "xyz", WildcardPolicy::OnlyWithoutSpecificRules)
                .map(|r| r.id),
            Some(3)
        );
    }

    #[test]
    fn selection_is_deterministic() {
        let rules = vec![rule(1, "a,b", "x"), rule(2, "b", "y"), rule(3, "*", "z")];
        let picks: Vec<_> = (0..10)
            .map(|_| select_rule(&rules, "b", WildcardPolicy::Always).map(|r| r.id))
            .collect();
        assert!(picks.iter().all(|p| *p == Some(1)));
    }
}
