use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
    parley_common::types::TenantKey,
    parley_config::ParleyConfig,
    parley_rules::{RuleBook, step_chain},
    parley_store::{GlobalCommand, NewRule, RuleStore},
    parley_tenants::{ConnectionRouter, RouterOptions},
    serde::Deserialize,
};

use crate::open_registry;

#[derive(Subcommand)]
pub enum RuleAction {
    /// Load rules (and optionally global commands) from a JSON file.
    Import {
        tenant: String,
        file: PathBuf,
        /// Delete the tenant's existing rules first.
        #[arg(long)]
        replace: bool,
    },
    /// Print the tenant's rules grouped by step.
    List { tenant: String },
}

/// Either a bare array of rules or an object with `rules` and `commands`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Rules(Vec<NewRule>),
    Full {
        #[serde(default)]
        rules: Vec<NewRule>,
        #[serde(default)]
        commands: Vec<GlobalCommand>,
    },
}

impl RuleFile {
    fn into_parts(self) -> (Vec<NewRule>, Vec<GlobalCommand>) {
        match self {
            Self::Rules(rules) => (rules, Vec::new()),
            Self::Full { rules, commands } => (rules, commands),
        }
    }
}

pub async fn handle_rules(action: RuleAction, config: &ParleyConfig) -> Result<()> {
    let registry = open_registry(config).await?;
    let router = Arc::new(ConnectionRouter::new(
        Arc::new(registry),
        RouterOptions::from(&config.router),
    ));
    let result = run(&router, action).await;
    router.close_all().await;
    result
}

async fn run(router: &ConnectionRouter, action: RuleAction) -> Result<()> {
    match action {
        RuleAction::Import {
            tenant,
            file,
            replace,
        } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let (rules, commands) = serde_json::from_str::<RuleFile>(&raw)
                .with_context(|| format!("parsing {}", file.display()))?
                .into_parts();

            let handle = router.get(&TenantKey::parse(&tenant)?).await?;
            let store = handle.rules();
            if replace {
                let existing = store.list_rules().await?;
                for rule in &existing {
                    store.delete_rule(rule.id).await?;
                }
                println!("Removed {} existing rule(s).", existing.len());
            }
            for rule in rules.iter().cloned() {
                store.create_rule(rule).await?;
            }
            for command in &commands {
                store.upsert_command(&command.keyword, &command.handler).await?;
            }
            println!(
                "Imported {} rule(s) and {} command(s) into {}.",
                rules.len(),
                commands.len(),
                handle.tenant_key()
            );

            let book = RuleBook::load(&store).await?;
            for (rule_id, step) in dangling_steps(&book) {
                eprintln!("  warning: rule {rule_id} points at undefined step '{step}'");
            }
        },
        RuleAction::List { tenant } => {
            let handle = router.get(&TenantKey::parse(&tenant)?).await?;
            let store = handle.rules();
            let rules = store.list_rules().await?;
            if rules.is_empty() {
                println!("No rules defined.");
            }
            let mut current_step: Option<&str> = None;
            for rule in &rules {
                if current_step != Some(rule.step.as_str()) {
                    println!("[{}]", rule.step);
                    current_step = Some(rule.step.as_str());
                }
                let next = if rule.next_step.is_empty() {
                    "-"
                } else {
                    rule.next_step.as_str()
                };
                let reply = rule
                    .response
                    .as_ref()
                    .map(|r| r.body().to_string())
                    .unwrap_or_default();
                println!(
                    "  #{:<4} p{:<3} {:<24} -> {:<20} {}",
                    rule.id, rule.priority, rule.match_spec, next, reply
                );
            }
            let commands = store.list_commands().await?;
            if !commands.is_empty() {
                println!("[global commands]");
                for command in &commands {
                    println!("  {:<24} {}", command.keyword, command.handler);
                }
            }
        },
    }
    Ok(())
}

/// Next steps and option steps that no rule defines, per rule.
fn dangling_steps(book: &RuleBook) -> Vec<(i64, String)> {
    let mut dangling = Vec::new();
    let steps: Vec<String> = book.steps().map(str::to_string).collect();
    for step in &steps {
        for rule in book.rules_at(step) {
            let mut targets = step_chain(&rule.step, &rule.next_step);
            if let Some(response) = &rule.response {
                for option in response.options() {
                    if let Some(target) = &option.step {
                        targets.extend(step_chain(&rule.step, target));
                    }
                }
            }
            for target in targets {
                if !book.knows(&target) {
                    dangling.push((rule.id, target));
                }
            }
        }
    }
    dangling.sort();
    dangling.dedup();
    dangling
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, parley_common::types::ResponseSpec, parley_store::Rule};

    fn rule(id: i64, step: &str, next: &str) -> Rule {
        Rule {
            id,
            step: step.into(),
            match_spec: "*".into(),
            response: Some(ResponseSpec::text("ok")),
            next_step: next.into(),
            priority: 0,
        }
    }

    #[test]
    fn both_file_shapes_parse() {
        let bare: RuleFile = serde_json::from_str(
            r#"[{"step": "menu_principal", "match_spec": "iniciar", "next_step": "opciones"}]"#,
        )
        .unwrap();
        assert_eq!(bare.into_parts().0.len(), 1);

        let full: RuleFile = serde_json::from_str(
            r#"{
                "rules": [{"step": "opciones", "match_spec": "*",
                           "response": {"type": "text", "body": "Elige"}}],
                "commands": [{"keyword": "asesor", "handler": "handoff"}]
            }"#,
        )
        .unwrap();
        let (rules, commands) = full.into_parts();
        assert_eq!(rules[0].next_step, "");
        assert_eq!(commands[0].handler, "handoff");
    }

    #[test]
    fn undefined_targets_are_reported() {
        let book = RuleBook::from_rules(vec![
            rule(1, "menu_principal", "opciones"),
            rule(2, "opciones", "confirmar,cerrado"),
            rule(3, "confirmar", "menu_principal"),
        ]);
        assert_eq!(dangling_steps(&book), vec![(2, "cerrado".to_string())]);
    }

    #[tokio::test]
    async fn import_then_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ParleyConfig::default();
        config.registry.data_dir = Some(dir.path().to_path_buf());
        let file = dir.path().join("rules.json");
        std::fs::write(
            &file,
            r#"{"rules": [
                {"step": "menu_principal", "match_spec": "iniciar", "next_step": "opciones",
                 "response": {"type": "text", "body": "Bienvenido"}},
                {"step": "opciones", "match_spec": "*",
                 "response": {"type": "text", "body": "Elige"}}
               ],
               "commands": [{"keyword": "Asesor", "handler": "handoff"}]}"#,
        )
        .unwrap();

        for replace in [false, true] {
            handle_rules(
                RuleAction::Import {
                    tenant: "default".into(),
                    file: file.clone(),
                    replace,
                },
                &config,
            )
            .await
            .unwrap();
        }

        let registry = open_registry(&config).await.unwrap();
        let router = ConnectionRouter::new(Arc::new(registry), RouterOptions::default());
        let handle = router.get(&TenantKey::parse("default").unwrap()).await.unwrap();
        let store = handle.rules();
        assert_eq!(store.list_rules().await.unwrap().len(), 2);
        assert!(
            store
                .list_commands()
                .await
                .unwrap()
                .iter()
                .any(|c| c.keyword == "asesor" && c.handler == "handoff")
        );
        router.close_all().await;
    }
}
