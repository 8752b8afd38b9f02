use {
    async_trait::async_trait,
    parley_common::{
        text::{normalize_step, normalize_text},
        types::ResponseSpec,
    },
    sqlx::SqlitePool,
    tracing::debug,
};

use crate::{
    error::{Error, Result},
    model::{GlobalCommand, NewRule, Rule},
};

/// Step rules and global commands of a single tenant.
///
/// Rules come back ordered by `(priority, id)` ascending; callers rely on
/// that order for first-match-wins evaluation and never re-sort.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn rules_for_step(&self, step: &str) -> Result<Vec<Rule>>;
    async fn list_rules(&self) -> Result<Vec<Rule>>;
    async fn get_rule(&self, id: i64) -> Result<Option<Rule>>;
    /// Distinct step names that have at least one rule.
    async fn known_steps(&self) -> Result<Vec<String>>;
    async fn create_rule(&self, rule: NewRule) -> Result<Rule>;
    async fn update_rule(&self, id: i64, rule: NewRule) -> Result<Option<Rule>>;
    async fn delete_rule(&self, id: i64) -> Result<bool>;

    async fn list_commands(&self) -> Result<Vec<GlobalCommand>>;
    /// Insert or rebind a command. The keyword is normalized before storage.
    async fn upsert_command(&self, keyword: &str, handler: &str) -> Result<GlobalCommand>;
    async fn delete_command(&self, keyword: &str) -> Result<bool>;
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    step: String,
    match_spec: String,
    response: Option<String>,
    next_step: String,
    priority: i64,
}

impl TryFrom<RuleRow> for Rule {
    type Error = Error;

    fn try_from(r: RuleRow) -> Result<Self> {
        let response = match r.response.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(serde_json::from_str::<ResponseSpec>(raw).map_err(|e| {
                Error::corrupt_row("rules", format!("rule {} response: {e}", r.id))
            })?),
        };
        Ok(Self {
            id: r.id,
            step: r.step,
            match_spec: r.match_spec,
            response,
            next_step: r.next_step,
            priority: r.priority,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommandRow {
    keyword: String,
    handler: String,
}

impl From<CommandRow> for GlobalCommand {
    fn from(r: CommandRow) -> Self {
        Self {
            keyword: r.keyword,
            handler: r.handler,
        }
    }
}

/// Canonical stored form: step names lowercased, next-step entries trimmed.
fn canonical(rule: NewRule) -> Result<(NewRule, Option<String>)> {
    let step = normalize_step(&rule.step);
    if step.is_empty() {
        return Err(parley_common::Error::invalid("rule step", "must not be empty").into());
    }
    let match_spec = rule.match_spec.trim().to_string();
    if match_spec.is_empty() {
        return Err(parley_common::Error::invalid("rule match", "must not be empty").into());
    }
    let next_step = rule
        .next_step
        .split(',')
        .map(normalize_step)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(",");
    let response = rule.response.as_ref().map(serde_json::to_string).transpose()?;
    Ok((
        NewRule {
            step,
            match_spec,
            next_step,
            ..rule
        },
        response,
    ))
}

/// SQLite-backed rule store bound to one tenant's pool.
pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn rules_for_step(&self, step: &str) -> Result<Vec<Rule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT * FROM rules WHERE step = ? ORDER BY priority ASC, id ASC",
        )
        .bind(normalize_step(step))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT * FROM rules ORDER BY step ASC, priority ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let row = sqlx::query_as::<_, RuleRow>("SELECT * FROM rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn known_steps(&self) -> Result<Vec<String>> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT DISTINCT step FROM rules ORDER BY step")
                .fetch_all(&self.pool)
                .await?,
        )
    }

    async fn create_rule(&self, rule: NewRule) -> Result<Rule> {
        let (rule, response) = canonical(rule)?;
        let id = sqlx::query(
            "INSERT INTO rules (step, match_spec, response, next_step, priority) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&rule.step)
        .bind(&rule.match_spec)
        .bind(&response)
        .bind(&rule.next_step)
        .bind(rule.priority)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        debug!(id, step = %rule.step, "rule created");
        Ok(Rule {
            id,
            step: rule.step,
            match_spec: rule.match_spec,
            response: rule.response,
            next_step: rule.next_step,
            priority: rule.priority,
        })
    }

    async fn update_rule(&self, id: i64, rule: NewRule) -> Result<Option<Rule>> {
        let (rule, response) = canonical(rule)?;
        let updated = sqlx::query(
            "UPDATE rules SET step = ?, match_spec = ?, response = ?, next_step = ?, priority = ? WHERE id = ?",
        )
        .bind(&rule.step)
        .bind(&rule.match_spec)
        .bind(&response)
        .bind(&rule.next_step)
        .bind(rule.priority)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        Ok(Some(Rule {
            id,
            step: rule.step,
            match_spec: rule.match_spec,
            response: rule.response,
            next_step: rule.next_step,
            priority: rule.priority,
        }))
    }

    async fn delete_rule(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_commands(&self) -> Result<Vec<GlobalCommand>> {
        let rows =
            sqlx::query_as::<_, CommandRow>("SELECT * FROM global_commands ORDER BY keyword")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_command(&self, keyword: &str, handler: &str) -> Result<GlobalCommand> {
        let keyword = normalize_text(keyword);
        if keyword.is_empty() {
            return Err(parley_common::Error::invalid("command keyword", "must not be empty").into());
        }
        let handler = handler.trim().to_string();
        sqlx::query(
            r#"INSERT INTO global_commands (keyword, handler) VALUES (?, ?)
               ON CONFLICT(keyword) DO UPDATE SET handler = excluded.handler"#,
        )
        .bind(&keyword)
        .bind(&handler)
        .execute(&self.pool)
        .await?;
        Ok(GlobalCommand { keyword, handler })
    }

    async fn delete_command(&self, keyword: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM global_commands WHERE keyword = ?")
            .bind(normalize_text(keyword))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::run_migrations};

    async fn test_store() -> SqliteRuleStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteRuleStore::new(pool)
    }

    #[tokio::test]
    async fn rules_are_ordered_by_priority_then_id() {
        let store = test_store().await;
        let a = store
            .create_rule(NewRule::new("s", "*", "fallback").with_priority(5))
            .await
            .unwrap();
        let b = store
            .create_rule(NewRule::new("s", "hola", "saludo").with_priority(1))
            .await
            .unwrap();
        let c = store
            .create_rule(NewRule::new("s", "chau", "fin").with_priority(1))
            .await
            .unwrap();
        store
            .create_rule(NewRule::new("otro", "x", ""))
            .await
            .unwrap();

        let ids: Vec<_> = store
            .rules_for_step("S")
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![b.id, c.id, a.id]);
    }

    #[tokio::test]
    async fn create_canonicalizes_step_and_chain() {
        let store = test_store().await;
        let rule = store
            .create_rule(
                NewRule::new(" Menu_Principal ", " hola ", " Confirm , , Closed ")
                    .with_response(ResponseSpec::text("hi")),
            )
            .await
            .unwrap();
        assert_eq!(rule.step, "menu_principal");
        assert_eq!(rule.match_spec, "hola");
        assert_eq!(rule.next_step, "confirm,closed");

        let loaded = store.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded, rule);
    }

    #[tokio::test]
    async fn empty_step_is_rejected() {
        let store = test_store().await;
        assert!(store.create_rule(NewRule::new("  ", "x", "")).await.is_err());
    }

    #[tokio::test]
    async fn update_and_delete_rule() {
        let store = test_store().await;
        let rule = store.create_rule(NewRule::new("s", "a", "")).await.unwrap();
        let updated = store
            .update_rule(rule.id, NewRule::new("s", "b", "t"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.match_spec, "b");
        assert!(
            store
                .update_rule(999, NewRule::new("s", "b", ""))
                .await
                .unwrap()
                .is_none()
        );
        assert!(store.delete_rule(rule.id).await.unwrap());
        assert!(store.get_rule(rule.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn known_steps_are_distinct() {
        let store = test_store().await;
        for (step, m) in [("a", "1"), ("a", "2"), ("b", "*")] {
            store.create_rule(NewRule::new(step, m, "")).await.unwrap();
        }
        assert_eq!(store.known_steps().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn default_commands_are_seeded() {
        let store = test_store().await;
        let keywords: Vec<_> = store
            .list_commands()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.keyword)
            .collect();
        for expected in ["reiniciar", "volver al inicio", "inicio", "menu", "ayuda"] {
            assert!(keywords.iter().any(|k| k == expected), "{expected}");
        }
    }

    #[tokio::test]
    async fn command_keywords_are_normalized() {
        let store = test_store().await;
        let cmd = store.upsert_command("  Hablar con ASESOR ", "handoff").await.unwrap();
        assert_eq!(cmd.keyword, "hablar con asesor");
        store.upsert_command("hablar con asesor", "close_session").await.unwrap();
        let all = store.list_commands().await.unwrap();
        let found: Vec<_> = all.iter().filter(|c| c.keyword == "hablar con asesor").collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].handler, "close_session");
        assert!(store.delete_command("HABLAR con asesor").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_response_json_is_reported() {
        let store = test_store().await;
        sqlx::query("INSERT INTO rules (step, match_spec, response) VALUES ('s', '*', '{bad')")
            .execute(&store.pool)
            .await
            .unwrap();
        assert!(matches!(
            store.rules_for_step("s").await,
            Err(Error::CorruptRow { table: "rules", .. })
        ));
    }
}
