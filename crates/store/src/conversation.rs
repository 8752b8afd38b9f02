use {
    async_trait::async_trait,
    parley_common::types::TenantKey,
    sqlx::{SqliteConnection, SqlitePool},
};

use crate::{
    error::{Error, Result},
    model::{Contact, Message, NewMessage, TranscriptionStatus, TurnCommit, TurnRecord},
};

/// Contacts, message history and delivery dedupe of a single tenant.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    fn tenant_key(&self) -> &TenantKey;

    async fn get_contact(&self, external_id: &str) -> Result<Option<Contact>>;

    /// Load a contact, creating it at `initial_step` when absent. The flag is
    /// `true` when this call created the row.
    async fn get_or_create_contact(
        &self,
        external_id: &str,
        initial_step: &str,
        now_ms: i64,
    ) -> Result<(Contact, bool)>;

    /// Persist step, advisor flag and last activity.
    async fn save_contact_state(&self, contact: &Contact) -> Result<()>;

    async fn set_alias(&self, external_id: &str, alias: Option<&str>) -> Result<bool>;

    /// Delete a contact and its history.
    async fn delete_contact(&self, external_id: &str) -> Result<bool>;

    /// Contacts ordered by most recent activity.
    async fn list_contacts(&self, limit: u32, offset: u32) -> Result<Vec<Contact>>;

    async fn append_message(&self, message: NewMessage) -> Result<Message>;

    async fn get_message(&self, id: i64) -> Result<Option<Message>>;

    /// Up to `limit` messages older than `before_id` (or the newest), oldest
    /// first.
    async fn list_messages(
        &self,
        contact_id: i64,
        before_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>>;

    /// Most recent outbound message produced by a rule.
    async fn last_rule_message(&self, contact_id: i64) -> Result<Option<Message>>;

    /// Update the transcription fields of one message. `text` replaces the
    /// stored text only when given. Returns `false` if the row is gone.
    async fn set_transcription(
        &self,
        message_id: i64,
        status: TranscriptionStatus,
        text: Option<&str>,
    ) -> Result<bool>;

    /// Whether a turn carrying this provider message id was committed.
    async fn is_processed(&self, wa_id: &str) -> Result<bool>;

    /// Write a whole turn in one transaction: the dedupe mark for the
    /// inbound `wa_id`, the contact's state (inserting the contact when it is
    /// new), the inbound message and its replies. Message `contact_id`s are
    /// taken from the stored contact. A `wa_id` seen before writes nothing.
    async fn commit_turn(&self, record: &TurnRecord) -> Result<TurnCommit>;
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    id: i64,
    external_id: String,
    alias: Option<String>,
    current_step: String,
    advisor_flag: bool,
    last_activity_at: i64,
    created_at: i64,
}

impl ContactRow {
    fn into_contact(self, tenant_key: &TenantKey) -> Contact {
        Contact {
            id: self.id,
            tenant_key: tenant_key.clone(),
            external_id: self.external_id,
            alias: self.alias,
            current_step: self.current_step,
            advisor_flag: self.advisor_flag,
            last_activity_at: self.last_activity_at,
            created_at: self.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    contact_id: i64,
    direction: String,
    kind: String,
    text: Option<String>,
    media_ref: Option<String>,
    transcription_status: String,
    wa_id: Option<String>,
    step: Option<String>,
    rule_id: Option<i64>,
    created_at: i64,
}

impl MessageRow {
    fn into_message(self, tenant_key: &TenantKey) -> Result<Message> {
        Ok(Message {
            id: self.id,
            tenant_key: tenant_key.clone(),
            contact_id: self.contact_id,
            direction: self.direction.parse()?,
            kind: self
                .kind
                .parse()
                .map_err(|e| Error::corrupt_row("messages", format!("{e}")))?,
            text: self.text,
            media_ref: self.media_ref,
            transcription_status: self.transcription_status.parse()?,
            wa_id: self.wa_id,
            step: self.step,
            rule_id: self.rule_id,
            created_at: self.created_at,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, contact_id, direction, kind, text, media_ref, \
                               transcription_status, wa_id, step, rule_id, created_at";

async fn insert_message(
    conn: &mut SqliteConnection,
    contact_id: i64,
    message: &NewMessage,
) -> Result<i64> {
    let id = sqlx::query(
        r#"INSERT INTO messages
           (contact_id, direction, kind, text, media_ref, transcription_status,
            wa_id, step, rule_id, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(contact_id)
    .bind(message.direction.as_str())
    .bind(message.kind.as_str())
    .bind(&message.text)
    .bind(&message.media_ref)
    .bind(message.transcription_status.as_str())
    .bind(&message.wa_id)
    .bind(&message.step)
    .bind(message.rule_id)
    .bind(message.created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// SQLite-backed conversation store bound to one tenant's pool.
pub struct SqliteConversationStore {
    pool: SqlitePool,
    tenant_key: TenantKey,
}

impl SqliteConversationStore {
    pub fn new(pool: SqlitePool, tenant_key: TenantKey) -> Self {
        Self { pool, tenant_key }
    }

    async fn fetch_contact(&self, external_id: &str) -> Result<Option<Contact>> {
        let row = sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.into_contact(&self.tenant_key)))
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    fn tenant_key(&self) -> &TenantKey {
        &self.tenant_key
    }

    async fn get_contact(&self, external_id: &str) -> Result<Option<Contact>> {
        self.fetch_contact(external_id).await
    }

    async fn get_or_create_contact(
        &self,
        external_id: &str,
        initial_step: &str,
        now_ms: i64,
    ) -> Result<(Contact, bool)> {
        let inserted = sqlx::query(
            r#"INSERT INTO contacts (external_id, current_step, advisor_flag, last_activity_at, created_at)
               VALUES (?, ?, 0, ?, ?)
               ON CONFLICT(external_id) DO NOTHING"#,
        )
        .bind(external_id)
        .bind(initial_step)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let contact = self
            .fetch_contact(external_id)
            .await?
            .ok_or_else(|| Error::corrupt_row("contacts", format!("{external_id} vanished")))?;
        Ok((contact, inserted))
    }

    async fn save_contact_state(&self, contact: &Contact) -> Result<()> {
        sqlx::query(
            "UPDATE contacts SET current_step = ?, advisor_flag = ?, last_activity_at = ? WHERE id = ?",
        )
        .bind(&contact.current_step)
        .bind(contact.advisor_flag)
        .bind(contact.last_activity_at)
        .bind(contact.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_alias(&self, external_id: &str, alias: Option<&str>) -> Result<bool> {
        let alias = alias.map(str::trim).filter(|a| !a.is_empty());
        let result = sqlx::query("UPDATE contacts SET alias = ? WHERE external_id = ?")
            .bind(alias)
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_contact(&self, external_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM messages WHERE contact_id IN (SELECT id FROM contacts WHERE external_id = ?)",
        )
        .bind(external_id)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM contacts WHERE external_id = ?")
            .bind(external_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_contacts(&self, limit: u32, offset: u32) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT * FROM contacts ORDER BY last_activity_at DESC, id DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| r.into_contact(&self.tenant_key))
            .collect())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_message(&mut conn, message.contact_id, &message).await?;

        Ok(Message {
            id,
            tenant_key: self.tenant_key.clone(),
            contact_id: message.contact_id,
            direction: message.direction,
            kind: message.kind,
            text: message.text,
            media_ref: message.media_ref,
            transcription_status: message.transcription_status,
            wa_id: message.wa_id,
            step: message.step,
            rule_id: message.rule_id,
            created_at: message.created_at,
        })
    }

    async fn get_message(&self, id: i64) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_message(&self.tenant_key)).transpose()
    }

    async fn list_messages(
        &self,
        contact_id: i64,
        before_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE contact_id = ? AND (? IS NULL OR id < ?)
             ORDER BY id DESC
             LIMIT ?"
        ))
        .bind(contact_id)
        .bind(before_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut messages = rows
            .into_iter()
            .map(|r| r.into_message(&self.tenant_key))
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    async fn last_rule_message(&self, contact_id: i64) -> Result<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE contact_id = ? AND direction = 'outbound' AND rule_id IS NOT NULL
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(contact_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_message(&self.tenant_key)).transpose()
    }

    async fn set_transcription(
        &self,
        message_id: i64,
        status: TranscriptionStatus,
        text: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE messages SET transcription_status = ?, text = COALESCE(?, text) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(text)
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn is_processed(&self, wa_id: &str) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM processed_events WHERE wa_id = ?")
                .bind(wa_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn commit_turn(&self, record: &TurnRecord) -> Result<TurnCommit> {
        let mut tx = self.pool.begin().await?;

        if let Some(wa_id) = record.inbound.wa_id.as_deref().filter(|id| !id.is_empty()) {
            let fresh = sqlx::query(
                "INSERT INTO processed_events (wa_id, received_at) VALUES (?, ?)
                 ON CONFLICT(wa_id) DO NOTHING",
            )
            .bind(wa_id)
            .bind(record.inbound.created_at)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;
            if !fresh {
                tx.rollback().await?;
                return Ok(TurnCommit::Duplicate);
            }
        }

        let contact = &record.contact;
        let contact_id: i64 = sqlx::query_scalar(
            r#"INSERT INTO contacts (external_id, current_step, advisor_flag, last_activity_at, created_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(external_id) DO UPDATE SET
                   current_step = excluded.current_step,
                   advisor_flag = excluded.advisor_flag,
                   last_activity_at = excluded.last_activity_at
               RETURNING id"#,
        )
        .bind(&contact.external_id)
        .bind(&contact.current_step)
        .bind(contact.advisor_flag)
        .bind(contact.last_activity_at)
        .bind(contact.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let inbound_id = insert_message(&mut tx, contact_id, &record.inbound).await?;
        let mut outbound_ids = Vec::with_capacity(record.outbound.len());
        for message in &record.outbound {
            outbound_ids.push(insert_message(&mut tx, contact_id, message).await?);
        }

        tx.commit().await?;
        Ok(TurnCommit::Committed {
            contact_id,
            inbound_id,
            outbound_ids,
        })
    }
}
