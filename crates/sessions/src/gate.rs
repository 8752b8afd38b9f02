//! Serializes work per `(tenant, contact)`.
//!
//! Events for the same contact run one at a time in arrival order; events
//! for different contacts never wait on each other. Whoever holds the gate
//! sees the contact's latest persisted state, already reset when the
//! session went idle past the inactivity timeout.

use std::{future::Future, sync::Arc, time::Duration};

use {
    dashmap::DashMap,
    parley_common::{time::now_ms, types::TenantKey},
    parley_config::SessionsConfig,
    parley_store::{Contact, ConversationStore, TurnCommit, TurnRecord},
    tokio::{
        sync::Mutex,
        time::{Instant, timeout},
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, histogram, labels, sessions as session_metrics};

use crate::error::{Error, Result};

type SessionKey = (TenantKey, String);

#[derive(Debug, Clone)]
pub struct GateOptions {
    pub inactivity: Duration,
    pub lock_timeout: Duration,
    pub critical_section: Duration,
    /// Step given to new contacts and expired sessions.
    pub initial_step: String,
}

impl GateOptions {
    pub fn from_config(config: &SessionsConfig, initial_step: impl Into<String>) -> Self {
        Self {
            inactivity: Duration::from_secs(config.inactivity_timeout_secs),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
            critical_section: Duration::from_secs(config.critical_section_timeout_secs),
            initial_step: initial_step.into(),
        }
    }
}

/// Contact state handed to the work running inside the gate.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub contact: Contact,
    /// The contact row was created by this event.
    pub created: bool,
    /// The previous session went idle and was reset before this event.
    pub expired: bool,
    /// Step as stored before this event, ahead of any expiry reset.
    pub stored_step: String,
}

impl SessionState {
    /// New contact or expired session: the welcome flow should run.
    pub fn is_fresh(&self) -> bool {
        self.created || self.expired
    }
}

pub struct SessionGate {
    locks: DashMap<SessionKey, Arc<Mutex<()>>>,
    options: GateOptions,
}

/// A claim on one entry of the lock map. The entry is removed once the last
/// claim on it is released, including when the holding future is dropped.
struct LockLease<'a> {
    locks: &'a DashMap<SessionKey, Arc<Mutex<()>>>,
    key: SessionKey,
    lock: Arc<Mutex<()>>,
}

impl<'a> LockLease<'a> {
    fn acquire(locks: &'a DashMap<SessionKey, Arc<Mutex<()>>>, key: SessionKey) -> Self {
        let lock = Arc::clone(locks.entry(key.clone()).or_default().value());
        Self { locks, key, lock }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        // Release this claim before looking for others.
        drop(std::mem::take(&mut self.lock));
        self.locks
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

impl SessionGate {
    pub fn new(options: GateOptions) -> Self {
        Self {
            locks: DashMap::new(),
            options,
        }
    }

    pub fn options(&self) -> &GateOptions {
        &self.options
    }

    /// Number of contacts currently holding or waiting on the gate.
    pub fn active_sessions(&self) -> usize {
        self.locks.len()
    }

    /// Run `work` with exclusive access to the contact's session.
    ///
    /// `work` receives the loaded state and returns the turn to commit along
    /// with its own output. `last_activity_at` is stamped here and the turn
    /// is written with [`ConversationStore::commit_turn`]. When `work` fails
    /// or overruns, nothing is written, a new contact included.
    pub async fn run<T, E, F, Fut>(
        &self,
        store: &dyn ConversationStore,
        external_id: &str,
        work: F,
    ) -> std::result::Result<(TurnCommit, T), E>
    where
        F: FnOnce(SessionState) -> Fut,
        Fut: Future<Output = std::result::Result<(TurnRecord, T), E>>,
        E: From<Error>,
    {
        let key: SessionKey = (store.tenant_key().clone(), external_id.to_string());
        let lease = LockLease::acquire(&self.locks, key.clone());
        self.run_locked(&lease.lock, store, &key, work).await
    }

    async fn run_locked<T, E, F, Fut>(
        &self,
        lock: &Mutex<()>,
        store: &dyn ConversationStore,
        key: &SessionKey,
        work: F,
    ) -> std::result::Result<(TurnCommit, T), E>
    where
        F: FnOnce(SessionState) -> Fut,
        Fut: Future<Output = std::result::Result<(TurnRecord, T), E>>,
        E: From<Error>,
    {
        let (tenant, external_id) = key;
        let started = Instant::now();
        let Ok(_guard) = timeout(self.options.lock_timeout, lock.lock()).await else {
            warn!(tenant = %tenant, contact = %external_id, "session lock wait timed out");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::LOCK_TIMEOUTS_TOTAL, labels::TENANT => tenant.to_string())
                .increment(1);
            return Err(Error::LockTimeout {
                tenant: tenant.to_string(),
                contact: external_id.clone(),
                waited_ms: duration_ms(self.options.lock_timeout),
            }
            .into());
        };
        #[cfg(feature = "metrics")]
        histogram!(session_metrics::LOCK_WAIT_SECONDS).record(started.elapsed().as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = started;

        let state = self.load(store, external_id).await.map_err(E::from)?;
        let created = state.created;

        let Ok(outcome) = timeout(self.options.critical_section, work(state)).await else {
            warn!(tenant = %tenant, contact = %external_id, "session critical section timed out");
            #[cfg(feature = "metrics")]
            counter!(session_metrics::TIMEOUTS_TOTAL, labels::TENANT => tenant.to_string())
                .increment(1);
            return Err(Error::Timeout {
                tenant: tenant.to_string(),
                contact: external_id.clone(),
                limit_ms: duration_ms(self.options.critical_section),
            }
            .into());
        };
        let (mut record, output) = outcome?;

        record.contact.last_activity_at = now_ms();
        let commit = store
            .commit_turn(&record)
            .await
            .map_err(|e| E::from(Error::from(e)))?;
        match &commit {
            TurnCommit::Committed { contact_id, .. } => {
                if created {
                    info!(tenant = %tenant, contact = %external_id, contact_id, "new contact");
                    #[cfg(feature = "metrics")]
                    counter!(
                        session_metrics::CONTACTS_CREATED_TOTAL,
                        labels::TENANT => tenant.to_string()
                    )
                    .increment(1);
                }
                debug!(
                    tenant = %tenant,
                    contact = %external_id,
                    step = %record.contact.current_step,
                    advisor = record.contact.advisor_flag,
                    "session state saved"
                );
            },
            TurnCommit::Duplicate => {
                debug!(tenant = %tenant, contact = %external_id, "turn already committed");
            },
        }
        Ok((commit, output))
    }

    /// Load the contact, or start a new unsaved one, and apply inactivity
    /// expiry.
    async fn load(&self, store: &dyn ConversationStore, external_id: &str) -> Result<SessionState> {
        let now = now_ms();
        let (mut contact, created) = match store.get_contact(external_id).await? {
            Some(contact) => (contact, false),
            None => (
                Contact::new(
                    store.tenant_key().clone(),
                    external_id,
                    &self.options.initial_step,
                    now,
                ),
                true,
            ),
        };

        let stored_step = contact.current_step.clone();
        let idle_ms = now.saturating_sub(contact.last_activity_at);
        let expired = !created && idle_ms > duration_ms(self.options.inactivity) as i64;
        if expired {
            info!(
                tenant = %contact.tenant_key,
                contact = %external_id,
                idle_ms,
                from_step = %contact.current_step,
                "session expired, resetting"
            );
            #[cfg(feature = "metrics")]
            counter!(
                session_metrics::EXPIRED_TOTAL,
                labels::TENANT => contact.tenant_key.to_string()
            )
            .increment(1);
            contact.current_step = self.options.initial_step.clone();
            contact.advisor_flag = false;
        }

        Ok(SessionState {
            contact,
            created,
            expired,
            stored_step,
        })
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
