//! One inbound event, end to end.
//!
//! The tenant is resolved and already committed deliveries are dropped before
//! any contact state is touched. The turn itself runs inside the contact's
//! session gate: global commands get the first look at the text, a new or
//! expired session gets the welcome flow and the rule engine decides
//! everything else. The inbound message, its replies, the new contact state
//! and the dedupe mark are committed together, so a turn that fails leaves
//! nothing behind and its redelivery is processed normally. Replies are
//! delivered only after that commit. Voice notes go to the transcription
//! pipeline last, so a full queue never delays the reply.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    parley_channels::ChannelOutbound,
    parley_common::{
        text::normalize_text,
        time::now_ms,
        types::{InboundEvent, MessageKind, TenantKey},
    },
    parley_config::SessionsConfig,
    parley_rules::{
        CommandAction, CommandInterceptor, Emission, EngineOptions, INITIAL_STEP, Interception,
        RuleBook, RuleEngine, Transition, Turn, WELCOME_TRIGGER,
    },
    parley_sessions::{GateOptions, SessionGate, SessionState},
    parley_store::{
        Contact, ConversationStore, NewMessage, RuleStore, TranscriptionStatus, TurnCommit,
        TurnRecord,
    },
    parley_tenants::ConnectionRouter,
    parley_voice::{AudioFormat, TranscriptionJob, TranscriptionPipeline},
    serde::Serialize,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, dispatch as dispatch_metrics, histogram, labels};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    pub gate: GateOptions,
    pub engine: EngineOptions,
    /// Sent ahead of the welcome when the previous session expired.
    pub timeout_notice: String,
    pub restart_notice: String,
    pub command_cache_ttl: Duration,
}

impl DispatcherOptions {
    pub fn from_config(config: &SessionsConfig) -> Self {
        Self {
            gate: GateOptions::from_config(config, INITIAL_STEP),
            engine: EngineOptions {
                advisor_on_no_match: config.advisor_on_no_match,
            },
            timeout_notice: config.timeout_notice.clone(),
            restart_notice: config.restart_notice.clone(),
            command_cache_ttl: Duration::from_secs(config.command_cache_ttl_secs),
        }
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self::from_config(&SessionsConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The provider message id was already processed.
    Duplicate {
        tenant: TenantKey,
        provider_message_id: String,
    },
    Processed(DispatchReport),
}

impl DispatchOutcome {
    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            Self::Processed(report) => Some(report),
            Self::Duplicate { .. } => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub tenant: TenantKey,
    pub contact: String,
    pub message_id: i64,
    /// Step stored before this event, ahead of any expiry reset.
    pub previous_step: String,
    pub step: String,
    pub advisor_flag: bool,
    /// New contact or expired session; the welcome flow ran.
    pub session_started: bool,
    pub command: Option<CommandAction>,
    pub matched_rule: Option<i64>,
    pub config_error: Option<String>,
    pub replies_sent: usize,
    pub replies_failed: usize,
    pub transcription: TranscriptionStatus,
}

/// What happened inside the gate.
struct TurnResult {
    previous_step: String,
    step: String,
    advisor_flag: bool,
    session_started: bool,
    command: Option<CommandAction>,
    matched_rule: Option<i64>,
    config_error: Option<String>,
    replies: Vec<Emission>,
    transcribe: Option<String>,
}

impl TurnResult {
    fn apply(&mut self, contact: &mut Contact, transition: Transition) {
        contact.current_step = transition.next_step;
        if transition.advisor_requested {
            contact.advisor_flag = true;
        }
        if transition.matched_rule.is_some() {
            self.matched_rule = transition.matched_rule;
        }
        if let Some(error) = transition.config_error {
            self.config_error = Some(error.to_string());
        }
        self.replies.extend(transition.emissions);
    }
}

pub struct Dispatcher {
    router: Arc<ConnectionRouter>,
    gate: SessionGate,
    engine: RuleEngine,
    commands: Arc<CommandInterceptor>,
    outbound: Arc<dyn ChannelOutbound>,
    transcription: Option<Arc<TranscriptionPipeline>>,
    timeout_notice: String,
}

impl Dispatcher {
    pub fn new(
        router: Arc<ConnectionRouter>,
        outbound: Arc<dyn ChannelOutbound>,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            router,
            gate: SessionGate::new(options.gate),
            engine: RuleEngine::new(options.engine),
            commands: Arc::new(
                CommandInterceptor::new(options.restart_notice)
                    .with_ttl(options.command_cache_ttl),
            ),
            outbound,
            transcription: None,
            timeout_notice: options.timeout_notice,
        }
    }

    #[must_use]
    pub fn with_transcription(mut self, pipeline: Arc<TranscriptionPipeline>) -> Self {
        self.transcription = Some(pipeline);
        self
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        &self.router
    }

    pub fn commands(&self) -> &Arc<CommandInterceptor> {
        &self.commands
    }

    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    pub fn transcription(&self) -> Option<&Arc<TranscriptionPipeline>> {
        self.transcription.as_ref()
    }

    /// Process one inbound event.
    pub async fn dispatch(&self, event: InboundEvent) -> Result<DispatchOutcome> {
        let started = Instant::now();
        let result = self.run(&event).await;

        match &result {
            Ok(DispatchOutcome::Processed(report)) => {
                #[cfg(feature = "metrics")]
                counter!(
                    dispatch_metrics::EVENTS_TOTAL,
                    labels::TENANT => report.tenant.to_string(),
                    labels::KIND => event.kind.as_str()
                )
                .increment(1);
                #[cfg(not(feature = "metrics"))]
                let _ = report;
            },
            Ok(DispatchOutcome::Duplicate { .. }) => {},
            Err(e) => {
                warn!(
                    tenant = event.tenant_key.as_deref().unwrap_or("-"),
                    contact = %event.contact_external_id,
                    reason = e.reason(),
                    error = %e,
                    "inbound event failed"
                );
                #[cfg(feature = "metrics")]
                counter!(dispatch_metrics::ERRORS_TOTAL, labels::REASON => e.reason()).increment(1);
            },
        }

        #[cfg(feature = "metrics")]
        histogram!(dispatch_metrics::DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = started;
        result
    }

    async fn run(&self, event: &InboundEvent) -> Result<DispatchOutcome> {
        let external_id = event.contact_external_id.trim();
        if external_id.is_empty() {
            return Err(Error::bad_request("contact_external_id is required"));
        }

        // Resolution failures stop here, before any store is opened.
        let tenant = self
            .router
            .registry()
            .resolve(event.tenant_key.as_deref())
            .await?;
        let handle = self.router.get_for(&tenant).await?;
        let conversations = handle.conversations();
        let rules = handle.rules();

        match self.process(&conversations, &rules, external_id, event).await {
            Err(e) if e.is_connection_fault() => {
                self.router.invalidate(&tenant.key).await;
                Err(e)
            },
            other => other,
        }
    }

    async fn process(
        &self,
        conversations: &dyn ConversationStore,
        rules: &dyn RuleStore,
        external_id: &str,
        event: &InboundEvent,
    ) -> Result<DispatchOutcome> {
        let tenant = conversations.tenant_key().clone();
        let wa_id = event
            .provider_message_id
            .as_deref()
            .filter(|id| !id.is_empty());

        if let Some(wa_id) = wa_id
            && conversations.is_processed(wa_id).await?
        {
            return Ok(duplicate(tenant, external_id, wa_id));
        }

        let book = RuleBook::load(rules).await?;
        let (commit, turn) = self
            .gate
            .run(conversations, external_id, |state| {
                self.take_turn(conversations, rules, &book, event, state)
            })
            .await?;
        let message_id = match commit {
            TurnCommit::Committed { inbound_id, .. } => inbound_id,
            // A concurrent delivery of the same event committed first.
            TurnCommit::Duplicate => {
                return Ok(duplicate(tenant, external_id, wa_id.unwrap_or_default()));
            },
        };
        info!(
            tenant = %tenant,
            contact = external_id,
            message_id,
            from_step = %turn.previous_step,
            step = %turn.step,
            rule_id = ?turn.matched_rule,
            command = ?turn.command,
            replies = turn.replies.len(),
            "turn processed"
        );

        // Committed. Delivery failures are reported, never rolled back.
        let mut replies_sent = 0;
        let mut replies_failed = 0;
        for emission in &turn.replies {
            match self
                .outbound
                .send(&tenant, external_id, &emission.response)
                .await
            {
                Ok(_) => replies_sent += 1,
                Err(e) => {
                    replies_failed += 1;
                    warn!(
                        tenant = %tenant,
                        contact = external_id,
                        channel = self.outbound.id(),
                        rule_id = ?emission.rule_id,
                        error = %e,
                        "reply delivery failed"
                    );
                },
            }
        }

        let transcription = match turn.transcribe {
            Some(media_ref) => {
                self.submit_transcription(&tenant, message_id, media_ref)
                    .await
            },
            None => TranscriptionStatus::None,
        };

        Ok(DispatchOutcome::Processed(DispatchReport {
            tenant,
            contact: external_id.to_string(),
            message_id,
            previous_step: turn.previous_step,
            step: turn.step,
            advisor_flag: turn.advisor_flag,
            session_started: turn.session_started,
            command: turn.command,
            matched_rule: turn.matched_rule,
            config_error: turn.config_error,
            replies_sent,
            replies_failed,
            transcription,
        }))
    }

    /// Runs while holding the contact's session. Decides the turn; the gate
    /// commits it.
    async fn take_turn(
        &self,
        conversations: &dyn ConversationStore,
        rules: &dyn RuleStore,
        book: &RuleBook,
        event: &InboundEvent,
        state: SessionState,
    ) -> Result<(TurnRecord, TurnResult)> {
        let session_started = state.is_fresh();
        let expired = state.expired;
        let mut contact = state.contact;
        let previous_step = state.stored_step;

        let transcribe = match (&self.transcription, event.kind, event.media_ref.as_deref()) {
            (Some(_), MessageKind::Audio, Some(media_ref)) if !media_ref.is_empty() => {
                Some(media_ref.to_string())
            },
            _ => None,
        };

        let mut inbound = NewMessage::inbound(contact.id, event.kind, now_ms());
        inbound.text = event.match_text().map(str::to_string);
        inbound.media_ref = event.media_ref.clone();
        inbound.wa_id = event.provider_message_id.clone();
        inbound.step = Some(contact.current_step.clone());
        if transcribe.is_some() {
            inbound.transcription_status = TranscriptionStatus::Pending;
        }

        let mut turn = TurnResult {
            previous_step,
            step: String::new(),
            advisor_flag: false,
            session_started,
            command: None,
            matched_rule: None,
            config_error: None,
            replies: Vec::new(),
            transcribe,
        };
        let text = event.match_text().unwrap_or_default();

        // Commands come first, for a brand new session too.
        let interception = if text.is_empty() {
            Interception::NotMatched
        } else {
            self.commands
                .try_handle(&contact, text, rules, book, &self.engine)
                .await?
        };
        if expired {
            turn.replies
                .push(Emission::notice(&self.timeout_notice, INITIAL_STEP));
        }

        match interception {
            Interception::Handled(effect) => {
                contact.current_step = effect.next_step;
                contact.advisor_flag = effect.advisor_flag;
                turn.command = Some(effect.action);
                turn.replies.extend(effect.emissions);
            },
            Interception::NotMatched if session_started => {
                let welcome = self.engine.welcome(book);
                turn.apply(&mut contact, welcome);

                // The opening message itself may already answer the welcome.
                if !text.is_empty() && normalize_text(text) != WELCOME_TRIGGER {
                    let replay = self
                        .engine
                        .evaluate(book, &Turn::message(&contact.current_step, text).replay());
                    turn.apply(&mut contact, replay);
                }
            },
            Interception::NotMatched if text.is_empty() => {
                debug!(
                    tenant = %contact.tenant_key,
                    contact = %contact.external_id,
                    kind = %event.kind.as_str(),
                    "nothing to match, step unchanged"
                );
            },
            Interception::NotMatched => {
                let prompt_id = match &event.interactive_reply {
                    Some(_) => conversations
                        .last_rule_message(contact.id)
                        .await?
                        .and_then(|m| m.rule_id),
                    None => None,
                };
                let last_prompt = prompt_id.and_then(|id| book.rule(id));
                let transition = self.engine.evaluate(
                    book,
                    &Turn::message(&contact.current_step, text)
                        .with_reply(event.interactive_reply.as_ref(), last_prompt),
                );
                turn.apply(&mut contact, transition);
            },
        }

        turn.step = contact.current_step.clone();
        turn.advisor_flag = contact.advisor_flag;

        let now = now_ms();
        let outbound: Vec<_> = turn
            .replies
            .iter()
            .map(|emission| {
                let mut message = NewMessage::outbound(contact.id, &emission.response, now);
                message.rule_id = emission.rule_id;
                message.step = Some(emission.step.clone());
                message
            })
            .collect();
        let mut record = TurnRecord::new(contact, inbound);
        record.outbound = outbound;
        Ok((record, turn))
    }

    async fn submit_transcription(
        &self,
        tenant: &TenantKey,
        message_id: i64,
        media_ref: String,
    ) -> TranscriptionStatus {
        let Some(pipeline) = &self.transcription else {
            return TranscriptionStatus::None;
        };
        let job = TranscriptionJob {
            tenant: tenant.clone(),
            message_id,
            format: AudioFormat::from_reference(&media_ref),
            media_ref,
        };
        // A rejected job is already marked failed by the pipeline.
        match pipeline.submit(job).await {
            Ok(()) => TranscriptionStatus::Pending,
            Err(_) => TranscriptionStatus::Failed,
        }
    }
}

fn duplicate(tenant: TenantKey, contact: &str, wa_id: &str) -> DispatchOutcome {
    debug!(tenant = %tenant, contact, wa_id, "duplicate delivery dropped");
    #[cfg(feature = "metrics")]
    counter!(dispatch_metrics::DUPLICATES_TOTAL, labels::TENANT => tenant.to_string())
        .increment(1);
    DispatchOutcome::Duplicate {
        tenant,
        provider_message_id: wa_id.to_string(),
    }
}
