//! Dispatcher behaviour across concurrency, session expiry and voice notes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    common::{start, start_with, text_rule},
    parley_channels::FsMediaStore,
    parley_common::types::{InboundEvent, MessageKind, TenantKey},
    parley_gateway::StoreTranscriptSink,
    parley_store::{ConversationStore, Direction, TranscriptionStatus},
    parley_voice::{
        PipelineDeps, PipelineOptions, SttProvider, TARGET_SAMPLE_RATE, TranscribeRequest,
        Transcript, TranscriptionPipeline, WavPassthrough, audio::silent_wav,
    },
    tokio::sync::Semaphore,
};

const CONTACT: &str = "5215550001";

fn default_key() -> TenantKey {
    TenantKey::parse("default").unwrap()
}

#[tokio::test]
async fn concurrent_messages_from_one_contact_are_serialized() {
    let gw = start(|_| {}).await;
    let mut rules = vec![text_rule("menu_principal", "iniciar", "c0", "Bienvenido")];
    for i in 0..=8 {
        rules.push(text_rule(&format!("c{i}"), "*", &format!("c{}", i + 1), &format!("paso {i}")));
    }
    rules.push(text_rule("c9", "*", "", "fin"));
    gw.add_rules("default", rules).await;

    let dispatcher = Arc::clone(&gw.state.dispatcher);
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                let mut event = InboundEvent::text(CONTACT, format!("mensaje {i}"));
                event.provider_message_id = Some(format!("wamid.{i}"));
                dispatcher.dispatch(event).await.unwrap()
            })
        })
        .collect();
    let outcomes = futures::future::join_all(tasks).await;

    let reports: Vec<_> = outcomes
        .into_iter()
        .map(|o| o.unwrap().report().cloned().unwrap())
        .collect();
    assert_eq!(reports.iter().filter(|r| r.session_started).count(), 1);

    // The opening message runs the welcome and is replayed, every other one
    // advances a single step; no update is lost.
    let handle = gw.router().get(&default_key()).await.unwrap();
    let store = handle.conversations();
    let contact = store.get_contact(CONTACT).await.unwrap().unwrap();
    assert_eq!(contact.current_step, "c8");

    let messages = store.list_messages(contact.id, None, 100).await.unwrap();
    let inbound = messages
        .iter()
        .filter(|m| m.direction == Direction::Inbound)
        .count();
    assert_eq!(inbound, 8);

    // Each turn saw the step the previous one left behind.
    let mut steps: Vec<(String, String)> = reports
        .iter()
        .map(|r| (r.previous_step.clone(), r.step.clone()))
        .collect();
    steps.sort_by_key(|(_, to)| to[1..].parse::<u32>().unwrap());
    assert_eq!(steps[0], ("menu_principal".to_string(), "c1".to_string()));
    for pair in steps.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
    }
}

#[tokio::test]
async fn expired_session_restarts_with_notice() {
    let gw = start(|_| {}).await;
    gw.add_rules("default", vec![
        text_rule("menu_principal", "iniciar", "opciones", "Bienvenido"),
        text_rule("opciones", "1", "uno", "Elegiste uno"),
        text_rule("uno", "*", "", "Fin"),
    ])
    .await;
    let dispatcher = &gw.state.dispatcher;

    dispatcher.dispatch(InboundEvent::text(CONTACT, "1")).await.unwrap();
    let handle = gw.router().get(&default_key()).await.unwrap();
    let store = handle.conversations();
    let mut contact = store.get_contact(CONTACT).await.unwrap().unwrap();
    assert_eq!(contact.current_step, "uno");

    // Two hours of silence.
    contact.last_activity_at -= 2 * 60 * 60 * 1000;
    store.save_contact_state(&contact).await.unwrap();
    gw.outbound.clear();

    let report = dispatcher
        .dispatch(InboundEvent::text(CONTACT, "hola"))
        .await
        .unwrap()
        .report()
        .cloned()
        .unwrap();
    assert!(report.session_started);
    assert_eq!(report.previous_step, "uno");
    assert_eq!(report.step, "opciones");

    let notice = gw.state.config.sessions.timeout_notice.clone();
    assert_eq!(gw.outbound.bodies_to(CONTACT), vec![notice, "Bienvenido".to_string()]);
}

/// Blocks every transcription until permits are added.
struct GatedStt {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl SttProvider for GatedStt {
    fn id(&self) -> &'static str {
        "gated"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn transcribe(&self, _request: TranscribeRequest) -> parley_voice::Result<Transcript> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| parley_voice::Error::Engine(e.to_string()))?;
        Ok(Transcript {
            text: "quiero información".into(),
            language: Some("es".into()),
        })
    }
}

fn voice_note(id: usize) -> InboundEvent {
    let mut event = InboundEvent::text(CONTACT, "");
    event.text = None;
    event.kind = MessageKind::Audio;
    event.media_ref = Some(format!("nota{id}.wav"));
    event.provider_message_id = Some(format!("wamid.audio.{id}"));
    event
}

#[tokio::test]
async fn voice_notes_are_transcribed_in_the_background_and_overflow_fails() {
    let media_dir = tempfile::tempdir().unwrap();
    let media = Arc::new(FsMediaStore::new(media_dir.path()));
    for id in 0..4 {
        media
            .store_named(
                &default_key(),
                &format!("nota{id}.wav"),
                &silent_wav(500, TARGET_SAMPLE_RATE),
            )
            .await
            .unwrap();
    }
    let gate = Arc::new(Semaphore::new(0));

    let pipeline_media = Arc::clone(&media);
    let stt_gate = Arc::clone(&gate);
    let gw = start_with(
        |_| {},
        move |dispatcher| {
            let pipeline = TranscriptionPipeline::start(
                PipelineOptions {
                    workers: 1,
                    backlog: 1,
                    job_timeout: Duration::from_secs(10),
                    max_duration_ms: 60_000,
                    language: Some("es".into()),
                },
                PipelineDeps {
                    media: pipeline_media,
                    normalizer: Arc::new(WavPassthrough),
                    stt: Arc::new(GatedStt { gate: stt_gate }),
                    sink: Arc::new(StoreTranscriptSink::new(Arc::clone(dispatcher.router()))),
                },
            );
            dispatcher.with_transcription(Arc::new(pipeline))
        },
    )
    .await;
    gw.add_rules("default", vec![
        text_rule("menu_principal", "iniciar", "opciones", "Bienvenido"),
        text_rule("opciones", "*", "", "Elige una opción"),
    ])
    .await;
    let dispatcher = &gw.state.dispatcher;

    let mut reports = Vec::new();
    for id in 0..4 {
        let report = dispatcher
            .dispatch(voice_note(id))
            .await
            .unwrap()
            .report()
            .cloned()
            .unwrap();
        reports.push(report);
    }

    // One worker busy plus one queued slot: at most two accepted.
    let rejected: Vec<_> = reports
        .iter()
        .filter(|r| r.transcription == TranscriptionStatus::Failed)
        .collect();
    assert!(rejected.len() >= 2, "{reports:?}");
    assert_eq!(reports[0].transcription, TranscriptionStatus::Pending);
    // Voice notes never move the conversation.
    assert!(reports.iter().skip(1).all(|r| r.step == "opciones"));

    gate.add_permits(16);
    let pipeline = Arc::clone(dispatcher.transcription().unwrap());
    pipeline.shutdown().await;

    let handle = gw.router().get(&default_key()).await.unwrap();
    let store = handle.conversations();
    for report in &reports {
        let message = store.get_message(report.message_id).await.unwrap().unwrap();
        match report.transcription {
            TranscriptionStatus::Pending => {
                assert_eq!(message.transcription_status, TranscriptionStatus::Done);
                assert_eq!(message.text.as_deref(), Some("quiero información"));
            },
            TranscriptionStatus::Failed => {
                assert_eq!(message.transcription_status, TranscriptionStatus::Failed);
                assert!(message.text.is_none());
            },
            other => panic!("unexpected status {other:?}"),
        }
    }
    let contact = store.get_contact(CONTACT).await.unwrap().unwrap();
    assert_eq!(contact.current_step, "opciones");
}
