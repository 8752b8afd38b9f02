//! Writes transcription outcomes back to the message row.

use std::sync::Arc;

use {
    async_trait::async_trait,
    parley_store::{ConversationStore, TranscriptionStatus},
    parley_tenants::ConnectionRouter,
    parley_voice::{TranscriptSink, TranscriptionJob},
    tracing::{debug, warn},
};

/// Resolves the job's tenant through the router and patches only the
/// message the job names. Never touches contact state.
pub struct StoreTranscriptSink {
    router: Arc<ConnectionRouter>,
}

impl StoreTranscriptSink {
    pub fn new(router: Arc<ConnectionRouter>) -> Self {
        Self { router }
    }

    async fn record(&self, job: &TranscriptionJob, status: TranscriptionStatus, text: Option<&str>) {
        let handle = match self.router.get(&job.tenant).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    tenant = %job.tenant,
                    message_id = job.message_id,
                    error = %e,
                    "cannot record transcription outcome"
                );
                return;
            },
        };
        match handle
            .conversations()
            .set_transcription(job.message_id, status, text)
            .await
        {
            Ok(true) => {
                debug!(tenant = %job.tenant, message_id = job.message_id, %status, "transcription recorded");
            },
            Ok(false) => {
                debug!(tenant = %job.tenant, message_id = job.message_id, "message gone before transcription finished");
            },
            Err(e) => {
                warn!(
                    tenant = %job.tenant,
                    message_id = job.message_id,
                    error = %e,
                    "failed to store transcription outcome"
                );
            },
        }
    }
}

#[async_trait]
impl TranscriptSink for StoreTranscriptSink {
    async fn completed(&self, job: &TranscriptionJob, text: &str) {
        self.record(job, TranscriptionStatus::Done, Some(text)).await;
    }

    async fn failed(&self, job: &TranscriptionJob, error: &parley_voice::Error) {
        debug!(tenant = %job.tenant, message_id = job.message_id, reason = error.reason(), "marking transcription failed");
        self.record(job, TranscriptionStatus::Failed, None).await;
    }
}
