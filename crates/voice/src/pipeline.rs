//! Background transcription of voice notes.
//!
//! Submission is a non-blocking send into a bounded queue drained by a fixed
//! set of workers. A worker fetches the media, normalizes it, checks its
//! duration, transcribes it and reports the outcome to a [`TranscriptSink`].
//! Workers only ever touch the message they were given.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    parley_channels::MediaStore,
    parley_common::types::TenantKey,
    parley_config::TranscriptionConfig,
    tokio::{
        sync::{Mutex, RwLock, mpsc},
        task::JoinHandle,
        time::{Instant, timeout},
    },
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, histogram, labels, transcription as tx_metrics};

use crate::{
    audio::{AudioFormat, parse_wav},
    error::{Error, Result},
    normalize::AudioNormalizer,
    stt::{SttProvider, TranscribeRequest},
};

/// One voice note to transcribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionJob {
    pub tenant: TenantKey,
    pub message_id: i64,
    pub media_ref: String,
    pub format: AudioFormat,
}

/// Receives job outcomes. Implementations update the message row.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn completed(&self, job: &TranscriptionJob, text: &str);

    async fn failed(&self, job: &TranscriptionJob, error: &Error);
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub backlog: usize,
    pub job_timeout: Duration,
    pub max_duration_ms: u64,
    pub language: Option<String>,
}

impl From<&TranscriptionConfig> for PipelineOptions {
    fn from(config: &TranscriptionConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            backlog: config.backlog.max(1),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
            max_duration_ms: config.max_duration_ms,
            language: config.language.clone(),
        }
    }
}

/// The collaborators a worker needs.
#[derive(Clone)]
pub struct PipelineDeps {
    pub media: Arc<dyn MediaStore>,
    pub normalizer: Arc<dyn AudioNormalizer>,
    pub stt: Arc<dyn SttProvider>,
    pub sink: Arc<dyn TranscriptSink>,
}

pub struct TranscriptionPipeline {
    tx: RwLock<Option<mpsc::Sender<TranscriptionJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    sink: Arc<dyn TranscriptSink>,
    capacity: usize,
}

impl TranscriptionPipeline {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(options: PipelineOptions, deps: PipelineDeps) -> Self {
        let capacity = options.backlog.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));
        let options = Arc::new(options);

        let workers = (0..options.workers.max(1))
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&options),
                    deps.clone(),
                ))
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), backlog = capacity, "transcription pipeline started");

        Self {
            tx: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            sink: deps.sink,
            capacity,
        }
    }

    /// Queue a job without waiting. When the queue is full or closed the
    /// message is marked failed and the error returned.
    pub async fn submit(&self, job: TranscriptionJob) -> Result<()> {
        let sent = match self.tx.read().await.as_ref() {
            Some(tx) => tx.try_send(job),
            None => Err(mpsc::error::TrySendError::Closed(job)),
        };
        let (job, error) = match sent {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                counter!(tx_metrics::SUBMITTED_TOTAL).increment(1);
                return Ok(());
            },
            Err(mpsc::error::TrySendError::Full(job)) => (job, Error::Backpressure {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(job)) => (job, Error::Closed),
        };

        warn!(
            tenant = %job.tenant,
            message_id = job.message_id,
            error = %error,
            "transcription rejected"
        );
        #[cfg(feature = "metrics")]
        counter!(tx_metrics::REJECTED_TOTAL, labels::REASON => error.reason()).increment(1);
        self.sink.failed(&job, &error).await;
        Err(error)
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn shutdown(&self) {
        self.tx.write().await.take();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "transcription worker ended abnormally");
            }
        }
        info!("transcription pipeline drained");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<TranscriptionJob>>>,
    options: Arc<PipelineOptions>,
    deps: PipelineDeps,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(job) = next else {
            debug!(worker = id, "transcription worker exiting");
            return;
        };

        let started = Instant::now();
        let outcome = match timeout(options.job_timeout, transcribe(&job, &options, &deps)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(options.job_timeout.as_secs())),
        };
        #[cfg(feature = "metrics")]
        histogram!(tx_metrics::DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match outcome {
            Ok(text) => {
                debug!(
                    worker = id,
                    tenant = %job.tenant,
                    message_id = job.message_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "transcription done"
                );
                #[cfg(feature = "metrics")]
                counter!(tx_metrics::COMPLETED_TOTAL).increment(1);
                deps.sink.completed(&job, &text).await;
            },
            Err(error) => {
                warn!(
                    worker = id,
                    tenant = %job.tenant,
                    message_id = job.message_id,
                    media_ref = %job.media_ref,
                    error = %error,
                    "transcription failed"
                );
                #[cfg(feature = "metrics")]
                counter!(tx_metrics::FAILED_TOTAL, labels::REASON => error.reason()).increment(1);
                deps.sink.failed(&job, &error).await;
            },
        }
    }
}

async fn transcribe(
    job: &TranscriptionJob,
    options: &PipelineOptions,
    deps: &PipelineDeps,
) -> Result<String> {
    let audio = deps.media.fetch(&job.tenant, &job.media_ref).await?;
    let wav = deps.normalizer.normalize(audio, job.format).await?;

    let duration_ms = parse_wav(&wav)?.duration_ms();
    if duration_ms > options.max_duration_ms {
        return Err(Error::TooLong {
            duration_ms,
            max_ms: options.max_duration_ms,
        });
    }

    let transcript = deps
        .stt
        .transcribe(TranscribeRequest {
            audio: wav,
            format: AudioFormat::Wav,
            language: options.language.clone(),
        })
        .await?;
    let text = transcript.text.trim();
    if text.is_empty() {
        return Err(Error::EmptyTranscript);
    }
    Ok(text.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{audio::silent_wav, normalize::WavPassthrough, stt::Transcript},
        bytes::Bytes,
        parley_channels::FsMediaStore,
        std::sync::Mutex as StdMutex,
        tokio::sync::{Notify, Semaphore},
    };

    #[derive(Default)]
    struct CollectingSink {
        done: StdMutex<Vec<(i64, String)>>,
        failed: StdMutex<Vec<(i64, &'static str)>>,
        notify: Notify,
    }

    impl CollectingSink {
        fn done(&self) -> Vec<(i64, String)> {
            self.done.lock().unwrap().clone()
        }

        fn failed(&self) -> Vec<(i64, &'static str)> {
            self.failed.lock().unwrap().clone()
        }

        async fn wait_for(&self, total: usize) {
            loop {
                let notified = self.notify.notified();
                if self.done().len() + self.failed().len() >= total {
                    return;
                }
                notified.await;
            }
        }
    }

    #[async_trait]
    impl TranscriptSink for CollectingSink {
        async fn completed(&self, job: &TranscriptionJob, text: &str) {
            self.done.lock().unwrap().push((job.message_id, text.to_string()));
            self.notify.notify_waiters();
        }

        async fn failed(&self, job: &TranscriptionJob, error: &Error) {
            self.failed.lock().unwrap().push((job.message_id, error.reason()));
            self.notify.notify_waiters();
        }
    }

    /// Returns a fixed text; optionally blocks until a permit is released.
    struct FixedStt {
        text: &'static str,
        gate: Option<Arc<Semaphore>>,
    }

    #[async_trait]
    impl SttProvider for FixedStt {
        fn id(&self) -> &'static str {
            "fixed"
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn transcribe(&self, _request: TranscribeRequest) -> Result<Transcript> {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|e| Error::Engine(e.to_string()))?;
            }
            Ok(Transcript {
                text: self.text.into(),
                language: None,
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        media: Arc<FsMediaStore>,
        sink: Arc<CollectingSink>,
        tenant: TenantKey,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            media: Arc::new(FsMediaStore::new(dir.path())),
            _dir: dir,
            sink: Arc::new(CollectingSink::default()),
            tenant: TenantKey::parse("acme").unwrap(),
        }
    }

    fn options(workers: usize, backlog: usize) -> PipelineOptions {
        PipelineOptions {
            workers,
            backlog,
            job_timeout: Duration::from_secs(5),
            max_duration_ms: 10_000,
            language: Some("es".into()),
        }
    }

    impl Fixture {
        fn deps(&self, stt: FixedStt) -> PipelineDeps {
            PipelineDeps {
                media: self.media.clone(),
                normalizer: Arc::new(WavPassthrough),
                stt: Arc::new(stt),
                sink: self.sink.clone(),
            }
        }

        async fn job(&self, message_id: i64, duration_ms: u32) -> TranscriptionJob {
            let media_ref = self
                .media
                .store(&self.tenant, Bytes::from(silent_wav(duration_ms, 16_000)), "wav")
                .await
                .unwrap();
            TranscriptionJob {
                tenant: self.tenant.clone(),
                message_id,
                media_ref,
                format: AudioFormat::Wav,
            }
        }
    }

    #[tokio::test]
    async fn completes_jobs() {
        let fx = fixture();
        let pipeline = TranscriptionPipeline::start(
            options(2, 4),
            fx.deps(FixedStt {
                text: "  hola, quiero pagar ",
                gate: None,
            }),
        );
        pipeline.submit(fx.job(1, 1000).await).await.unwrap();
        pipeline.submit(fx.job(2, 1200).await).await.unwrap();
        fx.sink.wait_for(2).await;

        let mut done = fx.sink.done();
        done.sort();
        assert_eq!(done, vec![
            (1, "hola, quiero pagar".to_string()),
            (2, "hola, quiero pagar".to_string())
        ]);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let fx = fixture();
        let pipeline = TranscriptionPipeline::start(
            options(1, 4),
            fx.deps(FixedStt {
                text: "   ",
                gate: None,
            }),
        );
        let missing = TranscriptionJob {
            tenant: fx.tenant.clone(),
            message_id: 1,
            media_ref: "nope.wav".into(),
            format: AudioFormat::Wav,
        };
        pipeline.submit(missing).await.unwrap();
        pipeline.submit(fx.job(2, 20_000).await).await.unwrap();
        pipeline.submit(fx.job(3, 500).await).await.unwrap();
        fx.sink.wait_for(3).await;

        let mut failed = fx.sink.failed();
        failed.sort();
        assert_eq!(failed, vec![(1, "media"), (2, "too_long"), (3, "empty")]);
        assert!(fx.sink.done().is_empty());
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn full_backlog_rejects_with_backpressure() {
        let fx = fixture();
        let gate = Arc::new(Semaphore::new(0));
        let pipeline = TranscriptionPipeline::start(
            options(1, 1),
            fx.deps(FixedStt {
                text: "ok",
                gate: Some(Arc::clone(&gate)),
            }),
        );

        // First job occupies the worker, second fills the queue.
        pipeline.submit(fx.job(1, 100).await).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.submit(fx.job(2, 100).await).await.unwrap();

        let err = pipeline.submit(fx.job(3, 100).await).await.unwrap_err();
        assert!(matches!(err, Error::Backpressure { capacity: 1 }));
        assert_eq!(fx.sink.failed(), vec![(3, "backpressure")]);

        gate.add_permits(2);
        fx.sink.wait_for(3).await;
        pipeline.shutdown().await;
        assert_eq!(fx.sink.done().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_drains_queue_and_closes() {
        let fx = fixture();
        let pipeline = TranscriptionPipeline::start(
            options(1, 8),
            fx.deps(FixedStt {
                text: "ok",
                gate: None,
            }),
        );
        for id in 1..=5 {
            pipeline.submit(fx.job(id, 100).await).await.unwrap();
        }
        pipeline.shutdown().await;
        assert_eq!(fx.sink.done().len(), 5);

        let err = pipeline.submit(fx.job(6, 100).await).await.unwrap_err();
        assert!(matches!(err, Error::Closed));
    }

    #[tokio::test]
    async fn slow_jobs_time_out() {
        let fx = fixture();
        let mut opts = options(1, 2);
        opts.job_timeout = Duration::from_millis(50);
        let pipeline = TranscriptionPipeline::start(
            opts,
            fx.deps(FixedStt {
                text: "never",
                gate: Some(Arc::new(Semaphore::new(0))),
            }),
        );
        pipeline.submit(fx.job(1, 100).await).await.unwrap();
        fx.sink.wait_for(1).await;
        assert_eq!(fx.sink.failed(), vec![(1, "timeout")]);
        pipeline.shutdown().await;
    }
}
