//! Metric name and label definitions.
//!
//! Every metric parley records is named here so the exported surface is
//! documented in one place.

/// HTTP request metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "parley_http_requests_total";
    /// Webhook payloads rejected by signature verification
    pub const WEBHOOK_REJECTED_TOTAL: &str = "parley_http_webhook_rejected_total";
}

/// Inbound dispatch metrics
pub mod dispatch {
    /// Inbound events accepted by the dispatcher
    pub const EVENTS_TOTAL: &str = "parley_dispatch_events_total";
    /// Events dropped because their provider message id was already processed
    pub const DUPLICATES_TOTAL: &str = "parley_dispatch_duplicates_total";
    /// Events that failed (tenant not found, store unavailable, timeouts)
    pub const ERRORS_TOTAL: &str = "parley_dispatch_errors_total";
    /// End-to-end dispatch duration in seconds
    pub const DURATION_SECONDS: &str = "parley_dispatch_duration_seconds";
}

/// Rule engine metrics
pub mod rules {
    /// Inbound messages that matched a rule
    pub const MATCHES_TOTAL: &str = "parley_rules_matches_total";
    /// Inbound messages that matched no rule at the current step
    pub const MISSES_TOTAL: &str = "parley_rules_misses_total";
    /// Rules pointing at unknown steps
    pub const CONFIG_ERRORS_TOTAL: &str = "parley_rules_config_errors_total";
    /// Global commands intercepted before rule evaluation
    pub const COMMANDS_TOTAL: &str = "parley_rules_commands_total";
}

/// Session gate metrics
pub mod sessions {
    /// Time spent waiting for a contact lock, in seconds
    pub const LOCK_WAIT_SECONDS: &str = "parley_session_lock_wait_seconds";
    /// Lock acquisitions that timed out
    pub const LOCK_TIMEOUTS_TOTAL: &str = "parley_session_lock_timeouts_total";
    /// Critical sections that exceeded their deadline
    pub const TIMEOUTS_TOTAL: &str = "parley_session_timeouts_total";
    /// Sessions reset because of inactivity
    pub const EXPIRED_TOTAL: &str = "parley_session_expired_total";
    /// Contacts created on first contact
    pub const CONTACTS_CREATED_TOTAL: &str = "parley_session_contacts_created_total";
}

/// Connection router metrics
pub mod router {
    /// Tenant store connections established
    pub const CONNECTS_TOTAL: &str = "parley_router_connects_total";
    /// Connection attempts that failed after all retries
    pub const CONNECT_FAILURES_TOTAL: &str = "parley_router_connect_failures_total";
    /// Handles closed by idle eviction
    pub const EVICTIONS_TOTAL: &str = "parley_router_evictions_total";
    /// Currently cached tenant handles
    pub const HANDLES_ACTIVE: &str = "parley_router_handles_active";
}

/// Transcription pipeline metrics
pub mod transcription {
    /// Jobs accepted into the queue
    pub const SUBMITTED_TOTAL: &str = "parley_transcription_submitted_total";
    /// Jobs rejected because the backlog was full
    pub const REJECTED_TOTAL: &str = "parley_transcription_rejected_total";
    /// Jobs that produced a transcript
    pub const COMPLETED_TOTAL: &str = "parley_transcription_completed_total";
    /// Jobs that failed or timed out
    pub const FAILED_TOTAL: &str = "parley_transcription_failed_total";
    /// Job duration in seconds
    pub const DURATION_SECONDS: &str = "parley_transcription_duration_seconds";
}

/// Outbound delivery metrics
pub mod outbound {
    /// Responses handed to the transport
    pub const SENT_TOTAL: &str = "parley_outbound_sent_total";
    /// Responses the transport failed to deliver
    pub const FAILED_TOTAL: &str = "parley_outbound_failed_total";
}

/// Common label keys
pub mod labels {
    pub const TENANT: &str = "tenant";
    pub const KIND: &str = "kind";
    pub const REASON: &str = "reason";
    pub const HANDLER: &str = "handler";
    pub const ROUTE: &str = "route";
    pub const STATUS: &str = "status";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    /// Request and dispatch durations, 1ms to 30s
    pub const DISPATCH_DURATION: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    /// Lock waits, 100µs to 10s
    pub const LOCK_WAIT: &[f64] = &[
        0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0,
    ];

    /// Transcription jobs, 100ms to 5 minutes
    pub const TRANSCRIPTION_DURATION: &[f64] = &[
        0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0,
    ];
}
