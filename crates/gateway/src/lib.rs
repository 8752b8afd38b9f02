//! HTTP gateway: the WhatsApp webhook, the management API and the inbound
//! dispatcher that ties tenants, sessions, rules and transcription together.

pub mod api_routes;
pub mod auth_middleware;
pub mod dispatcher;
pub mod error;
pub mod extract;
pub mod metrics_middleware;
pub mod metrics_routes;
pub mod server;
pub mod sink;
pub mod state;
pub mod webhook_routes;

pub use {
    dispatcher::{DispatchOutcome, DispatchReport, Dispatcher, DispatcherOptions},
    error::{Error, Result},
    server::{build_gateway_app, build_gateway_state, start_gateway},
    sink::StoreTranscriptSink,
    state::{AppState, GatewayState},
};
