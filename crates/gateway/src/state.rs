use std::sync::Arc;

#[cfg(feature = "metrics")]
use parley_metrics::MetricsHandle;

use {
    parley_config::ParleyConfig,
    parley_tenants::{ConnectionRouter, TenantRegistry},
};

use crate::dispatcher::Dispatcher;

/// Everything request handlers share.
pub struct GatewayState {
    pub config: Arc<ParleyConfig>,
    pub dispatcher: Arc<Dispatcher>,
    pub version: &'static str,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<MetricsHandle>,
}

impl GatewayState {
    pub fn new(config: Arc<ParleyConfig>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            version: env!("CARGO_PKG_VERSION"),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics_handle(mut self, handle: MetricsHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn router(&self) -> &Arc<ConnectionRouter> {
        self.dispatcher.router()
    }

    pub fn registry(&self) -> &Arc<dyn TenantRegistry> {
        self.dispatcher.router().registry()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
}
