//! Logging setup for the facilitator.
//!
//! Structured logs go through the `tracing` facade; [`Telemetry`] wires up
//! a `tracing-subscriber` registry with an `EnvFilter` (`RUST_LOG`, default
//! `info`) and a fmt layer, and hands out the HTTP request-tracing layer
//! for the axum router.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Builder-style logging initialization.
#[derive(Debug, Default)]
pub struct Telemetry {
    name: Option<&'static str>,
    version: Option<&'static str>,
}

impl Telemetry {
    pub fn new() -> Self {
        Telemetry::default()
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = Some(version);
        self
    }

    /// Install the global subscriber. Call once, at startup.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
        tracing::info!(
            service = self.name.unwrap_or("unknown"),
            version = self.version.unwrap_or("unknown"),
            "logging initialized"
        );
        self
    }

    /// Per-request HTTP tracing for the axum router.
    pub fn http_tracing(&self) -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
        TraceLayer::new_for_http()
    }
}
