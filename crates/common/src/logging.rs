use std::env;

use opentelemetry::trace::{TraceError, TracerProvider};
use opentelemetry_otlp::WithExportConfig;
use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const OTLP_URL_ENVVAR: &str = "FLASHBAKE_OTLP_URL";
pub const SVC_LABEL_ENVVAR: &str = "FLASHBAKE_SVC_LABEL";

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

#[derive(Debug)]
pub struct LoggerConfig {
    whoami: String,
    otel_url: Option<String>,
}

impl LoggerConfig {
    /// Creates a new empty instance with whoami set.
    pub fn new(whoami: String) -> Self {
        Self {
            whoami,
            otel_url: None,
        }
    }

    pub fn with_base_name(s: &str) -> Self {
        Self::new(get_whoami_string(s))
    }

    pub fn set_otlp_url(&mut self, url: String) {
        self.otel_url = Some(url);
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("flashbake-relay")
    }
}

/// Initializes the logging subsystem with the provided config.
///
/// Stdout logging is always enabled. Spans are additionally exported over
/// OTLP when an endpoint is configured.
pub fn init(config: LoggerConfig) -> Result<(), TraceError> {
    let filt = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout_sub = tracing_subscriber::fmt::layer().compact().with_filter(filt);

    if let Some(otel_url) = &config.otel_url {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(otel_url);

        let tp = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;

        let otel_sub = tracing_opentelemetry::layer().with_tracer(tp.tracer("flashbake-relay"));

        tracing_subscriber::registry()
            .with(stdout_sub)
            .with(otel_sub)
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_sub).init();
    }

    info!(whoami = %config.whoami, otlp = config.otel_url.is_some(), "logging started");
    Ok(())
}

/// Flushes pending spans before the process exits.
pub fn finalize() {
    info!("shutting down logging");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Gets the OTLP URL from the standard envvar.
pub fn get_otlp_url_from_env() -> Option<String> {
    env::var(OTLP_URL_ENVVAR).ok()
}

/// Gets the service label from the standard envvar, which should be included
/// in the whoami string.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_owned(),
    }
}
