use std::{fs, path::PathBuf, sync::OnceLock};

use anyhow::Context;
use opentelemetry::global;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::{Resource, logs::SdkLoggerProvider, metrics::SdkMeterProvider};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    filter::Directive,
    fmt::{self, writer::BoxMakeWriter},
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
};

pub const LOG_FILE_PREFIX: &str = "signal-relay.log";
const SERVICE_NAME: &str = "signal-relay";

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `channel_signal=debug,info`.
    pub log_level: String,
    /// Daily rolling files go here. Without it logs go to stderr.
    pub log_dir: Option<PathBuf>,
    pub json: bool,
    /// OTLP/HTTP collector base address, e.g. `http://localhost:4318`.
    pub otel_endpoint: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_level: "info".to_string(),
            log_dir: None,
            json: false,
            otel_endpoint: None,
        }
    }
}

/// Keep alive for the life of the process. Dropping it flushes the file
/// writer and shuts down the OTLP providers.
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
    logger_provider: Option<SdkLoggerProvider>,
    meter_provider: Option<SdkMeterProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.meter_provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("metrics provider shutdown failed: {err}");
            }
        }
        if let Some(provider) = self.logger_provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("logger provider shutdown failed: {err}");
            }
        }
    }
}

type Base = Layered<EnvFilter, Registry>;

/// Installs the global subscriber. Never writes to stdout, which carries the
/// JSON-RPC stream.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level `{}`", config.log_level))?;

    let (writer, file_guard) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log dir {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };
    let fmt_layer: Box<dyn Layer<Base> + Send + Sync> = if config.json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer()
            .with_ansi(config.log_dir.is_none())
            .with_writer(writer)
            .boxed()
    };

    let (otel_layer, logger_provider, meter_provider) = match config.otel_endpoint.as_deref() {
        Some(endpoint) => {
            let logger_provider = init_logs(endpoint)?;
            let meter_provider = init_metrics(endpoint)?;
            global::set_meter_provider(meter_provider.clone());

            // the exporters' own http stack must not feed back into the bridge
            let mut otel_filter = EnvFilter::try_new(&config.log_level)?;
            for directive in ["hyper=off", "h2=off", "reqwest=off", "opentelemetry=off"] {
                otel_filter = otel_filter.add_directive(directive.parse::<Directive>()?);
            }
            let bridge = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(otel_filter);
            (Some(bridge), Some(logger_provider), Some(meter_provider))
        }
        None => (None, None, None),
    };

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(TelemetryGuard {
        _file_guard: file_guard,
        logger_provider,
        meter_provider,
    })
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn signal_endpoint(base: &str, signal: &str) -> String {
    format!("{}/v1/{signal}", base.trim_end_matches('/'))
}

fn init_logs(endpoint: &str) -> anyhow::Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(signal_endpoint(endpoint, "logs"))
        .build()
        .context("cannot build OTLP log exporter")?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_metrics(endpoint: &str) -> anyhow::Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(signal_endpoint(endpoint, "metrics"))
        .build()
        .context("cannot build OTLP metric exporter")?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_signal_endpoint() {
        assert_eq!(
            signal_endpoint("http://localhost:4318/", "logs"),
            "http://localhost:4318/v1/logs"
        );
        assert_eq!(
            signal_endpoint("http://collector:4318", "metrics"),
            "http://collector:4318/v1/metrics"
        );
    }

    #[test]
    fn test_invalid_level_is_rejected() {
        let config = LogConfig {
            log_level: "channel_signal=loudest".to_string(),
            ..Default::default()
        };
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn test_file_logging_writes_under_log_dir() {
        let dir = tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        let config = LogConfig {
            log_dir: Some(log_dir.clone()),
            ..Default::default()
        };
        let guard = init_tracing(&config).unwrap();
        tracing::info!(account = "+1", "hello from the relay");
        drop(guard);

        let files: Vec<_> = fs::read_dir(&log_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(files.iter().any(|f| f.starts_with(LOG_FILE_PREFIX)), "{files:?}");
        let written: String = files
            .iter()
            .map(|f| fs::read_to_string(log_dir.join(f)).unwrap())
            .collect();
        assert!(written.contains("hello from the relay"));
    }
}
