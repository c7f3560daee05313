use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config_base::EnvSource;
use crate::errors::ConfigError;

/// One JSON log line as written by [`JsonFormatter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredLogEntry {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub service: String,
    /// Structured fields attached to the event (`provider = %kind`, ...)
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

/// Layer that renders every event as a single JSON line.
pub struct JsonFormatter {
    service: String,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonFormatter {
    /// Writes to stderr; stdout carries command output.
    pub fn stderr(service: impl Into<String>) -> Self {
        Self::with_writer(service, io::stderr())
    }

    pub fn with_writer(service: impl Into<String>, writer: impl Write + Send + 'static) -> Self {
        Self {
            service: service.into(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    fn entry_for(&self, event: &Event<'_>) -> StructuredLogEntry {
        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        StructuredLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level: event.metadata().level().to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            service: self.service.clone(),
            fields: visitor.fields,
        }
    }
}

impl<S> Layer<S> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let entry = self.entry_for(event);

        if let Ok(json) = serde_json::to_string(&entry) {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = writeln!(writer, "{}", json);
        }
    }
}

#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(
                field.name().to_string(),
                Value::String(format!("{:?}", value)),
            );
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields
                .insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), Value::Number(value.into()));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.fields.insert(field.name().to_string(), Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), Value::Bool(value));
    }
}

/// Logging setup, normally read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set
    pub level: Level,
    pub json_output: bool,
    /// Only applies to the human-readable format
    pub color_output: bool,
    pub include_line_numbers: bool,
    pub service_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_output: false,
            color_output: true,
            include_line_numbers: cfg!(debug_assertions),
            service_name: "diary-router".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Reads `MONITORING_LOG_LEVEL` and `MONITORING_LOG_JSON`.
    pub fn from_source(env: &EnvSource<'_>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = env.get("MONITORING_LOG_LEVEL") {
            config.level = Level::from_str(&raw).map_err(|e| ConfigError::Invalid {
                key: "MONITORING_LOG_LEVEL".to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        config.json_output = env.flag("MONITORING_LOG_JSON", config.json_output)?;

        Ok(config)
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }
}

/// Installs the global subscriber. Fails if one is already set.
pub fn init_structured_logging(config: LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    if config.json_output {
        let subscriber = Registry::default()
            .with(env_filter)
            .with(JsonFormatter::stderr(config.service_name));

        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(true)
            .with_line_number(config.include_line_numbers)
            .with_ansi(config.color_output);

        let subscriber = Registry::default().with(env_filter).with(fmt_layer);

        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}

/// Measures one operation and logs its duration on completion.
pub struct OperationTimer {
    start: std::time::Instant,
    operation_name: String,
    fields: BTreeMap<String, Value>,
}

impl OperationTimer {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation_name: operation_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn add_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Log a successful completion.
    pub fn finish(self) {
        tracing::info!(
            operation = %self.operation_name,
            duration_ms = self.elapsed_ms(),
            success = true,
            fields = ?self.fields,
            "Operation completed"
        );
    }

    pub fn finish_with_result<T>(self, result: &Result<T, impl std::fmt::Display>) {
        match result {
            Ok(_) => self.finish(),
            Err(e) => {
                let duration_ms = self.elapsed_ms();
                tracing::error!(
                    operation = %self.operation_name,
                    duration_ms = duration_ms,
                    success = false,
                    error = %e,
                    fields = ?self.fields,
                    "Operation failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_json_formatter_writes_fields() {
        let buffer = SharedBuffer::default();
        let subscriber =
            Registry::default().with(JsonFormatter::with_writer("test-service", buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(provider = "openai", attempt = 2u64, "retrying");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let entry: StructuredLogEntry = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(entry.level, "WARN");
        assert_eq!(entry.message, "retrying");
        assert_eq!(entry.service, "test-service");
        assert_eq!(entry.fields["provider"], Value::String("openai".to_string()));
        assert_eq!(entry.fields["attempt"], Value::from(2u64));
    }

    #[test]
    fn test_logging_config_from_source() {
        let vars: HashMap<&str, &str> = [
            ("MONITORING_LOG_LEVEL", "debug"),
            ("MONITORING_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        let env = EnvSource::from_fn(|key| vars.get(key).map(|v| v.to_string()));

        let config = LoggingConfig::from_source(&env).unwrap();
        assert_eq!(config.level, Level::DEBUG);
        assert!(config.json_output);
    }

    #[test]
    fn test_logging_config_rejects_bad_level() {
        let env = EnvSource::from_fn(|key| {
            (key == "MONITORING_LOG_LEVEL").then(|| "loud".to_string())
        });
        assert!(LoggingConfig::from_source(&env).is_err());
    }
}
