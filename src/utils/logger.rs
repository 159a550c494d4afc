use std::fmt::Write as _;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingConfig;

#[derive(Default)]
struct FieldCollector {
    fields: Map<String, Value>,
}

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for FieldCollector {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::from(format!("{:?}", value)));
    }
}

/// Attribute names that never reach a log line with their value.
const CREDENTIAL_FIELDS: [&str; 5] = ["bearer", "csrf", "anon_key", "token", "password"];

const REDACTED: &str = "[redacted]";

fn is_credential(name: &str) -> bool {
    CREDENTIAL_FIELDS.contains(&name) || name.ends_with("_token")
}

/// Dotted semantic-convention names for the flat field names our events use.
fn attribute_name(field: &str) -> &str {
    match field {
        "event_name" => "event.name",
        "event_domain" => "event.domain",
        "user_id" => "enduser.id",
        other => other,
    }
}

/// One JSON object per line, shaped after the OpenTelemetry log data model.
#[derive(Clone)]
struct JsonLineFormatter {
    service_name: String,
    service_version: String,
}

fn severity_number(level: &Level) -> u64 {
    match *level {
        Level::TRACE => 1,
        Level::DEBUG => 5,
        Level::INFO => 9,
        Level::WARN => 13,
        Level::ERROR => 17,
    }
}

impl JsonLineFormatter {
    /// Build the log record for one event's recorded fields. Credentials are
    /// replaced before anything is serialized.
    fn record(
        &self,
        level: &Level,
        target: &str,
        event_name: &str,
        fields: Map<String, Value>,
        timestamp: String,
    ) -> Value {
        let mut body = None;
        let mut attributes = Map::new();
        for (name, value) in fields {
            if name == "message" {
                body = value.as_str().map(str::to_string);
                continue;
            }
            let value = if is_credential(&name) {
                Value::from(REDACTED)
            } else {
                value
            };
            attributes.insert(attribute_name(&name).to_string(), value);
        }
        attributes.insert("code.target".to_string(), Value::from(target));

        let mut resource = Map::new();
        resource.insert("service.name".to_string(), Value::from(self.service_name.as_str()));
        resource.insert(
            "service.version".to_string(),
            Value::from(self.service_version.as_str()),
        );

        let mut root = Map::new();
        root.insert("timestamp".to_string(), Value::from(timestamp));
        root.insert("severity_text".to_string(), Value::from(level.as_str()));
        root.insert("severity_number".to_string(), Value::from(severity_number(level)));
        root.insert(
            "body".to_string(),
            Value::from(body.unwrap_or_else(|| event_name.to_string())),
        );
        root.insert("resource".to_string(), Value::Object(resource));
        root.insert("attributes".to_string(), Value::Object(attributes));
        Value::Object(root)
    }
}

impl<S, N> FormatEvent<S, N> for JsonLineFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();
        let mut collector = FieldCollector::default();
        event.record(&mut collector);

        let record = self.record(
            metadata.level(),
            metadata.target(),
            metadata.name(),
            collector.fields,
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        let serialized = serde_json::to_string(&record).map_err(|_| std::fmt::Error)?;
        writer.write_str(&serialized)?;
        writer.write_char('\n')
    }
}

/// Parse a configured level name into a filter.
pub fn parse_level(level: &str) -> Result<LevelFilter, String> {
    match level.trim().to_lowercase().as_str() {
        "trace" => Ok(LevelFilter::TRACE),
        "debug" => Ok(LevelFilter::DEBUG),
        "info" => Ok(LevelFilter::INFO),
        "warn" => Ok(LevelFilter::WARN),
        "error" => Ok(LevelFilter::ERROR),
        other => Err(format!(
            "Invalid logging.level '{}'. Valid values: trace, debug, info, warn, error",
            other
        )),
    }
}

/// Install the global subscriber. `RUST_LOG` directives are layered on top of
/// the configured level. `log` records (reqwest, hyper) are bridged in.
pub fn init_logging(logging_config: &LoggingConfig) -> Result<(), String> {
    let level_filter = parse_level(&logging_config.level)?;

    tracing_log::LogTracer::init().map_err(|e| format!("Failed to bridge log records: {}", e))?;

    let filter_layer = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter_layer);
    let result = match logging_config.format.to_lowercase().as_str() {
        "json" => tracing::subscriber::set_global_default(registry.with(
            fmt::layer().event_format(JsonLineFormatter {
                service_name: logging_config.service_name.clone(),
                service_version: logging_config.service_version.clone(),
            }),
        )),
        // "console" and anything unrecognised
        _ => tracing::subscriber::set_global_default(registry.with(fmt::layer().pretty())),
    };

    result.map_err(|e| format!("Failed to install tracing subscriber: {}", e))
}
