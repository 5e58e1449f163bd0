//! Unified JSON logging with custom format.
//!
//! Log format:
//! ```json
//! {"ts":"2024-12-28T15:04:05.123Z","level":"info","type":"app","msg":"Server started","ctx":{},"data":{}}
//! ```

use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// Log entry with unified structure.
#[derive(Serialize)]
pub struct LogEntry<'a> {
    /// ISO 8601 timestamp with milliseconds, UTC
    pub ts: &'a str,
    /// Log level: debug, info, warn, error
    pub level: &'a str,
    /// Log type: app, access, error
    #[serde(rename = "type")]
    pub log_type: &'a str,
    /// Short human-readable message
    pub msg: &'a str,
    /// Context: request_id, service, etc.
    pub ctx: LogContext<'a>,
    /// Type-specific data
    pub data: HashMap<&'a str, serde_json::Value>,
}

/// Log context.
#[derive(Serialize, Default)]
pub struct LogContext<'a> {
    /// Service name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<&'a str>,
    /// Request ID for correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<&'a str>,
    /// Worker ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<u32>,
}

/// Custom JSON formatter for tracing.
pub struct JsonFormatter {
    service_name: String,
}

impl JsonFormatter {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S, N> FormatEvent<S, N> for JsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let level = match *meta.level() {
            Level::TRACE => "debug",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };

        // Determine log type from target
        let log_type = if meta.target() == "access" {
            "access"
        } else if *meta.level() == Level::ERROR {
            "error"
        } else {
            "app"
        };

        // Collect fields
        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        let ts = Iso8601Timestamp::now();

        // Build message
        let msg = if log_type == "access" {
            // For access logs, build "METHOD /path STATUS"
            let method = visitor
                .fields
                .get("method")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let path = visitor
                .fields
                .get("path")
                .and_then(|v| v.as_str())
                .unwrap_or("?");
            let status = visitor
                .fields
                .get("status")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            format!("{} {} {}", method, path, status)
        } else {
            visitor.message.clone().unwrap_or_default()
        };

        // Build context
        let ctx = serde_json::json!({
            "service": &self.service_name
        });

        // Build data (remove message from fields for app logs)
        let mut data = visitor.fields;
        if log_type != "access" {
            data.remove("message");
        }

        // Build final JSON
        let entry = serde_json::json!({
            "ts": ts.as_str(),
            "level": level,
            "type": log_type,
            "msg": msg,
            "ctx": ctx,
            "data": data,
        });

        writeln!(
            writer,
            "{}",
            serde_json::to_string(&entry).unwrap_or_default()
        )
    }
}

/// Field visitor for collecting tracing fields.
struct FieldVisitor {
    message: Option<String>,
    fields: HashMap<String, serde_json::Value>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: HashMap::new(),
        }
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value).trim_matches('"').to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(format!("{:?}", value)),
            );
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.insert(
                field.name().to_string(),
                serde_json::Value::String(value.to_string()),
            );
        }
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::json!(value));
    }
}

/// Log an access request directly (bypassing tracing for simpler output).
#[allow(clippy::too_many_arguments)]
pub fn log_access(
    ts: &str,
    request_id: &str,
    ip: &str,
    method: &str,
    path: &str,
    query: Option<&str>,
    http: &str,
    status: u16,
    bytes: u64,
    duration_ms: f64,
    ua: Option<&str>,
    referer: Option<&str>,
    xff: Option<&str>,
    tls: Option<&str>,
) {
    let msg = format!("{} {} {}", method, path, status);

    let mut data = serde_json::Map::new();
    data.insert("method".into(), serde_json::json!(method));
    data.insert("path".into(), serde_json::json!(path));
    if let Some(q) = query {
        data.insert("query".into(), serde_json::json!(q));
    }
    data.insert("http".into(), serde_json::json!(http));
    data.insert("status".into(), serde_json::json!(status));
    data.insert("bytes".into(), serde_json::json!(bytes));
    data.insert("duration_ms".into(), serde_json::json!(duration_ms));
    data.insert("ip".into(), serde_json::json!(ip));
    if let Some(u) = ua {
        data.insert("ua".into(), serde_json::json!(u));
    }
    if let Some(r) = referer {
        data.insert("referer".into(), serde_json::json!(r));
    }
    if let Some(x) = xff {
        data.insert("xff".into(), serde_json::json!(x));
    }
    if let Some(t) = tls {
        data.insert("tls".into(), serde_json::json!(t));
    }

    let mut ctx = serde_json::Map::new();
    ctx.insert("service".into(), serde_json::json!("plsgate"));
    ctx.insert("request_id".into(), serde_json::json!(request_id));

    let entry = serde_json::json!({
        "ts": ts,
        "level": "info",
        "type": "access",
        "msg": msg,
        "ctx": ctx,
        "data": data,
    });

    // Write directly to stdout
    let _ = writeln!(io::stdout(), "{}", entry);
}

/// ISO 8601 timestamp buffer - exactly 24 bytes: "2024-01-15T10:30:00.123Z"
/// Stack-allocated, no heap allocation.
#[derive(Clone, Copy)]
pub struct Iso8601Timestamp {
    buf: [u8; 24],
}

impl Iso8601Timestamp {
    /// Create a new timestamp for the current time.
    #[inline]
    pub fn now() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_duration(now)
    }

    /// Create from a Duration since UNIX_EPOCH.
    #[inline]
    pub fn from_duration(duration: Duration) -> Self {
        let secs = duration.as_secs();
        let millis = duration.subsec_millis();

        // Time of day
        let day_secs = secs % 86400;
        let hours = (day_secs / 3600) as u8;
        let minutes = ((day_secs % 3600) / 60) as u8;
        let seconds = (day_secs % 60) as u8;

        // Days since epoch
        let days = secs / 86400;

        // Year calculation (valid for 1970-2099)
        let mut year = 1970u16;
        let mut remaining = days as i64;

        loop {
            let year_days = if is_leap_year(year) { 366 } else { 365 };
            if remaining < year_days {
                break;
            }
            remaining -= year_days;
            year += 1;
        }

        // Month/day calculation
        let leap = is_leap_year(year);
        let month_days: [u8; 12] = if leap {
            [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
        } else {
            [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
        };

        let mut month = 1u8;
        for &days_in_month in &month_days {
            if remaining < days_in_month as i64 {
                break;
            }
            remaining -= days_in_month as i64;
            month += 1;
        }
        let day = (remaining + 1) as u8;

        // Build buffer directly (no format! macro)
        let mut buf = [0u8; 24];
        write_u16_padded(&mut buf[0..4], year);
        buf[4] = b'-';
        write_u8_padded(&mut buf[5..7], month);
        buf[7] = b'-';
        write_u8_padded(&mut buf[8..10], day);
        buf[10] = b'T';
        write_u8_padded(&mut buf[11..13], hours);
        buf[13] = b':';
        write_u8_padded(&mut buf[14..16], minutes);
        buf[16] = b':';
        write_u8_padded(&mut buf[17..19], seconds);
        buf[19] = b'.';
        write_u16_padded_3(&mut buf[20..23], millis as u16);
        buf[23] = b'Z';

        Self { buf }
    }

    /// Get the timestamp as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        // SAFETY: We only write ASCII digits and punctuation
        unsafe { std::str::from_utf8_unchecked(&self.buf) }
    }
}

impl AsRef<str> for Iso8601Timestamp {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for Iso8601Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for Iso8601Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if a year is a leap year.
#[inline]
const fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

/// Write a 4-digit year to buffer (0000-9999).
#[inline]
fn write_u16_padded(buf: &mut [u8], val: u16) {
    buf[0] = b'0' + ((val / 1000) % 10) as u8;
    buf[1] = b'0' + ((val / 100) % 10) as u8;
    buf[2] = b'0' + ((val / 10) % 10) as u8;
    buf[3] = b'0' + (val % 10) as u8;
}

/// Write a 2-digit value to buffer (00-99).
#[inline]
fn write_u8_padded(buf: &mut [u8], val: u8) {
    buf[0] = b'0' + (val / 10);
    buf[1] = b'0' + (val % 10);
}

/// Write a 3-digit milliseconds value to buffer (000-999).
#[inline]
fn write_u16_padded_3(buf: &mut [u8], val: u16) {
    buf[0] = b'0' + ((val / 100) % 10) as u8;
    buf[1] = b'0' + ((val / 10) % 10) as u8;
    buf[2] = b'0' + (val % 10) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_formatting() {
        // 2024-01-15T10:30:00.123Z
        let d = Duration::from_millis(1_705_314_600_123);
        assert_eq!(
            Iso8601Timestamp::from_duration(d).as_str(),
            "2024-01-15T10:30:00.123Z"
        );
    }

    #[test]
    fn timestamp_epoch() {
        let d = Duration::from_secs(0);
        assert_eq!(
            Iso8601Timestamp::from_duration(d).as_str(),
            "1970-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn leap_year_boundary() {
        // 2024-02-29T00:00:00.000Z
        let d = Duration::from_secs(1_709_164_800);
        assert_eq!(
            Iso8601Timestamp::from_duration(d).as_str(),
            "2024-02-29T00:00:00.000Z"
        );
    }
}
