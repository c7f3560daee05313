use common::{JsonFormatter, OperationTimer, StructuredLogEntry};
use serde_json::Value;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn entries(&self) -> Vec<StructuredLogEntry> {
        let raw = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        raw.lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn capture_logs(f: impl FnOnce()) -> Vec<StructuredLogEntry> {
    let capture = Capture::default();
    let subscriber =
        Registry::default().with(JsonFormatter::with_writer("diary-router", capture.clone()));
    tracing::subscriber::with_default(subscriber, f);
    capture.entries()
}

#[test]
fn test_operation_timer_logs_success() {
    let entries = capture_logs(|| {
        let mut timer = OperationTimer::new("router_generate");
        timer.add_field("user_id", "u-1");
        timer.finish();
    });

    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.level, "INFO");
    assert_eq!(entry.message, "Operation completed");
    assert_eq!(entry.service, "diary-router");
    assert_eq!(entry.fields["operation"], Value::from("router_generate"));
    assert_eq!(entry.fields["success"], Value::Bool(true));
    assert!(entry.fields["fields"].as_str().unwrap().contains("u-1"));
}

#[test]
fn test_ok_result_logs_like_finish() {
    let entries = capture_logs(|| {
        OperationTimer::new("save_note").finish_with_result(&Ok::<(), String>(()));
    });

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Operation completed");
    assert_eq!(entries[0].fields["success"], Value::Bool(true));
}

#[test]
fn test_operation_timer_logs_failure_with_error() {
    let entries = capture_logs(|| {
        let timer = OperationTimer::new("save_note");
        timer.finish_with_result(&Err::<(), _>("disk full"));
    });

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, "ERROR");
    assert_eq!(entries[0].message, "Operation failed");
    assert_eq!(entries[0].fields["error"], Value::from("disk full"));
    assert_eq!(entries[0].fields["success"], Value::Bool(false));
}

#[test]
fn test_one_line_per_event() {
    let entries = capture_logs(|| {
        tracing::info!(provider = "openai", "first");
        tracing::debug!(latency_ms = 12.5, "second");
    });

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].fields["latency_ms"], Value::from(12.5));
    assert!(entries.iter().all(|e| e.target.starts_with("test_structured_logging")));
}
