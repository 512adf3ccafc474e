//! Record preparation tests: layered mappings, converters and filters
//! working together through `SyncEngine::prepare`.

use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

use xavyo_ingest::converter::{ConverterParams, ConverterRegistry, FnConverter};
use xavyo_ingest::mapping::MappingLayers;
use xavyo_ingest::sync::{RecordOutcome, SyncEngine};
use xavyo_ingest::ConverterError;

fn converted(outcome: RecordOutcome) -> serde_json::Map<String, Value> {
    match outcome {
        RecordOutcome::Converted(record) => record,
        other => panic!("expected a converted record, got {other:?}"),
    }
}

fn reverse(
    _field: &str,
    _record: &Value,
    value: Value,
    _params: &ConverterParams,
) -> Result<Value, ConverterError> {
    Ok(match value {
        Value::String(s) => Value::String(s.chars().rev().collect()),
        other => other,
    })
}

/// Captures warn events as (message, missing_fields).
#[derive(Clone, Default)]
struct WarnCapture {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

#[derive(Default)]
struct WarnFields {
    message: String,
    missing_fields: String,
}

impl Visit for WarnFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "missing_fields" => self.missing_fields = format!("{value:?}"),
            _ => {}
        }
    }
}

impl<S: Subscriber> Layer<S> for WarnCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::WARN {
            return;
        }
        let mut fields = WarnFields::default();
        event.record(&mut fields);
        self.events
            .lock()
            .unwrap()
            .push((fields.message, fields.missing_fields));
    }
}

// =============================================================================
// Layered mappings
// =============================================================================

#[test]
fn test_layers_from_json_merge_in_precedence_order() {
    let layers: MappingLayers = serde_json::from_value(json!({
        "class_defaults": {
            "NAME": {"source": "name"},
            "SERIAL": {"source": "hw.serial", "converter": "uppercase"},
            "SITE": {"fixed": "hq"}
        },
        "server_defaults": {
            "SITE": {"config": "site"}
        },
        "local_overrides": {
            "NAME": {"source": "display_name", "converter": "trim"},
            "OWNER": {"source": "owner", "required": true}
        }
    }))
    .unwrap();

    let mut engine = SyncEngine::builder()
        .with_mapping_layers(layers)
        .with_config_values(json!({"site": "berlin"}))
        .build()
        .unwrap();

    let record = converted(engine.prepare(&json!({
        "name": "ignored",
        "display_name": "  ws-042  ",
        "hw": {"serial": "abc123"},
        "owner": "jdoe"
    })));

    let keys: Vec<&str> = record.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["NAME", "SERIAL", "SITE", "OWNER"]);
    assert_eq!(record["NAME"], json!("ws-042"));
    assert_eq!(record["SERIAL"], json!("ABC123"));
    assert_eq!(record["SITE"], json!("berlin"));
    assert_eq!(record["OWNER"], json!("jdoe"));
}

#[test]
fn test_required_email_missing_is_dropped() {
    let layers: MappingLayers = serde_json::from_value(json!({
        "local_overrides": {"EMAIL": {"source": "user.mail", "required": true}}
    }))
    .unwrap();
    let mut engine = SyncEngine::builder().with_mapping_layers(layers).build().unwrap();

    match engine.prepare(&json!({"user": {"mail": ""}})) {
        RecordOutcome::Dropped { missing } => assert_eq!(missing, vec!["EMAIL".to_string()]),
        other => panic!("expected a dropped record, got {other:?}"),
    }
}

#[test]
fn test_dropped_record_is_logged_once_with_all_missing_fields() {
    let layers: MappingLayers = serde_json::from_value(json!({
        "local_overrides": {
            "EMAIL": {"source": "user.mail", "required": true},
            "NAME": {"source": "user.name"},
            "PHONE": {"source": "user.phone", "required": true}
        }
    }))
    .unwrap();
    let mut engine = SyncEngine::builder().with_mapping_layers(layers).build().unwrap();

    let capture = WarnCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let outcome = tracing::subscriber::with_default(subscriber, || {
        engine.prepare(&json!({"user": {"mail": "", "name": "Ada"}}))
    });

    assert_eq!(
        outcome,
        RecordOutcome::Dropped {
            missing: vec!["EMAIL".to_string(), "PHONE".to_string()]
        }
    );

    let events = capture.events.lock().unwrap().clone();
    let dropped: Vec<&(String, String)> = events
        .iter()
        .filter(|(message, _)| message == "Record dropped, required fields missing")
        .collect();
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].1, r#"["EMAIL", "PHONE"]"#);
}

// =============================================================================
// Converters
// =============================================================================

#[test]
fn test_split_picks_index_and_passes_null() {
    let layers: MappingLayers = serde_json::from_value(json!({
        "local_overrides": {
            "SECOND": {
                "source": "tags",
                "converter": "split",
                "params": {"on": ",", "index": 1}
            }
        }
    }))
    .unwrap();
    let mut engine = SyncEngine::builder().with_mapping_layers(layers).build().unwrap();

    let record = converted(engine.prepare(&json!({"tags": "a,b,c"})));
    assert_eq!(record["SECOND"], json!("b"));

    let record = converted(engine.prepare(&json!({"tags": null})));
    assert_eq!(record["SECOND"], Value::Null);
}

#[test]
fn test_custom_converter_is_usable_from_mapping_and_filter() {
    let registry = Arc::new(ConverterRegistry::new());
    registry.register(Arc::new(FnConverter::new("reverse", reverse)));

    let layers: MappingLayers = serde_json::from_value(json!({
        "local_overrides": {"CODE": {"source": "code", "converter": "reverse"}}
    }))
    .unwrap();
    let mut engine = SyncEngine::builder()
        .with_filter(r#"convert("reverse", record.code) == "cba";"#)
        .with_mapping_layers(layers)
        .with_converters(registry)
        .build()
        .unwrap();

    let record = converted(engine.prepare(&json!({"code": "abc"})));
    assert_eq!(record["CODE"], json!("cba"));

    assert!(matches!(
        engine.prepare(&json!({"code": "xyz"})),
        RecordOutcome::FilteredOut
    ));
}

#[test]
fn test_unknown_converter_fails_at_build() {
    let layers: MappingLayers = serde_json::from_value(json!({
        "local_overrides": {"CODE": {"source": "code", "converter": "rot13"}}
    }))
    .unwrap();

    let err = SyncEngine::builder().with_mapping_layers(layers).build().unwrap_err();
    assert!(err.to_string().contains("rot13"));
}

// =============================================================================
// Filters
// =============================================================================

#[test]
fn test_active_filter_scenario() {
    let layers: MappingLayers = serde_json::from_value(json!({
        "local_overrides": {"ID": {"source": "id"}}
    }))
    .unwrap();
    let mut engine = SyncEngine::builder()
        .with_filter(r#"AND { record.status == "active"; }"#)
        .with_mapping_layers(layers)
        .build()
        .unwrap();

    let record = converted(engine.prepare(&json!({"status": "active", "id": 1})));
    assert_eq!(record["ID"], json!(1));
    assert!(matches!(
        engine.prepare(&json!({"status": "inactive", "id": 2})),
        RecordOutcome::FilteredOut
    ));
}
