//! Filter Language Scenario Tests
//!
//! End-to-end checks of compiled programs against realistic records:
//! - status filtering with implicit and explicit AND blocks
//! - derived values written into the scratch environment
//! - converter calls through a host
//! - determinism across repeated evaluations

use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

use xavyo_record_filter::{ConverterHost, EvalContext, FilterCache, FilterProgram, Scratch};

/// Converter host that upper-cases values and counts calls.
struct UppercaseHost {
    calls: AtomicUsize,
}

impl UppercaseHost {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConverterHost for UppercaseHost {
    fn invoke(
        &self,
        name: &str,
        _record: &Value,
        value: Value,
        params: &Map<String, Value>,
    ) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (name, value) {
            ("uppercase", Value::String(s)) => Ok(Value::String(s.to_uppercase())),
            ("split", Value::String(s)) => {
                let on = params.get("on").and_then(Value::as_str).unwrap_or(",");
                let index = params.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                Ok(s.split(on)
                    .nth(index)
                    .map_or(Value::Null, |p| Value::String(p.to_string())))
            }
            (_, other) => Ok(other),
        }
    }
}

fn check(program: &FilterProgram, record: &Value) -> bool {
    let mut scratch = Scratch::new();
    program
        .check(EvalContext::new(record), &mut scratch)
        .unwrap()
}

#[test]
fn test_active_status_filter() {
    let program = FilterProgram::compile(r#"AND { record.status == "active"; }"#).unwrap();
    assert!(check(&program, &json!({"status": "active", "id": 1})));
    assert!(!check(&program, &json!({"status": "inactive", "id": 2})));
}

#[test]
fn test_asset_inventory_filter() {
    let program = FilterProgram::compile(
        r#"
        # servers only, skip decommissioned and lab hosts
        record.type == "server";
        record.lifecycle != "decommissioned";
        OR {
            record.network.interfaces.0.ip *= "^10\.";
            startswith(lower(record.hostname), "prod-");
        }
        "#,
    )
    .unwrap();

    let prod = json!({
        "type": "server",
        "lifecycle": "active",
        "hostname": "PROD-db-01",
        "network": {"interfaces": [{"ip": "192.168.1.4"}]}
    });
    let internal = json!({
        "type": "server",
        "lifecycle": "active",
        "hostname": "lab-7",
        "network": {"interfaces": [{"ip": "10.0.0.8"}]}
    });
    let lab = json!({
        "type": "server",
        "lifecycle": "active",
        "hostname": "lab-9",
        "network": {"interfaces": []}
    });
    let retired = json!({
        "type": "server",
        "lifecycle": "decommissioned",
        "hostname": "prod-old",
    });

    assert!(check(&program, &prod));
    assert!(check(&program, &internal));
    assert!(!check(&program, &lab));
    assert!(!check(&program, &retired));
}

#[test]
fn test_derived_values_in_result() {
    let program = FilterProgram::compile(
        r#"
        if (record.email *= "@example\.com$") {
            set result.domain = "example";
            set result.user = split(record.email, "@", 0);
        } else {
            set result.domain = "external";
        }
        "#,
    )
    .unwrap();

    let mut scratch = Scratch::new();
    let record = json!({"email": "ada@example.com"});
    assert!(program
        .check(EvalContext::new(&record), &mut scratch)
        .unwrap());
    assert_eq!(
        scratch.result(),
        &json!({"domain": "example", "user": "ada"})
    );

    scratch.reset();
    let record = json!({"email": "bob@other.org"});
    assert!(program
        .check(EvalContext::new(&record), &mut scratch)
        .unwrap());
    assert_eq!(scratch.result(), &json!({"domain": "external"}));
}

#[test]
fn test_convert_through_host() {
    let host = UppercaseHost::new();
    let program = FilterProgram::compile(
        r#"
        convert("uppercase", record.site) == "HQ";
        convert("split", record.path, on="/", index=1) == "eu";
        "#,
    )
    .unwrap();
    assert_eq!(program.converter_names(), vec!["uppercase", "split"]);

    let record = json!({"site": "hq", "path": "dc/eu/rack1"});
    let mut scratch = Scratch::new();
    let ctx = EvalContext::new(&record).with_converters(&host);
    assert!(program.check(ctx, &mut scratch).unwrap());
    assert_eq!(host.calls(), 2);
}

#[test]
fn test_convert_without_host_filters_out() {
    let program = FilterProgram::compile(r#"convert("uppercase", record.site) == "HQ";"#).unwrap();
    assert!(!check(&program, &json!({"site": "hq"})));
}

#[test]
fn test_evaluation_is_deterministic() {
    let cache = FilterCache::new();
    let program = cache
        .get_or_compile(r#"set tmp.n = int(record.n); tmp.n >= 5;"#)
        .unwrap();
    let record = json!({"n": "7"});

    let first = check(&program, &record);
    for _ in 0..10 {
        assert_eq!(check(&program, &record), first);
    }
    assert!(first);
}

#[test]
fn test_compile_errors_reach_the_caller() {
    let err = FilterProgram::compile(r#"record.status == "active""#).unwrap_err();
    assert!(err.to_string().contains("at position 25"));

    let err = FilterProgram::compile("exec(record.cmd) == 0;").unwrap_err();
    assert!(err.message.contains("Unknown function 'exec'"));
}
