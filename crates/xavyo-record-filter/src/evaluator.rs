//! Evaluator for filter programs against a single record.

use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::ast::{Comparison, ComparisonOp, Expression, FieldPath, PathSegment, Statement};
use crate::error::EvalError;
use crate::functions::{partition_arguments, stringify, ConverterHost, FunctionRegistry};
use crate::scratch::Scratch;

static NULL: Value = Value::Null;

/// Read-only inputs for one evaluation.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    /// The record under evaluation.
    pub record: &'a Value,
    /// Converters reachable through `convert(...)`.
    pub converters: Option<&'a dyn ConverterHost>,
    /// Value a missing path resolves to.
    pub missing: &'a Value,
}

impl<'a> EvalContext<'a> {
    /// Context with no converters where missing paths resolve to `null`.
    #[must_use]
    pub fn new(record: &'a Value) -> Self {
        Self {
            record,
            converters: None,
            missing: &NULL,
        }
    }

    /// Make converters available to `convert(...)`.
    #[must_use]
    pub fn with_converters(mut self, converters: &'a dyn ConverterHost) -> Self {
        self.converters = Some(converters);
        self
    }

    /// Set the value missing paths resolve to.
    #[must_use]
    pub fn with_missing(mut self, missing: &'a Value) -> Self {
        self.missing = missing;
        self
    }
}

impl std::fmt::Debug for EvalContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("record", self.record)
            .field("converters", &self.converters.is_some())
            .field("missing", self.missing)
            .finish()
    }
}

/// Tree-walking evaluator.
pub struct Evaluator<'a, 's> {
    ctx: EvalContext<'a>,
    scratch: &'s mut Scratch,
}

impl<'a, 's> Evaluator<'a, 's> {
    /// Create an evaluator writing into the given scratch environment.
    pub fn new(ctx: EvalContext<'a>, scratch: &'s mut Scratch) -> Self {
        Self { ctx, scratch }
    }

    /// Evaluate a statement to pass/fail.
    pub fn eval_statement(&mut self, statement: &Statement) -> Result<bool, EvalError> {
        match statement {
            Statement::Bool(comparison) => self.eval_comparison(comparison),
            Statement::And { statements } => self.eval_all(statements),
            Statement::Or { statements } => {
                for stmt in statements {
                    if self.eval_statement(stmt)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.eval_comparison(condition)? {
                    self.eval_all(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.eval_all(else_branch)
                } else {
                    Ok(true)
                }
            }
            Statement::Set { target, value } => {
                let value = self.eval_expression(value)?;
                self.scratch.assign(target, value)?;
                Ok(true)
            }
        }
    }

    fn eval_all(&mut self, statements: &[Statement]) -> Result<bool, EvalError> {
        for stmt in statements {
            if !self.eval_statement(stmt)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_comparison(&self, comparison: &Comparison) -> Result<bool, EvalError> {
        let left = self.eval_expression(&comparison.left)?;
        let right = self.eval_expression(&comparison.right)?;

        match comparison.operator {
            ComparisonOp::Equal => Ok(values_equal(&left, &right)),
            ComparisonOp::NotEqual => Ok(!values_equal(&left, &right)),
            ComparisonOp::RegexMatch => match &comparison.pattern {
                Some(pattern) => Ok(regex_match(&left, &pattern.0)),
                None => {
                    let Value::String(source) = &right else {
                        return Err(EvalError::type_mismatch("*=", &left, &right));
                    };
                    let regex = Regex::new(source).map_err(|e| EvalError::InvalidPattern {
                        pattern: source.clone(),
                        message: e.to_string(),
                    })?;
                    Ok(regex_match(&left, &regex))
                }
            },
            op => {
                let ordering = compare_ordered(&left, &right)
                    .ok_or_else(|| EvalError::type_mismatch(op.to_string(), &left, &right))?;
                Ok(match op {
                    ComparisonOp::LessThan => ordering == Ordering::Less,
                    ComparisonOp::GreaterThan => ordering == Ordering::Greater,
                    ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
                    ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
                    _ => false,
                })
            }
        }
    }

    /// Evaluate an expression to a value.
    pub fn eval_expression(&self, expression: &Expression) -> Result<Value, EvalError> {
        match expression {
            Expression::Literal(literal) => Ok(literal.to_json()),
            Expression::Field(path) => Ok(self.resolve_field(path)),
            Expression::FunctionCall(call) => {
                let (positional, named) = partition_arguments(&call.arguments);

                let args = positional
                    .into_iter()
                    .map(|arg| self.eval_expression(&arg.value))
                    .collect::<Result<Vec<_>, _>>()?;

                let mut params = Map::new();
                for arg in named {
                    let value = self.eval_expression(&arg.value)?;
                    params.insert(arg.name.clone().unwrap_or_default(), value);
                }

                FunctionRegistry::evaluate(
                    &call.name,
                    args,
                    params,
                    self.ctx.record,
                    self.ctx.converters,
                )
            }
        }
    }

    /// Resolve a field path. Missing paths resolve to the configured default.
    #[must_use]
    pub fn resolve_field(&self, path: &FieldPath) -> Value {
        let root = if path.is_record() {
            Some(self.ctx.record)
        } else {
            self.scratch.root(&path.root)
        };

        root.and_then(|value| walk(value, &path.segments))
            .cloned()
            .unwrap_or_else(|| self.ctx.missing.clone())
    }
}

/// Walk path segments through nested maps and lists.
#[must_use]
pub fn walk<'v>(value: &'v Value, segments: &[PathSegment]) -> Option<&'v Value> {
    segments.iter().try_fold(value, |current, segment| match (current, segment) {
        (Value::Object(map), PathSegment::Key(key)) => map.get(key),
        (Value::Object(map), PathSegment::Index(i)) => map.get(&i.to_string()),
        (Value::Array(items), PathSegment::Index(i)) => items.get(*i),
        _ => None,
    })
}

/// Equality with integer/float cross-comparison.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn compare_ordered(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(compare_integers(a, b)),
            _ => compare_floats(a.as_f64()?, b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(compare_strings(a, b)),
        _ => None,
    }
}

fn compare_strings(a: &str, b: &str) -> Ordering {
    a.cmp(b)
}

fn compare_integers(a: i64, b: i64) -> Ordering {
    a.cmp(&b)
}

fn compare_floats(a: f64, b: f64) -> Option<Ordering> {
    a.partial_cmp(&b)
}

/// Regex search against the textual form of a scalar. Null never matches.
fn regex_match(value: &Value, regex: &Regex) -> bool {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => false,
        scalar => regex.is_match(&stringify(scalar)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use serde_json::json;

    fn run(program: &str, record: &Value) -> Result<bool, EvalError> {
        let statement = Parser::parse(program).unwrap();
        let mut scratch = Scratch::new();
        Evaluator::new(EvalContext::new(record), &mut scratch).eval_statement(&statement)
    }

    #[test]
    fn test_equality_and_ordering() {
        let record = json!({"status": "active", "cpu": 4, "load": 0.5});
        assert!(run(r#"record.status == "active";"#, &record).unwrap());
        assert!(!run(r#"record.status != "active";"#, &record).unwrap());
        assert!(run("record.cpu >= 4; record.cpu < 5;", &record).unwrap());
        assert!(run("record.cpu == 4.0;", &record).unwrap());
        assert!(run("record.load < 1;", &record).unwrap());
        assert!(run(r#"record.status > "abc";"#, &record).unwrap());
    }

    #[test]
    fn test_missing_paths_resolve_to_default() {
        let record = json!({"a": {"b": [10, 20]}});
        assert!(run("record.a.b.1 == 20;", &record).unwrap());
        assert!(run("record.a.b.5 == None;", &record).unwrap());
        assert!(run("record.x.y == None;", &record).unwrap());
        assert!(run("tmp.nothing == None;", &record).unwrap());

        let statement = Parser::parse(r#"record.missing == "n/a";"#).unwrap();
        let missing = json!("n/a");
        let mut scratch = Scratch::new();
        let ctx = EvalContext::new(&record).with_missing(&missing);
        assert!(Evaluator::new(ctx, &mut scratch)
            .eval_statement(&statement)
            .unwrap());
    }

    #[test]
    fn test_or_short_circuits() {
        // The second branch would fail with a type error if evaluated.
        let record = json!({"kind": "vm"});
        assert!(run(r#"OR { record.kind == "vm"; record.kind < 3; }"#, &record).unwrap());
        assert!(run(r#"OR { record.kind < 3; }"#, &record).is_err());
    }

    #[test]
    fn test_and_short_circuits() {
        let record = json!({"kind": "vm"});
        let filter = r#"AND { record.kind == "host"; record.kind < 3; }"#;
        assert!(!run(filter, &record).unwrap());
    }

    #[test]
    fn test_if_without_else_passes() {
        let record = json!({"kind": "vm"});
        let filter = r#"if (record.kind == "host") { record.kind == "never"; }"#;
        assert!(run(filter, &record).unwrap());
        assert!(!run(
            r#"if (record.kind == "host") { set tmp.x = 1; } else { record.kind == "never"; }"#,
            &record
        )
        .unwrap());
    }

    #[test]
    fn test_set_writes_scratch() {
        let record = json!({"dept": "IT", "name": "Ada"});
        let statement = Parser::parse(concat!(
            r#"if (record.dept == "IT") { set result.team = upper(record.name); } "#,
            r#"tmp.unused == None;"#,
        ))
        .unwrap();
        let mut scratch = Scratch::new();
        let passed = Evaluator::new(EvalContext::new(&record), &mut scratch)
            .eval_statement(&statement)
            .unwrap();
        assert!(passed);
        assert_eq!(scratch.result(), &json!({"team": "ADA"}));
    }

    #[test]
    fn test_set_failure_is_assignment_error() {
        let record = json!({});
        let err = run(
            r#"set tmp.list = split("a,b", ","); set tmp.list.x = 1;"#,
            &record,
        )
        .unwrap_err();
        assert!(err.is_assignment());
    }

    #[test]
    fn test_regex_match() {
        let record = json!({"host": "web-01.prod", "port": 8080, "none": null});
        assert!(run(r#"record.host *= "^web-\d+\.prod$";"#, &record).unwrap());
        assert!(run(r#"record.port *= "^80";"#, &record).unwrap());
        assert!(!run(r#"record.none *= ".*";"#, &record).unwrap());
        assert!(run(r#"set tmp.p = "prod"; record.host *= tmp.p;"#, &record).unwrap());
        assert!(matches!(
            run(r#"set tmp.p = "("; record.host *= tmp.p;"#, &record),
            Err(EvalError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let record = json!({"count": null});
        let err = run("record.count > 3;", &record).unwrap_err();
        assert_eq!(err, EvalError::type_mismatch(">", &json!(null), &json!(3)));
    }

    #[test]
    fn test_constants() {
        let record = json!({"enabled": true});
        assert!(run("record.enabled == True;", &record).unwrap());
        assert!(!run("record.enabled == False;", &record).unwrap());
    }
}
