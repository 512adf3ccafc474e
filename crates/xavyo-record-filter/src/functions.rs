//! Allow-listed functions callable from filter programs.
//!
//! Anything not listed here is rejected when the program is compiled.

use serde_json::{Map, Value};

use crate::ast::{Argument, FunctionCall};
use crate::error::{json_type_name, EvalError};

/// Access to named value converters for the `convert(...)` function.
///
/// The ingest engine implements this on its converter registry so filter
/// programs can reuse the same converters as field mappings.
pub trait ConverterHost: Send + Sync {
    /// Run the named converter on a value.
    fn invoke(
        &self,
        name: &str,
        record: &Value,
        value: Value,
        params: &Map<String, Value>,
    ) -> Result<Value, String>;
}

/// Arity and argument rules for one function.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` means variadic.
    pub max_args: Option<usize>,
    /// Whether `name=value` arguments are accepted.
    pub named_args: bool,
}

impl FunctionSpec {
    const fn fixed(name: &'static str, min_args: usize, max_args: usize) -> Self {
        Self {
            name,
            min_args,
            max_args: Some(max_args),
            named_args: false,
        }
    }

    const fn variadic_named(name: &'static str, min_args: usize) -> Self {
        Self {
            name,
            min_args,
            max_args: None,
            named_args: true,
        }
    }
}

const FUNCTIONS: &[FunctionSpec] = &[
    FunctionSpec::variadic_named("convert", 2),
    FunctionSpec::fixed("int", 1, 1),
    FunctionSpec::fixed("float", 1, 1),
    FunctionSpec::fixed("str", 1, 1),
    FunctionSpec::fixed("split", 2, 3),
    FunctionSpec::fixed("startswith", 2, 2),
    FunctionSpec::fixed("endswith", 2, 2),
    FunctionSpec::fixed("lower", 1, 1),
    FunctionSpec::fixed("upper", 1, 1),
    FunctionSpec::fixed("len", 1, 1),
    FunctionSpec::fixed("exists", 1, 1),
];

/// Registry of allow-listed functions.
pub struct FunctionRegistry;

impl FunctionRegistry {
    /// Look up a function's spec.
    #[must_use]
    pub fn spec(name: &str) -> Option<&'static FunctionSpec> {
        FUNCTIONS.iter().find(|f| f.name == name)
    }

    /// Check if a function exists.
    #[must_use]
    pub fn exists(name: &str) -> bool {
        Self::spec(name).is_some()
    }

    /// Get the list of supported function names.
    #[must_use]
    pub fn supported_functions() -> Vec<&'static str> {
        FUNCTIONS.iter().map(|f| f.name).collect()
    }

    /// Validate a call against the allow-list. Used at compile time.
    pub fn check_call(call: &FunctionCall) -> Result<(), String> {
        let Some(spec) = Self::spec(&call.name) else {
            return Err(format!(
                "Unknown function '{}'; allowed: {}",
                call.name,
                Self::supported_functions().join(", ")
            ));
        };

        let positional = call.arguments.iter().filter(|a| a.name.is_none()).count();
        let named = call.arguments.len() - positional;

        if named > 0 && !spec.named_args {
            return Err(format!(
                "Function '{}' does not accept named arguments",
                spec.name
            ));
        }

        if call
            .arguments
            .iter()
            .skip_while(|a| a.name.is_none())
            .any(|a| a.name.is_none())
        {
            return Err("Positional argument follows named argument".to_string());
        }

        let too_many = spec.max_args.is_some_and(|max| positional > max);
        if positional < spec.min_args || too_many {
            let expected = match spec.max_args {
                Some(max) if max == spec.min_args => format!("{max}"),
                Some(max) => format!("{} to {max}", spec.min_args),
                None => format!("at least {}", spec.min_args),
            };
            return Err(format!(
                "Function '{}' expects {expected} arguments, got {positional}",
                spec.name
            ));
        }

        // convert(name, value, key, value, ...) takes parameters in pairs.
        if spec.name == "convert" && (positional - spec.min_args) % 2 != 0 {
            return Err(
                "convert() parameters must be given as key/value pairs".to_string(),
            );
        }

        Ok(())
    }

    /// Evaluate a function with already-evaluated arguments.
    ///
    /// `named` holds `name=value` arguments in source order.
    pub fn evaluate(
        name: &str,
        args: Vec<Value>,
        named: Map<String, Value>,
        record: &Value,
        host: Option<&dyn ConverterHost>,
    ) -> Result<Value, EvalError> {
        let Some(spec) = Self::spec(name) else {
            return Err(EvalError::invalid_argument(name, "unknown function"));
        };
        if args.len() < spec.min_args {
            return Err(EvalError::invalid_argument(
                name,
                format!("expected at least {} arguments", spec.min_args),
            ));
        }

        match name {
            "convert" => convert(args, named, record, host),
            "int" => to_int(&args[0]),
            "float" => to_float(&args[0]),
            "str" => Ok(Value::String(stringify(&args[0]))),
            "split" => split(&args),
            "startswith" => affix(name, &args, |s, p| s.starts_with(p)),
            "endswith" => affix(name, &args, |s, p| s.ends_with(p)),
            "lower" => map_string(name, &args[0], str::to_lowercase),
            "upper" => map_string(name, &args[0], str::to_uppercase),
            "len" => length(&args[0]),
            "exists" => Ok(Value::Bool(!args[0].is_null())),
            _ => Err(EvalError::invalid_argument(name, "unknown function")),
        }
    }
}

/// Split named and positional arguments. Names are kept in source order.
pub(crate) fn partition_arguments(arguments: &[Argument]) -> (Vec<&Argument>, Vec<&Argument>) {
    arguments.iter().partition(|a| a.name.is_none())
}

/// Render a value as plain text. Strings are not quoted, null is empty.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn convert(
    mut args: Vec<Value>,
    mut params: Map<String, Value>,
    record: &Value,
    host: Option<&dyn ConverterHost>,
) -> Result<Value, EvalError> {
    let rest = args.split_off(2);
    let value = args.pop().unwrap_or(Value::Null);
    let name = match args.pop() {
        Some(Value::String(name)) => name,
        Some(other) => {
            return Err(EvalError::invalid_argument(
                "convert",
                format!(
                    "converter name must be a string, got {}",
                    json_type_name(&other)
                ),
            ))
        }
        None => return Err(EvalError::invalid_argument("convert", "missing converter name")),
    };

    for pair in rest.chunks(2) {
        if let [key, param] = pair {
            params.insert(stringify(key), param.clone());
        }
    }

    let Some(host) = host else {
        return Err(EvalError::NoConverterHost { name });
    };

    host.invoke(&name, record, value, &params)
        .map_err(|message| EvalError::Converter { name, message })
}

fn to_int(value: &Value) -> Result<Value, EvalError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };

    parsed.map(Value::from).ok_or_else(|| {
        EvalError::invalid_argument(
            "int",
            format!("cannot convert {} to integer", describe(value)),
        )
    })
}

fn to_float(value: &Value) -> Result<Value, EvalError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };

    parsed
        .filter(|f| f.is_finite())
        .map(Value::from)
        .ok_or_else(|| {
            EvalError::invalid_argument(
                "float",
                format!("cannot convert {} to float", describe(value)),
            )
        })
}

fn split(args: &[Value]) -> Result<Value, EvalError> {
    let text = match &args[0] {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => s,
        other => {
            return Err(EvalError::invalid_argument(
                "split",
                format!("expected string, got {}", json_type_name(other)),
            ))
        }
    };
    let Value::String(separator) = &args[1] else {
        return Err(EvalError::invalid_argument("split", "separator must be a string"));
    };
    if separator.is_empty() {
        return Err(EvalError::invalid_argument("split", "separator must not be empty"));
    }

    let parts: Vec<&str> = text.split(separator.as_str()).collect();

    match args.get(2) {
        None => Ok(Value::Array(
            parts.into_iter().map(|p| Value::String(p.to_string())).collect(),
        )),
        Some(Value::Number(n)) => {
            let Some(index) = n.as_i64() else {
                return Err(EvalError::invalid_argument("split", "index must be an integer"));
            };
            let resolved = if index < 0 {
                parts.len().checked_sub(index.unsigned_abs() as usize)
            } else {
                Some(index as usize)
            };
            Ok(resolved
                .and_then(|i| parts.get(i))
                .map_or(Value::Null, |p| Value::String((*p).to_string())))
        }
        Some(other) => Err(EvalError::invalid_argument(
            "split",
            format!("index must be an integer, got {}", json_type_name(other)),
        )),
    }
}

fn affix(name: &str, args: &[Value], test: fn(&str, &str) -> bool) -> Result<Value, EvalError> {
    match (&args[0], &args[1]) {
        (Value::Null, _) => Ok(Value::Bool(false)),
        (Value::String(s), Value::String(p)) => Ok(Value::Bool(test(s, p))),
        (left, right) => Err(EvalError::invalid_argument(
            name,
            format!(
                "expected strings, got {} and {}",
                json_type_name(left),
                json_type_name(right)
            ),
        )),
    }
}

fn map_string(name: &str, value: &Value, f: fn(&str) -> String) -> Result<Value, EvalError> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(f(s))),
        other => Err(EvalError::invalid_argument(
            name,
            format!("expected string, got {}", json_type_name(other)),
        )),
    }
}

fn length(value: &Value) -> Result<Value, EvalError> {
    let len = match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        other => {
            return Err(EvalError::invalid_argument(
                "len",
                format!("{} has no length", json_type_name(other)),
            ))
        }
    };
    Ok(Value::from(len))
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        other => json_type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expression, Literal};
    use serde_json::json;

    fn call(name: &str, positional: usize, named: &[&str]) -> FunctionCall {
        let mut arguments: Vec<Argument> = (0..positional)
            .map(|i| Argument {
                name: None,
                value: Expression::Literal(Literal::Integer(i as i64)),
            })
            .collect();
        arguments.extend(named.iter().map(|n| Argument {
            name: Some((*n).to_string()),
            value: Expression::Literal(Literal::Integer(0)),
        }));
        FunctionCall {
            name: name.to_string(),
            arguments,
        }
    }

    fn eval(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        FunctionRegistry::evaluate(name, args, Map::new(), &Value::Null, None)
    }

    #[test]
    fn test_check_call_rejects_unknown_and_bad_arity() {
        assert!(FunctionRegistry::check_call(&call("eval", 1, &[]))
            .unwrap_err()
            .contains("Unknown function 'eval'"));
        assert!(FunctionRegistry::check_call(&call("int", 2, &[]))
            .unwrap_err()
            .contains("expects 1 arguments"));
        assert!(FunctionRegistry::check_call(&call("split", 1, &[]))
            .unwrap_err()
            .contains("2 to 3"));
        assert!(FunctionRegistry::check_call(&call("upper", 1, &["x"])).is_err());
        assert!(FunctionRegistry::check_call(&call("convert", 3, &[])).is_err());
        assert!(FunctionRegistry::check_call(&call("convert", 4, &[])).is_ok());
        assert!(FunctionRegistry::check_call(&call("convert", 2, &["on", "index"])).is_ok());
    }

    #[test]
    fn test_function_table() {
        let convert = FunctionRegistry::spec("convert").unwrap();
        assert_eq!((convert.min_args, convert.max_args), (2, None));
        assert!(convert.named_args);

        let split = FunctionRegistry::spec("split").unwrap();
        assert_eq!((split.min_args, split.max_args), (2, Some(3)));
        assert!(!split.named_args);

        assert!(FunctionRegistry::spec("eval").is_none());
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(eval("int", vec![json!("42")]).unwrap(), json!(42));
        assert_eq!(eval("int", vec![json!(" 7.9 ")]).unwrap(), json!(7));
        assert_eq!(eval("int", vec![json!(true)]).unwrap(), json!(1));
        assert!(eval("int", vec![json!("abc")]).is_err());
        assert_eq!(eval("float", vec![json!("2.5")]).unwrap(), json!(2.5));
        assert!(eval("float", vec![json!(null)]).is_err());
    }

    #[test]
    fn test_split() {
        assert_eq!(
            eval("split", vec![json!("a,b,c"), json!(",")]).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            eval("split", vec![json!("a,b,c"), json!(","), json!(1)]).unwrap(),
            json!("b")
        );
        assert_eq!(
            eval("split", vec![json!("a,b,c"), json!(","), json!(-1)]).unwrap(),
            json!("c")
        );
        assert_eq!(
            eval("split", vec![json!("a,b,c"), json!(","), json!(9)]).unwrap(),
            json!(null)
        );
        assert_eq!(
            eval("split", vec![json!(null), json!(",")]).unwrap(),
            json!(null)
        );
    }

    #[test]
    fn test_string_predicates() {
        assert_eq!(
            eval("startswith", vec![json!("srv-01"), json!("srv")]).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval("endswith", vec![json!("host.local"), json!(".corp")]).unwrap(),
            json!(false)
        );
        assert_eq!(
            eval("startswith", vec![json!(null), json!("x")]).unwrap(),
            json!(false)
        );
        assert!(eval("startswith", vec![json!(1), json!("x")]).is_err());
    }

    #[test]
    fn test_misc() {
        assert_eq!(eval("lower", vec![json!("ABC")]).unwrap(), json!("abc"));
        assert_eq!(eval("len", vec![json!([1, 2, 3])]).unwrap(), json!(3));
        assert_eq!(eval("len", vec![json!(null)]).unwrap(), json!(0));
        assert_eq!(eval("str", vec![json!(12)]).unwrap(), json!("12"));
        assert_eq!(eval("exists", vec![json!(null)]).unwrap(), json!(false));
    }

    #[test]
    fn test_convert_without_host() {
        let err = eval("convert", vec![json!("mac_address"), json!("aa")]).unwrap_err();
        assert_eq!(
            err,
            EvalError::NoConverterHost {
                name: "mac_address".to_string()
            }
        );
    }
}
