//! Templating for computed field values.
//!
//! Templates contain `${expression}` placeholders. Each expression runs in a
//! sandboxed Rhai engine (no filesystem, network or module access, bounded
//! operations) with the render context's top-level keys as variables.
//!
//! ```text
//! "${record.first} ${record.last}"   -> render_to_string -> "Ada Lovelace"
//! "${record.cpu * 2}"                -> render_to_native -> 8
//! ```

use dashmap::DashMap;
use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::debug;

/// Errors raised while rendering a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The template references a variable that is not in the context.
    #[error("Undefined value '{name}' in template")]
    Undefined { name: String },

    /// The template cannot be parsed.
    #[error("Template syntax error: {message}")]
    Syntax { message: String },

    /// The expression failed while running.
    #[error("Template evaluation failed: {message}")]
    Evaluation { message: String },
}

impl TemplateError {
    /// Whether this is a syntax problem (a configuration error) rather than a
    /// per-record rendering failure.
    #[must_use]
    pub fn is_syntax(&self) -> bool {
        matches!(self, TemplateError::Syntax { .. })
    }
}

/// Renders computed field templates against a JSON context.
pub trait TemplateRenderer: Send + Sync {
    /// Check that a template parses. Called once when mappings are built.
    fn validate(&self, template: &str) -> Result<(), TemplateError>;

    /// Render to text.
    fn render_to_string(&self, template: &str, context: &Value) -> Result<String, TemplateError>;

    /// Render to a native value. A template that is exactly one placeholder
    /// yields the expression's value; anything else yields text.
    fn render_to_native(&self, template: &str, context: &Value) -> Result<Value, TemplateError>;
}

/// Template engine configuration.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    /// Maximum operations per expression.
    pub max_operations: u64,
    /// Maximum string size produced by an expression.
    pub max_string_size: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_operations: 10_000,
            max_string_size: 65_536,
        }
    }
}

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // Constant pattern, exercised by every rendering test.
    Regex::new(r"\$\{([^}]*)\}").expect("PLACEHOLDER is a valid regex pattern")
});

/// Default [`TemplateRenderer`] backed by Rhai.
pub struct RhaiTemplateRenderer {
    engine: Engine,
    compiled: DashMap<String, Arc<AST>>,
}

impl RhaiTemplateRenderer {
    /// Create a renderer with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(TemplateConfig::default())
    }

    /// Create a renderer with custom limits.
    #[must_use]
    pub fn with_config(config: TemplateConfig) -> Self {
        Self {
            engine: Self::create_engine(&config),
            compiled: DashMap::new(),
        }
    }

    fn create_engine(config: &TemplateConfig) -> Engine {
        let mut engine = Engine::new();

        // Set resource limits
        engine.set_max_operations(config.max_operations);
        engine.set_max_call_levels(32);
        engine.set_max_string_size(config.max_string_size);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(10_000);
        engine.set_max_expr_depths(64, 32);
        engine.set_strict_variables(false);

        engine.register_fn("lowercase", |s: &str| s.to_lowercase());
        engine.register_fn("uppercase", |s: &str| s.to_uppercase());
        engine.register_fn("trim", |s: &str| s.trim().to_string());
        engine.register_fn("default_val", |val: Dynamic, default: Dynamic| -> Dynamic {
            if val.is_unit() || val.clone().into_string().is_ok_and(|s| s.is_empty()) {
                default
            } else {
                val
            }
        });

        engine
    }

    fn compile(&self, expression: &str) -> Result<Arc<AST>, TemplateError> {
        if let Some(ast) = self.compiled.get(expression) {
            return Ok(Arc::clone(ast.value()));
        }

        let ast = self
            .engine
            .compile_expression(expression)
            .map_err(|e| TemplateError::Syntax {
                message: format!("'{expression}': {e}"),
            })?;
        debug!(expression = %expression, "Compiled template expression");

        let ast = Arc::new(ast);
        self.compiled
            .insert(expression.to_string(), Arc::clone(&ast));
        Ok(ast)
    }

    fn eval(&self, expression: &str, context: &Value) -> Result<Value, TemplateError> {
        let ast = self.compile(expression)?;

        let mut scope = Scope::new();
        if let Value::Object(map) = context {
            for (key, value) in map {
                let dynamic = rhai::serde::to_dynamic(value).map_err(|e| TemplateError::Evaluation {
                    message: format!("context key '{key}': {e}"),
                })?;
                scope.push_dynamic(key.clone(), dynamic);
            }
        }

        let result: Dynamic = self
            .engine
            .eval_ast_with_scope(&mut scope, &ast)
            .map_err(|e| classify(*e))?;

        if result.is_unit() {
            return Ok(Value::Null);
        }
        rhai::serde::from_dynamic(&result).map_err(|e| TemplateError::Evaluation {
            message: format!("result of '{expression}': {e}"),
        })
    }

    /// Placeholder expressions in a template, in order.
    fn placeholders(
        template: &str,
    ) -> Result<Vec<(std::ops::Range<usize>, &str)>, TemplateError> {
        let mut found = Vec::new();
        let mut last_end = 0;

        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            check_unclosed(&template[last_end..whole.start()])?;
            let expression = inner.as_str().trim();
            if expression.is_empty() {
                return Err(TemplateError::Syntax {
                    message: format!("empty placeholder at offset {}", whole.start()),
                });
            }
            found.push((whole.range(), expression));
            last_end = whole.end();
        }
        check_unclosed(&template[last_end..])?;

        Ok(found)
    }
}

impl Default for RhaiTemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RhaiTemplateRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RhaiTemplateRenderer")
            .field("compiled", &self.compiled.len())
            .finish_non_exhaustive()
    }
}

fn check_unclosed(text: &str) -> Result<(), TemplateError> {
    if text.contains("${") {
        return Err(TemplateError::Syntax {
            message: "unclosed '${' placeholder".to_string(),
        });
    }
    Ok(())
}

fn classify(err: EvalAltResult) -> TemplateError {
    match err {
        EvalAltResult::ErrorVariableNotFound(name, _) => TemplateError::Undefined { name },
        EvalAltResult::ErrorParsing(parse, _) => TemplateError::Syntax {
            message: parse.to_string(),
        },
        other => TemplateError::Evaluation {
            message: other.to_string(),
        },
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TemplateRenderer for RhaiTemplateRenderer {
    fn validate(&self, template: &str) -> Result<(), TemplateError> {
        for (_, expression) in Self::placeholders(template)? {
            self.compile(expression)?;
        }
        Ok(())
    }

    fn render_to_string(&self, template: &str, context: &Value) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut last_end = 0;

        for (range, expression) in Self::placeholders(template)? {
            out.push_str(&template[last_end..range.start]);
            out.push_str(&text_of(&self.eval(expression, context)?));
            last_end = range.end;
        }
        out.push_str(&template[last_end..]);

        Ok(out)
    }

    fn render_to_native(&self, template: &str, context: &Value) -> Result<Value, TemplateError> {
        let placeholders = Self::placeholders(template)?;
        if let [(range, expression)] = placeholders.as_slice() {
            if range.start == 0 && range.end == template.len() {
                return self.eval(expression, context);
            }
        }
        self.render_to_string(template, context).map(Value::String)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placeholder_pattern_captures_expressions() {
        let found: Vec<&str> = PLACEHOLDER
            .captures_iter("${record.first} and ${ config.site }")
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        assert_eq!(found, vec!["record.first", " config.site "]);
    }

    fn context() -> Value {
        json!({
            "record": {"first": "Ada", "last": "Lovelace", "cpu": 4, "tags": ["a", "b"]},
            "config": {"site": "hq"}
        })
    }

    #[test]
    fn test_render_to_string() {
        let renderer = RhaiTemplateRenderer::new();
        let template = "${record.first} ${record.last} @ ${config.site}";
        let out = renderer.render_to_string(template, &context()).unwrap();
        assert_eq!(out, "Ada Lovelace @ hq");
    }

    #[test]
    fn test_render_to_native() {
        let renderer = RhaiTemplateRenderer::new();
        assert_eq!(
            renderer.render_to_native("${record.cpu * 2}", &context()).unwrap(),
            json!(8)
        );
        assert_eq!(
            renderer.render_to_native("${record.tags}", &context()).unwrap(),
            json!(["a", "b"])
        );
        assert_eq!(
            renderer.render_to_native("cpu-${record.cpu}", &context()).unwrap(),
            json!("cpu-4")
        );
        assert_eq!(
            renderer.render_to_native("${uppercase(record.first)}", &context()).unwrap(),
            json!("ADA")
        );
    }

    #[test]
    fn test_undefined_is_distinguished_from_syntax() {
        let renderer = RhaiTemplateRenderer::new();

        let err = renderer.render_to_string("${owner.name}", &context()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Undefined {
                name: "owner".to_string()
            }
        );
        assert!(!err.is_syntax());

        let err = renderer.render_to_string("${record.first +}", &context()).unwrap_err();
        assert!(err.is_syntax());

        let err = renderer.validate("${record.first").unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn test_statements_are_rejected() {
        let renderer = RhaiTemplateRenderer::new();
        let err = renderer.validate("${let x = 1}").unwrap_err();
        assert!(err.is_syntax());
    }

    #[test]
    fn test_string_size_is_bounded() {
        let renderer = RhaiTemplateRenderer::with_config(TemplateConfig {
            max_string_size: 8,
            ..TemplateConfig::default()
        });
        let err = renderer
            .render_to_native("${record.first + record.last + record.last}", &context())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Evaluation { .. }));
    }

    #[test]
    fn test_plain_text_passes_through() {
        let renderer = RhaiTemplateRenderer::new();
        assert_eq!(
            renderer.render_to_string("no placeholders", &context()).unwrap(),
            "no placeholders"
        );
    }
}
