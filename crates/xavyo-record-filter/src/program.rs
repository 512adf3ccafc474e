//! Compiled filter programs and the per-engine compile cache.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::ast::Statement;
use crate::error::EvalError;
use crate::evaluator::{EvalContext, Evaluator};
use crate::parser::{ParseError, Parser};
use crate::scratch::Scratch;

/// A filter string compiled once and evaluated per record.
#[derive(Debug, Clone)]
pub struct FilterProgram {
    source: String,
    root: Statement,
}

impl FilterProgram {
    /// Tokenize and parse a filter string.
    pub fn compile(source: &str) -> Result<Self, ParseError> {
        let root = Parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The original filter string.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The implicit top-level `AND` block.
    #[must_use]
    pub fn statement(&self) -> &Statement {
        &self.root
    }

    /// Fields read or written by the program.
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<String> {
        self.root.referenced_fields()
    }

    /// Converter names passed literally to `convert(...)`.
    #[must_use]
    pub fn converter_names(&self) -> Vec<String> {
        self.root.converter_names()
    }

    /// Evaluate against one record, returning every runtime error.
    pub fn evaluate(&self, ctx: EvalContext<'_>, scratch: &mut Scratch) -> Result<bool, EvalError> {
        Evaluator::new(ctx, scratch).eval_statement(&self.root)
    }

    /// Decide whether a record passes.
    ///
    /// Runtime errors are logged and treated as "filtered out". Failures of
    /// `set` statements are returned so the caller can report the record as
    /// errored.
    pub fn check(&self, ctx: EvalContext<'_>, scratch: &mut Scratch) -> Result<bool, EvalError> {
        match self.evaluate(ctx, scratch) {
            Ok(passed) => Ok(passed),
            Err(e) if e.is_assignment() => Err(e),
            Err(e) => {
                warn!(
                    error = %e,
                    filter = %self.source,
                    "Filter evaluation failed, record filtered out"
                );
                Ok(false)
            }
        }
    }
}

/// Compile cache keyed by filter string.
#[derive(Debug, Default)]
pub struct FilterCache {
    programs: DashMap<String, Arc<FilterProgram>>,
}

impl FilterCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached program for `source`, compiling it on first use.
    pub fn get_or_compile(&self, source: &str) -> Result<Arc<FilterProgram>, ParseError> {
        if let Some(program) = self.programs.get(source) {
            return Ok(Arc::clone(program.value()));
        }

        let program = Arc::new(FilterProgram::compile(source)?);
        debug!(filter = %source, "Compiled record filter");
        Ok(Arc::clone(
            self.programs
                .entry(source.to_string())
                .or_insert(program)
                .value(),
        ))
    }

    /// Number of cached programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_filters_out_on_runtime_error() {
        let program = FilterProgram::compile("record.count > 10;").unwrap();
        let mut scratch = Scratch::new();
        let record = json!({"count": "many"});
        assert!(!program
            .check(EvalContext::new(&record), &mut scratch)
            .unwrap());
        assert!(program
            .evaluate(EvalContext::new(&record), &mut scratch)
            .is_err());
    }

    #[test]
    fn test_check_propagates_set_failures() {
        let program = FilterProgram::compile(r#"set tmp.x = "a"; set tmp.x.y = 1;"#).unwrap();
        let mut scratch = Scratch::new();
        let record = json!({});
        let err = program
            .check(EvalContext::new(&record), &mut scratch)
            .unwrap_err();
        assert!(err.is_assignment());
    }

    #[test]
    fn test_cache_compiles_once() {
        let cache = FilterCache::new();
        let first = cache.get_or_compile("record.a == 1;").unwrap();
        let second = cache.get_or_compile("record.a == 1;").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        assert!(cache.get_or_compile("record.a ==").is_err());
        assert_eq!(cache.len(), 1);
    }
}
