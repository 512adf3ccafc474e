//! # Record Filter Language
//!
//! A small, sandboxed language for filtering records and deriving values
//! before field mapping. Programs are tokenized and parsed once, then
//! evaluated per record.
//!
//! ## Syntax
//!
//! ```text
//! statement   ::= and_stmt | or_stmt | if_stmt | set_stmt | bool_stmt ';'
//! and_stmt    ::= 'AND' '{' statement* '}'
//! or_stmt     ::= 'OR'  '{' statement* '}'
//! set_stmt    ::= 'set' field '=' expression ';'
//! if_stmt     ::= 'if' '(' bool_stmt ')' '{' statement* '}' ['else' '{' statement* '}']
//! bool_stmt   ::= expression operator expression
//! operator    ::= '<' | '>' | '<=' | '>=' | '==' | '!=' | '*='
//! expression  ::= function_call | literal | field
//! field       ::= NAME ('.' (NAME | NUMBER))*
//! ```
//!
//! The program body is an implicit `AND { ... }`. The root `record` reads the
//! record under evaluation; other roots (`tmp`, `result`, `True`, `False`,
//! `None`) live in a [`Scratch`] environment owned by the caller.
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use xavyo_record_filter::{EvalContext, FilterProgram, Scratch};
//!
//! let program = FilterProgram::compile(r#"AND { record.status == "active"; }"#).unwrap();
//! let mut scratch = Scratch::new();
//!
//! let active = json!({"status": "active", "id": 1});
//! assert!(program.check(EvalContext::new(&active), &mut scratch).unwrap());
//!
//! let inactive = json!({"status": "inactive", "id": 2});
//! scratch.reset();
//! assert!(!program.check(EvalContext::new(&inactive), &mut scratch).unwrap());
//! ```

pub mod ast;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod program;
pub mod scratch;

pub use ast::{Comparison, ComparisonOp, Expression, FieldPath, Literal, PathSegment, Statement};
pub use error::{EvalError, FilterError};
pub use evaluator::{EvalContext, Evaluator};
pub use functions::{ConverterHost, FunctionRegistry};
pub use lexer::{Lexer, LexerError, Token};
pub use parser::{ParseError, Parser};
pub use program::{FilterCache, FilterProgram};
pub use scratch::Scratch;

/// Compile and evaluate a filter against one record with a fresh scratch.
///
/// Convenience for one-off checks; long-running callers should compile once
/// through [`FilterCache`].
pub fn matches(filter: &str, record: &serde_json::Value) -> Result<bool, FilterError> {
    let program = FilterProgram::compile(filter)?;
    let mut scratch = Scratch::new();
    Ok(program.evaluate(EvalContext::new(record), &mut scratch)?)
}
