//! Abstract Syntax Tree types for record filter programs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root name that addresses the record under evaluation.
pub const RECORD_ROOT: &str = "record";

/// A statement in a filter program. Every statement evaluates to pass/fail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Statement {
    /// A comparison between two expressions.
    Bool(Comparison),
    /// Passes when every child passes; stops at the first failure.
    And { statements: Vec<Statement> },
    /// Passes when any child passes; stops at the first success.
    Or { statements: Vec<Statement> },
    /// Conditional block.
    If {
        condition: Comparison,
        then_branch: Vec<Statement>,
        else_branch: Option<Vec<Statement>>,
    },
    /// Assignment into the scratch environment.
    Set {
        target: FieldPath,
        value: Expression,
    },
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Expression {
    /// Call to an allow-listed function.
    FunctionCall(FunctionCall),
    /// A field reference.
    Field(FieldPath),
    /// A literal value.
    Literal(Literal),
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
}

impl Literal {
    /// Convert to a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::Integer(i) => serde_json::Value::from(*i),
            Literal::Float(f) => serde_json::Value::from(*f),
            Literal::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// One segment of a field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// List index.
    Index(usize),
    /// Map key.
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => write!(f, "{k}"),
        }
    }
}

/// A dotted field path such as `record.user.emails.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath {
    /// Root name (`record` or a scratch root).
    pub root: String,
    /// Segments after the root.
    pub segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Create a path from a root and its segments.
    #[must_use]
    pub fn new(root: impl Into<String>, segments: Vec<PathSegment>) -> Self {
        Self {
            root: root.into(),
            segments,
        }
    }

    /// Whether this path addresses the record under evaluation.
    #[must_use]
    pub fn is_record(&self) -> bool {
        self.root == RECORD_ROOT
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.segments {
            write!(f, ".{segment}")?;
        }
        Ok(())
    }
}

/// Named or positional function argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// Keyword name for `name=value` arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument value.
    pub value: Expression,
}

/// A function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,
    /// Arguments in source order.
    pub arguments: Vec<Argument>,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    LessThan,
    GreaterThan,
    LessThanOrEqual,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    RegexMatch,
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ComparisonOp::LessThan => "<",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThanOrEqual => ">=",
            ComparisonOp::Equal => "==",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::RegexMatch => "*=",
        };
        write!(f, "{op}")
    }
}

/// A regex compiled when the program was parsed.
#[derive(Debug, Clone)]
pub struct CompiledPattern(pub Regex);

impl PartialEq for CompiledPattern {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

/// A boolean comparison between two expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub left: Expression,
    pub operator: ComparisonOp,
    pub right: Expression,
    /// Precompiled pattern when `right` is a literal string and the operator is `*=`.
    #[serde(skip)]
    pub pattern: Option<CompiledPattern>,
}

impl Statement {
    /// Field paths read or written anywhere in this statement, in source order.
    #[must_use]
    pub fn referenced_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Statement::Bool(cmp) => cmp.collect_fields(out),
            Statement::And { statements } | Statement::Or { statements } => {
                for stmt in statements {
                    stmt.collect_fields(out);
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.collect_fields(out);
                for stmt in then_branch.iter().chain(else_branch.iter().flatten()) {
                    stmt.collect_fields(out);
                }
            }
            Statement::Set { target, value } => {
                push_unique(out, target.to_string());
                value.collect_fields(out);
            }
        }
    }

    /// Converter names passed as literal first argument to `convert(...)`.
    #[must_use]
    pub fn converter_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.visit_calls(&mut |call: &FunctionCall| {
            if call.name == "convert" {
                if let Some(Argument {
                    value: Expression::Literal(Literal::String(name)),
                    ..
                }) = call.arguments.first()
                {
                    push_unique(&mut names, name.clone());
                }
            }
        });
        names
    }

    fn visit_calls(&self, visit: &mut dyn FnMut(&FunctionCall)) {
        match self {
            Statement::Bool(cmp) => {
                cmp.left.visit_calls(visit);
                cmp.right.visit_calls(visit);
            }
            Statement::And { statements } | Statement::Or { statements } => {
                for stmt in statements {
                    stmt.visit_calls(visit);
                }
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.left.visit_calls(visit);
                condition.right.visit_calls(visit);
                for stmt in then_branch.iter().chain(else_branch.iter().flatten()) {
                    stmt.visit_calls(visit);
                }
            }
            Statement::Set { value, .. } => value.visit_calls(visit),
        }
    }
}

impl Comparison {
    fn collect_fields(&self, out: &mut Vec<String>) {
        self.left.collect_fields(out);
        self.right.collect_fields(out);
    }
}

impl Expression {
    fn collect_fields(&self, out: &mut Vec<String>) {
        match self {
            Expression::Field(path) => push_unique(out, path.to_string()),
            Expression::FunctionCall(call) => {
                for arg in &call.arguments {
                    arg.value.collect_fields(out);
                }
            }
            Expression::Literal(_) => {}
        }
    }

    fn visit_calls(&self, visit: &mut dyn FnMut(&FunctionCall)) {
        if let Expression::FunctionCall(call) = self {
            visit(call);
            for arg in &call.arguments {
                arg.value.visit_calls(visit);
            }
        }
    }
}

fn push_unique(out: &mut Vec<String>, value: String) {
    if !out.contains(&value) {
        out.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_display() {
        let path = FieldPath::new(
            "record",
            vec![
                PathSegment::Key("emails".to_string()),
                PathSegment::Index(0),
            ],
        );
        assert_eq!(path.to_string(), "record.emails.0");
        assert!(path.is_record());
    }

    #[test]
    fn test_statement_serializes_tagged() {
        let stmt = Statement::Set {
            target: FieldPath::new("tmp", vec![PathSegment::Key("x".to_string())]),
            value: Expression::Literal(Literal::Integer(1)),
        };
        let json = serde_json::to_value(&stmt).unwrap();
        assert_eq!(json["type"], "set");
        assert_eq!(json["value"]["type"], "literal");
    }
}
