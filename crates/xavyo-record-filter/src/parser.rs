//! Recursive descent parser for filter programs.
//!
//! Parses tokens into a [`Statement`] tree. The whole program is wrapped in
//! an implicit `AND { ... }` block.

use regex::Regex;

use super::ast::{
    Argument, Comparison, ComparisonOp, CompiledPattern, Expression, FieldPath, FunctionCall,
    Literal, PathSegment, Statement,
};
use super::functions::FunctionRegistry;
use super::lexer::{Lexer, LexerError, Spanned, Token};

/// Error during parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    /// Error message.
    pub message: String,
    /// Character offset in the input where the error occurred.
    pub position: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

impl From<LexerError> for ParseError {
    fn from(err: LexerError) -> Self {
        ParseError {
            message: err.message,
            position: err.position,
        }
    }
}

/// Parser for filter programs.
pub struct Parser {
    tokens: Vec<Spanned>,
    position: usize,
}

impl Parser {
    /// Parse a filter program string.
    pub fn parse(input: &str) -> Result<Statement, ParseError> {
        let tokens = Lexer::new(input).tokenize()?;
        let mut parser = Parser {
            tokens,
            position: 0,
        };

        let mut statements = Vec::new();
        while !parser.is_at_end() {
            statements.push(parser.parse_statement()?);
        }

        Ok(Statement::And { statements })
    }

    /// Validate a filter program and return the fields it references.
    pub fn validate(input: &str) -> Result<Vec<String>, ParseError> {
        let program = Self::parse(input)?;
        Ok(program.referenced_fields())
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let statement = match self.current_token() {
            Token::And => {
                self.advance();
                Statement::And {
                    statements: self.parse_block()?,
                }
            }
            Token::Or => {
                self.advance();
                Statement::Or {
                    statements: self.parse_block()?,
                }
            }
            Token::If => {
                self.advance();
                return self.parse_if();
            }
            Token::Set => {
                self.advance();
                return self.parse_set();
            }
            _ => {
                let comparison = self.parse_comparison()?;
                self.expect_token(&Token::Semicolon)?;
                return Ok(Statement::Bool(comparison));
            }
        };

        // A stray ';' after a block is tolerated.
        self.match_token(&Token::Semicolon);
        Ok(statement)
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect_token(&Token::LeftBrace)?;
        let mut statements = Vec::new();
        while !self.check(&Token::RightBrace) {
            if self.is_at_end() {
                return Err(self.error_here("Unclosed block, expected '}'"));
            }
            statements.push(self.parse_statement()?);
        }
        self.expect_token(&Token::RightBrace)?;
        Ok(statements)
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        self.expect_token(&Token::LeftParen)?;
        let condition = self.parse_comparison()?;
        self.expect_token(&Token::RightParen)?;
        let then_branch = self.parse_block()?;

        let else_branch = if self.match_token(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };
        self.match_token(&Token::Semicolon);

        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }

    fn parse_set(&mut self) -> Result<Statement, ParseError> {
        let target_position = self.current_position();
        let name = self.expect_identifier()?;
        let target = self.parse_field_path(name)?;

        if target.is_record() {
            return Err(ParseError {
                message: format!("Cannot set '{target}': the record is read-only"),
                position: target_position,
            });
        }
        if target.segments.is_empty() {
            return Err(ParseError {
                message: format!(
                    "Cannot set global name '{target}'; use a nested path such as tmp.{target}"
                ),
                position: target_position,
            });
        }

        self.expect_token(&Token::Assign)?;
        let value = self.parse_expression()?;
        self.expect_token(&Token::Semicolon)?;

        Ok(Statement::Set { target, value })
    }

    fn parse_comparison(&mut self) -> Result<Comparison, ParseError> {
        let left = self.parse_expression()?;
        let operator = self.parse_comparison_operator()?;
        let pattern_position = self.current_position();
        let right = self.parse_expression()?;

        let pattern = match (&operator, &right) {
            (ComparisonOp::RegexMatch, Expression::Literal(Literal::String(source))) => {
                let regex = Regex::new(source).map_err(|e| ParseError {
                    message: format!("Invalid regex pattern '{source}': {e}"),
                    position: pattern_position,
                })?;
                Some(CompiledPattern(regex))
            }
            _ => None,
        };

        Ok(Comparison {
            left,
            operator,
            right,
            pattern,
        })
    }

    fn parse_comparison_operator(&mut self) -> Result<ComparisonOp, ParseError> {
        let position = self.current_position();
        let token = self.advance();
        match token {
            Token::Equal => Ok(ComparisonOp::Equal),
            Token::NotEqual => Ok(ComparisonOp::NotEqual),
            Token::LessThan => Ok(ComparisonOp::LessThan),
            Token::GreaterThan => Ok(ComparisonOp::GreaterThan),
            Token::LessThanOrEqual => Ok(ComparisonOp::LessThanOrEqual),
            Token::GreaterThanOrEqual => Ok(ComparisonOp::GreaterThanOrEqual),
            Token::RegexMatch => Ok(ComparisonOp::RegexMatch),
            Token::Assign => Err(ParseError {
                message: "Expected comparison operator, found '='; use '==' to compare"
                    .to_string(),
                position,
            }),
            _ => Err(ParseError {
                message: format!("Expected comparison operator, found {token}"),
                position,
            }),
        }
    }

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let position = self.current_position();
        let token = self.advance();
        match token {
            Token::StringLiteral(s) => Ok(Expression::Literal(Literal::String(s))),
            Token::IntegerLiteral(i) => Ok(Expression::Literal(Literal::Integer(i))),
            Token::FloatLiteral(f) => Ok(Expression::Literal(Literal::Float(f))),
            Token::Identifier(name) => {
                if self.match_token(&Token::LeftParen) {
                    self.parse_function_call(name, position)
                } else {
                    self.parse_field_path(name).map(Expression::Field)
                }
            }
            _ => Err(ParseError {
                message: format!("Expected expression, found {token}"),
                position,
            }),
        }
    }

    fn parse_field_path(&mut self, root: String) -> Result<FieldPath, ParseError> {
        let mut segments = Vec::new();

        while self.match_token(&Token::Dot) {
            let position = self.current_position();
            let token = self.advance();
            let segment = match token {
                Token::Identifier(name) => PathSegment::Key(name),
                Token::IntegerLiteral(i) if i >= 0 => PathSegment::Index(i as usize),
                other => match other.keyword_text() {
                    Some(keyword) => PathSegment::Key(keyword.to_string()),
                    None => {
                        return Err(ParseError {
                            message: format!(
                                "Expected field name or list index after '.', found {other}"
                            ),
                            position,
                        })
                    }
                },
            };
            segments.push(segment);
        }

        Ok(FieldPath::new(root, segments))
    }

    fn parse_function_call(
        &mut self,
        name: String,
        position: usize,
    ) -> Result<Expression, ParseError> {
        let mut arguments = Vec::new();

        if !self.check(&Token::RightParen) {
            loop {
                arguments.push(self.parse_argument()?);
                if !self.match_token(&Token::Comma) {
                    break;
                }
            }
        }

        self.expect_token(&Token::RightParen)?;

        let call = FunctionCall { name, arguments };
        FunctionRegistry::check_call(&call).map_err(|message| ParseError { message, position })?;

        Ok(Expression::FunctionCall(call))
    }

    fn parse_argument(&mut self) -> Result<Argument, ParseError> {
        // `name=value` keyword argument
        let keyword = match (self.current_token(), self.peek_token(1)) {
            (Token::Identifier(name), Some(Token::Assign)) => Some(name.clone()),
            _ => None,
        };

        if let Some(name) = keyword {
            self.advance();
            self.advance();
            let value = self.parse_expression()?;
            return Ok(Argument {
                name: Some(name),
                value,
            });
        }

        Ok(Argument {
            name: None,
            value: self.parse_expression()?,
        })
    }

    // Helper methods

    fn current_token(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map_or(&Token::Eof, |s| &s.token)
    }

    fn peek_token(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset).map(|s| &s.token)
    }

    fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(0, |s| s.position)
    }

    fn advance(&mut self) -> Token {
        let token = self.current_token().clone();
        if !self.is_at_end() {
            self.position += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_token(), Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.current_token()) == std::mem::discriminant(token)
    }

    fn match_token(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.check(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(&format!(
                "Expected {expected}, found {}",
                self.current_token()
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        let position = self.current_position();
        match self.advance() {
            Token::Identifier(name) => Ok(name),
            token => Err(ParseError {
                message: format!("Expected field name, found {token}"),
                position,
            }),
        }
    }

    fn error_here(&self, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            position: self.current_position(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(program: Statement) -> Vec<Statement> {
        match program {
            Statement::And { statements } => statements,
            other => panic!("expected implicit AND, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_implicit_and() {
        let program = Parser::parse(r#"record.status == "active"; record.id > 0;"#).unwrap();
        let statements = body(program);
        assert_eq!(statements.len(), 2);
        assert!(matches!(statements[0], Statement::Bool(_)));
    }

    #[test]
    fn test_parse_nested_blocks() {
        let program = Parser::parse(
            r#"AND {
                record.type == "server";
                OR { record.os *= "^Linux"; record.os *= "^Windows"; }
            }"#,
        )
        .unwrap();
        let statements = body(program);
        let Statement::And { statements: inner } = &statements[0] else {
            panic!("expected AND block");
        };
        assert_eq!(inner.len(), 2);
        let Statement::Or { statements: alternatives } = &inner[1] else {
            panic!("expected OR block");
        };
        let Statement::Bool(cmp) = &alternatives[0] else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.operator, ComparisonOp::RegexMatch);
        assert!(cmp.pattern.is_some());
    }

    #[test]
    fn test_parse_if_else_and_set() {
        let program = Parser::parse(concat!(
            r#"if (record.dept == "IT") { set result.team = "ops"; } "#,
            r#"else { set result.team = record.dept; }"#,
        ))
        .unwrap();
        let statements = body(program);
        let Statement::If {
            then_branch,
            else_branch,
            ..
        } = &statements[0]
        else {
            panic!("expected if statement");
        };
        assert_eq!(then_branch.len(), 1);
        assert_eq!(else_branch.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_parse_paths_with_indexes_and_keywords() {
        let program = Parser::parse("record.items.0.set == 1;").unwrap();
        let statements = body(program);
        let Statement::Bool(cmp) = &statements[0] else {
            panic!("expected comparison");
        };
        assert_eq!(
            cmp.left,
            Expression::Field(FieldPath::new(
                "record",
                vec![
                    PathSegment::Key("items".to_string()),
                    PathSegment::Index(0),
                    PathSegment::Key("set".to_string()),
                ]
            ))
        );
    }

    #[test]
    fn test_parse_function_call_with_named_args() {
        let program =
            Parser::parse(r#"convert("split", record.tags, on=",", index=1) == "b";"#).unwrap();
        let statements = body(program);
        let Statement::Bool(cmp) = &statements[0] else {
            panic!("expected comparison");
        };
        let Expression::FunctionCall(call) = &cmp.left else {
            panic!("expected call");
        };
        assert_eq!(call.arguments.len(), 4);
        assert_eq!(call.arguments[2].name.as_deref(), Some("on"));
    }

    #[test]
    fn test_empty_program_is_empty_and() {
        assert_eq!(body(Parser::parse("  # nothing\n").unwrap()).len(), 0);
    }

    #[test]
    fn test_unknown_function_is_compile_error() {
        let err = Parser::parse(r#"system("rm") == 0;"#).unwrap_err();
        assert!(err.message.contains("Unknown function 'system'"));
        assert_eq!(err.position, 0);
    }

    #[test]
    fn test_set_restrictions() {
        let err = Parser::parse("set record.x = 1;").unwrap_err();
        assert!(err.message.contains("read-only"));
        assert_eq!(err.position, 4);

        let err = Parser::parse("set counter = 1;").unwrap_err();
        assert!(err.message.contains("global name"));
    }

    #[test]
    fn test_error_positions() {
        let err = Parser::parse("record.a == 1").unwrap_err();
        assert!(err.message.contains("Expected ;"));
        assert_eq!(err.position, 13);

        let err = Parser::parse("record.a = 1;").unwrap_err();
        assert!(err.message.contains("use '=='"));
        assert_eq!(err.position, 9);

        let err = Parser::parse("AND { record.a == 1;").unwrap_err();
        assert!(err.message.contains("Unclosed block"));

        let err = Parser::parse(r#"record.a *= "(";"#).unwrap_err();
        assert!(err.message.contains("Invalid regex"));
        assert_eq!(err.position, 12);
    }

    #[test]
    fn test_validate_lists_fields() {
        let fields =
            Parser::validate(r#"record.a == tmp.b; set result.c = lower(record.a);"#).unwrap();
        assert_eq!(fields, vec!["record.a", "tmp.b", "result.c"]);
    }
}
