//! Lexer/tokenizer for record filter programs.
//!
//! Converts a filter string into a stream of positioned tokens.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a filter program.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Identifiers and literals
    /// A name (field root, path segment or function name).
    Identifier(String),
    /// A string literal.
    StringLiteral(String),
    /// An integer literal.
    IntegerLiteral(i64),
    /// A floating-point literal.
    FloatLiteral(f64),

    // Keywords (case-sensitive)
    /// AND block keyword.
    And,
    /// OR block keyword.
    Or,
    /// if keyword.
    If,
    /// else keyword.
    Else,
    /// set keyword.
    Set,

    // Operators
    /// Equal (==).
    Equal,
    /// Not equal (!=).
    NotEqual,
    /// Less than (<).
    LessThan,
    /// Greater than (>).
    GreaterThan,
    /// Less than or equal (<=).
    LessThanOrEqual,
    /// Greater than or equal (>=).
    GreaterThanOrEqual,
    /// Regex match (*=).
    RegexMatch,
    /// Assignment (=).
    Assign,

    // Delimiters
    /// Left brace.
    LeftBrace,
    /// Right brace.
    RightBrace,
    /// Left parenthesis.
    LeftParen,
    /// Right parenthesis.
    RightParen,
    /// Comma.
    Comma,
    /// Path separator.
    Dot,
    /// Statement terminator.
    Semicolon,

    /// End of input.
    Eof,
}

impl Token {
    /// Keyword text when a keyword is used as a path segment (`record.set`).
    #[must_use]
    pub fn keyword_text(&self) -> Option<&'static str> {
        match self {
            Token::And => Some("AND"),
            Token::Or => Some("OR"),
            Token::If => Some("if"),
            Token::Else => Some("else"),
            Token::Set => Some("set"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Identifier(s) => write!(f, "name '{s}'"),
            Token::StringLiteral(s) => write!(f, "string \"{s}\""),
            Token::IntegerLiteral(i) => write!(f, "integer {i}"),
            Token::FloatLiteral(fl) => write!(f, "float {fl}"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::Set => write!(f, "set"),
            Token::Equal => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::LessThan => write!(f, "<"),
            Token::GreaterThan => write!(f, ">"),
            Token::LessThanOrEqual => write!(f, "<="),
            Token::GreaterThanOrEqual => write!(f, ">="),
            Token::RegexMatch => write!(f, "*="),
            Token::Assign => write!(f, "="),
            Token::LeftBrace => write!(f, "{{"),
            Token::RightBrace => write!(f, "}}"),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Dot => write!(f, "."),
            Token::Semicolon => write!(f, ";"),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

/// A token with the character offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

/// Error during lexical analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct LexerError {
    /// Error message.
    pub message: String,
    /// Position in the input where the error occurred.
    pub position: usize,
}

impl std::fmt::Display for LexerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at position {}", self.message, self.position)
    }
}

impl std::error::Error for LexerError {}

/// Lexer for tokenizing filter programs.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    position: usize,
    after_dot: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            position: 0,
            after_dot: false,
        }
    }

    /// Get all tokens from the input, terminated by `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let position = self.position;
            let token = self.next_token()?;
            self.after_dot = token == Token::Dot;
            let done = token == Token::Eof;
            tokens.push(Spanned { token, position });
            if done {
                break;
            }
        }
        Ok(tokens)
    }

    /// Get the next token from the input.
    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_trivia();

        let Some(&ch) = self.input.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            '{' => self.single(Token::LeftBrace),
            '}' => self.single(Token::RightBrace),
            '(' => self.single(Token::LeftParen),
            ')' => self.single(Token::RightParen),
            ',' => self.single(Token::Comma),
            '.' => self.single(Token::Dot),
            ';' => self.single(Token::Semicolon),
            '=' => {
                self.advance();
                if self.input.peek() == Some(&'=') {
                    self.advance();
                    Ok(Token::Equal)
                } else {
                    Ok(Token::Assign)
                }
            }
            '!' => self.expect_followed_by('=', Token::NotEqual),
            '*' => self.expect_followed_by('=', Token::RegexMatch),
            '<' => {
                self.advance();
                if self.input.peek() == Some(&'=') {
                    self.advance();
                    Ok(Token::LessThanOrEqual)
                } else {
                    Ok(Token::LessThan)
                }
            }
            '>' => {
                self.advance();
                if self.input.peek() == Some(&'=') {
                    self.advance();
                    Ok(Token::GreaterThanOrEqual)
                } else {
                    Ok(Token::GreaterThan)
                }
            }
            '\'' | '"' => self.read_string(ch),
            c if c.is_ascii_digit() || c == '-' => self.read_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            _ => Err(LexerError {
                message: format!("Unexpected character '{ch}'"),
                position: self.position,
            }),
        }
    }

    fn advance(&mut self) -> Option<char> {
        self.position += 1;
        self.input.next()
    }

    fn single(&mut self, token: Token) -> Result<Token, LexerError> {
        self.advance();
        Ok(token)
    }

    fn expect_followed_by(&mut self, next: char, token: Token) -> Result<Token, LexerError> {
        let start = self.position;
        let first = self.advance();
        if self.input.peek() == Some(&next) {
            self.advance();
            Ok(token)
        } else {
            Err(LexerError {
                message: format!(
                    "Expected '{next}' after '{}'",
                    first.unwrap_or_default()
                ),
                position: start,
            })
        }
    }

    /// Skip whitespace and `#` line comments.
    fn skip_trivia(&mut self) {
        while let Some(&ch) = self.input.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else if ch == '#' {
                while let Some(&c) = self.input.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexerError> {
        let start_pos = self.position;
        self.advance();
        let mut value = String::new();

        loop {
            match self.advance() {
                Some(ch) if ch == quote => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('\\') => value.push('\\'),
                    Some(c) if c == quote => value.push(c),
                    // Unknown escapes are kept verbatim so regex classes like \d survive.
                    Some(c) => {
                        value.push('\\');
                        value.push(c);
                    }
                    None => {
                        return Err(LexerError {
                            message: "Unterminated string literal".to_string(),
                            position: start_pos,
                        })
                    }
                },
                Some(ch) => value.push(ch),
                None => {
                    return Err(LexerError {
                        message: "Unterminated string literal".to_string(),
                        position: start_pos,
                    })
                }
            }
        }

        Ok(Token::StringLiteral(value))
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start_pos = self.position;
        let mut value = String::new();

        if self.input.peek() == Some(&'-') {
            self.advance();
            value.push('-');
            if !self.input.peek().is_some_and(char::is_ascii_digit) {
                return Err(LexerError {
                    message: "Expected digits after '-'".to_string(),
                    position: start_pos,
                });
            }
        }

        self.read_digits(&mut value);

        // A number directly after '.' is a list index; `items.0.name` must not lex as 0.
        if !self.after_dot && self.input.peek() == Some(&'.') {
            self.advance();
            value.push('.');
            let before = value.len();
            self.read_digits(&mut value);
            if value.len() == before {
                return Err(LexerError {
                    message: "Expected digits after decimal point".to_string(),
                    position: self.position,
                });
            }

            return value
                .parse::<f64>()
                .map(Token::FloatLiteral)
                .map_err(|_| LexerError {
                    message: "Invalid floating-point number".to_string(),
                    position: start_pos,
                });
        }

        value
            .parse::<i64>()
            .map(Token::IntegerLiteral)
            .map_err(|_| LexerError {
                message: "Invalid integer number".to_string(),
                position: start_pos,
            })
    }

    fn read_digits(&mut self, value: &mut String) {
        while let Some(&ch) = self.input.peek() {
            if ch.is_ascii_digit() {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut value = String::new();

        while let Some(&ch) = self.input.peek() {
            if ch.is_alphanumeric() || ch == '_' || ch == '-' {
                value.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match value.as_str() {
            "AND" => Token::And,
            "OR" => Token::Or,
            "if" => Token::If,
            "else" => Token::Else,
            "set" => Token::Set,
            _ => Token::Identifier(value),
        }
    }
}
