use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

/// One lexical token with its byte span and 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

/// What a parser hands back on success: a JSON syntax tree plus the token
/// stream rules may walk.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub tree: Value,
    pub tokens: Vec<Token>,
}

/// A syntax error. Becomes exactly one fatal problem; no rules run after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub offset: usize,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parsing error at {}:{}: {}",
            self.line, self.column, self.message
        )
    }
}

impl Error for ParseFailure {}

/// Injected parsing capability. `parser_id` is the configured `parser` value;
/// implementations decide which ids they honor.
pub trait Parser {
    fn parse(
        &self,
        text: &str,
        parser_id: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<ParseOutput, ParseFailure>;
}
