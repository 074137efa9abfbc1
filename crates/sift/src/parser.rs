use std::collections::BTreeMap;

use serde_json::{json, Value};
use sift_core::parser::{ParseFailure, ParseOutput, Parser, Token};

use crate::util::position;

/// Default parser: splits text into whitespace-separated tokens and checks
/// bracket balance. Anything with unbalanced `()`, `[]`, or `{}` is a
/// syntax error, which is enough structure for textual rules.
pub struct PlainParser;

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn check_brackets(text: &str) -> Result<(), ParseFailure> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (at, ch) in text.char_indices() {
        match ch {
            '(' | '[' | '{' => stack.push((ch, at)),
            ')' | ']' | '}' => match stack.pop() {
                Some((open, _)) if closing_for(open) == ch => {}
                _ => {
                    let (line, column) = position(text, at);
                    return Err(ParseFailure {
                        message: format!("unmatched '{ch}'"),
                        line,
                        column,
                        offset: at,
                    });
                }
            },
            _ => {}
        }
    }
    if let Some((open, at)) = stack.pop() {
        let (line, column) = position(text, at);
        return Err(ParseFailure {
            message: format!("unclosed '{open}'"),
            line,
            column,
            offset: at,
        });
    }
    Ok(())
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    for (at, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some(from) = start.take() {
                let (line, column) = position(text, from);
                tokens.push(Token {
                    text: text[from..at].to_string(),
                    start: from,
                    end: at,
                    line,
                    column,
                });
            }
        } else if start.is_none() {
            start = Some(at);
        }
    }
    if let Some(from) = start {
        let (line, column) = position(text, from);
        tokens.push(Token {
            text: text[from..].to_string(),
            start: from,
            end: text.len(),
            line,
            column,
        });
    }
    tokens
}

impl Parser for PlainParser {
    fn parse(
        &self,
        text: &str,
        parser_id: &str,
        _options: &BTreeMap<String, Value>,
    ) -> Result<ParseOutput, ParseFailure> {
        if parser_id != "plain" {
            return Err(ParseFailure {
                message: format!("unknown parser '{parser_id}'"),
                line: 1,
                column: 1,
                offset: 0,
            });
        }
        check_brackets(text)?;
        let tokens = tokenize(text);
        Ok(ParseOutput {
            tree: json!({
                "kind": "root",
                "length": text.len(),
                "tokens": tokens.len(),
            }),
            tokens,
        })
    }
}
