use serde_json::{json, Value};
use sift_core::problem::{Fix, Problem};
use sift_core::registry::Registry;
use sift_core::rule::{EnvironmentDescriptor, RuleContext, RuleDescriptor};

use crate::util::position;

/// Registers the rules and environments that ship with the tool.
pub fn register_builtins(registry: &mut Registry) {
    registry.define_rule(
        "no-trailing-spaces",
        RuleDescriptor::new(no_trailing_spaces).fixable(),
    );
    registry.define_rule("eol-last", RuleDescriptor::new(eol_last).fixable());
    registry.define_rule(
        "linebreak-style",
        RuleDescriptor::new(linebreak_style)
            .fixable()
            .with_schema(vec![json!({ "enum": ["unix", "windows"] })]),
    );
    registry.define_rule(
        "max-lines",
        RuleDescriptor::new(max_lines).with_schema(vec![json!({
            "oneOf": [
                { "type": "integer", "minimum": 0 },
                {
                    "type": "object",
                    "properties": { "max": { "type": "integer", "minimum": 0 } },
                    "additionalProperties": false
                }
            ]
        })]),
    );
    registry.define_rule("no-tabs", RuleDescriptor::new(no_tabs));

    registry.define_environment("plain", EnvironmentDescriptor::default());
    let mut ci = EnvironmentDescriptor::default();
    ci.globals.insert("CI".to_string(), json!(true));
    registry.define_environment("ci", ci);
}

fn problem_at(text: &str, message: impl Into<String>, start: usize, end: usize) -> Problem {
    let (line, column) = position(text, start);
    Problem::new(message, line, column, start, end)
}

fn no_trailing_spaces(ctx: &RuleContext<'_>) -> Vec<Problem> {
    let mut problems = Vec::new();
    let mut offset = 0usize;
    for line in ctx.text.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        let content = content.strip_suffix('\r').unwrap_or(content);
        let trimmed = content.trim_end_matches([' ', '\t']);
        if trimmed.len() < content.len() {
            let start = offset + trimmed.len();
            let end = offset + content.len();
            problems.push(
                problem_at(ctx.text, "Trailing spaces not allowed.", start, end)
                    .with_fix(Fix::remove(start, end)),
            );
        }
        offset += line.len();
    }
    problems
}

fn eol_last(ctx: &RuleContext<'_>) -> Vec<Problem> {
    if ctx.text.is_empty() || ctx.text.ends_with('\n') {
        return Vec::new();
    }
    let at = ctx.text.len();
    vec![problem_at(
        ctx.text,
        "Newline required at end of file but not found.",
        at,
        at,
    )
    .with_fix(Fix::insert(at, "\n"))]
}

fn linebreak_style(ctx: &RuleContext<'_>) -> Vec<Problem> {
    let want_unix = ctx.options.first().and_then(Value::as_str) != Some("windows");
    let mut problems = Vec::new();
    let bytes = ctx.text.as_bytes();
    for (at, _) in ctx.text.match_indices('\n') {
        let has_cr = at > 0 && bytes[at - 1] == b'\r';
        if want_unix && has_cr {
            problems.push(
                problem_at(
                    ctx.text,
                    "Expected linefeed (LF) but found carriage return line feed (CRLF).",
                    at - 1,
                    at + 1,
                )
                .with_fix(Fix::replace(at - 1, at + 1, "\n")),
            );
        } else if !want_unix && !has_cr {
            problems.push(
                problem_at(
                    ctx.text,
                    "Expected carriage return line feed (CRLF) but found linefeed (LF).",
                    at,
                    at + 1,
                )
                .with_fix(Fix::replace(at, at + 1, "\r\n")),
            );
        }
    }
    problems
}

fn max_lines(ctx: &RuleContext<'_>) -> Vec<Problem> {
    let max = match ctx.options.first() {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(300) as usize,
        Some(Value::Object(map)) => map
            .get("max")
            .and_then(Value::as_u64)
            .unwrap_or(300) as usize,
        _ => 300,
    };
    let count = ctx.text.lines().count();
    if count <= max {
        return Vec::new();
    }
    // point at the first line beyond the limit
    let start = ctx
        .text
        .split_inclusive('\n')
        .take(max)
        .map(str::len)
        .sum::<usize>();
    vec![problem_at(
        ctx.text,
        format!("File has too many lines ({count}). Maximum allowed is {max}."),
        start,
        ctx.text.len(),
    )]
}

fn no_tabs(ctx: &RuleContext<'_>) -> Vec<Problem> {
    ctx.text
        .match_indices('\t')
        .map(|(at, _)| problem_at(ctx.text, "Unexpected tab character.", at, at + 1))
        .collect()
}
