use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tri-state severity for a configured rule. `Off` never appears on a
/// reported problem; it only exists in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Off,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Off => "off",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    /// Parses the severity forms accepted in configuration: 0/1/2 or the
    /// strings "off"/"warn"/"error" (case-insensitive).
    pub fn from_config_value(value: &Value) -> Option<Severity> {
        match value {
            Value::Number(n) => match n.as_u64()? {
                0 => Some(Severity::Off),
                1 => Some(Severity::Warn),
                2 => Some(Severity::Error),
                _ => None,
            },
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "off" => Some(Severity::Off),
                "warn" => Some(Severity::Warn),
                "error" => Some(Severity::Error),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A proposed replacement of one contiguous byte range with new text.
/// Attached to at most one problem; never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Fix {
    pub fn replace(start: usize, end: usize, text: impl Into<String>) -> Self {
        Fix {
            start,
            end,
            text: text.into(),
        }
    }

    pub fn remove(start: usize, end: usize) -> Self {
        Fix::replace(start, end, "")
    }

    pub fn insert(at: usize, text: impl Into<String>) -> Self {
        Fix::replace(at, at, text)
    }
}

/// One reported issue. Produced fresh by each analysis pass; never mutated
/// afterwards, only filtered and collected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Problem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub line: u32,
    pub column: u32,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Fix>,
}

impl Problem {
    /// A plain rule violation at a byte span. Severity is a placeholder
    /// until the driver stamps the configured level.
    pub fn new(message: impl Into<String>, line: u32, column: u32, start: usize, end: usize) -> Self {
        Problem {
            rule_id: None,
            severity: Severity::Warn,
            message: message.into(),
            line,
            column,
            start,
            end,
            fatal: false,
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fix = Some(fix);
        self
    }

    /// The single problem representing a parse failure. Always fix-less.
    pub fn fatal(message: impl Into<String>, line: u32, column: u32, offset: usize) -> Self {
        Problem {
            rule_id: None,
            severity: Severity::Error,
            message: message.into(),
            line,
            column,
            start: offset,
            end: offset,
            fatal: true,
            fix: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.fatal || self.severity == Severity::Error
    }
}

/// Stable report order: byte span, then rule id.
pub fn sort_problems(problems: &mut [Problem]) {
    problems.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.end.cmp(&b.end))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
}
