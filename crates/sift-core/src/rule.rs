use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::parser::Token;
use crate::problem::Problem;

/// Everything a rule sees while checking one file.
pub struct RuleContext<'a> {
    pub file_path: &'a Path,
    pub text: &'a str,
    pub tree: &'a Value,
    pub tokens: &'a [Token],
    /// Options configured after the severity slot, already schema-validated.
    pub options: &'a [Value],
    pub globals: &'a BTreeMap<String, Value>,
}

/// A rule's checking callback. Implementations report problems with byte
/// spans into `context.text`; severity is stamped by the driver.
pub trait Rule: Send + Sync {
    fn check(&self, context: &RuleContext<'_>) -> Vec<Problem>;
}

impl<F> Rule for F
where
    F: Fn(&RuleContext<'_>) -> Vec<Problem> + Send + Sync,
{
    fn check(&self, context: &RuleContext<'_>) -> Vec<Problem> {
        self(context)
    }
}

/// A registered rule: its option schemas, whether its fixes are honored,
/// and the checker itself.
#[derive(Clone)]
pub struct RuleDescriptor {
    /// Positional JSON Schemas for the options after the severity slot.
    pub schema: Vec<Value>,
    pub fixable: bool,
    pub check: Arc<dyn Rule>,
}

impl RuleDescriptor {
    pub fn new(check: impl Rule + 'static) -> Self {
        RuleDescriptor {
            schema: Vec::new(),
            fixable: false,
            check: Arc::new(check),
        }
    }

    pub fn fixable(mut self) -> Self {
        self.fixable = true;
        self
    }

    pub fn with_schema(mut self, schema: Vec<Value>) -> Self {
        self.schema = schema;
        self
    }
}

/// An environment contributes globals and parser options when enabled.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentDescriptor {
    pub globals: BTreeMap<String, Value>,
    pub parser_options: BTreeMap<String, Value>,
}

/// What a plugin package exports: rules and environments keyed by local id.
#[derive(Clone, Default)]
pub struct Plugin {
    pub rules: BTreeMap<String, RuleDescriptor>,
    pub environments: BTreeMap<String, EnvironmentDescriptor>,
}
