use std::path::Path;

use crate::config::EffectiveConfiguration;
use crate::parser::Parser;
use crate::problem::{sort_problems, Problem, Severity};
use crate::registry::Registry;
use crate::rule::RuleContext;

/// Runs one analysis pass over `text`. A parse failure yields exactly one
/// fatal problem and no rule runs; otherwise every enabled rule runs and its
/// problems come back stamped with the configured severity, in stable span
/// order.
pub fn analyze(
    file_path: &Path,
    text: &str,
    config: &EffectiveConfiguration,
    registry: &Registry,
    parser: &dyn Parser,
) -> Vec<Problem> {
    let output = match parser.parse(text, &config.parser, &config.parser_options) {
        Ok(output) => output,
        Err(failure) => {
            return vec![Problem::fatal(
                format!("Parsing error: {}", failure.message),
                failure.line,
                failure.column,
                failure.offset,
            )];
        }
    };

    let mut problems = Vec::new();
    for (rule_id, setting) in &config.rules {
        if setting.severity == Severity::Off {
            continue;
        }
        let Some(descriptor) = registry.rule(rule_id) else {
            let mut missing = Problem::new(
                format!("Definition for rule '{rule_id}' was not found."),
                1,
                1,
                0,
                0,
            );
            missing.rule_id = Some(rule_id.clone());
            missing.severity = Severity::Error;
            problems.push(missing);
            continue;
        };

        let context = RuleContext {
            file_path,
            text,
            tree: &output.tree,
            tokens: &output.tokens,
            options: &setting.options,
            globals: &config.globals,
        };
        for mut problem in descriptor.check.check(&context) {
            problem.rule_id = Some(rule_id.clone());
            problem.severity = setting.severity;
            if !descriptor.fixable {
                problem.fix = None;
            }
            problems.push(problem);
        }
    }

    sort_problems(&mut problems);
    problems
}
