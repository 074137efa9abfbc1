use std::path::Path;

use crate::config::EffectiveConfiguration;
use crate::driver::analyze;
use crate::parser::Parser;
use crate::problem::Problem;
use crate::registry::Registry;

/// Hard ceiling on fix/re-analyze rounds for one file.
pub const MAX_FIX_PASSES: usize = 10;

/// Result of applying one round of fixes.
pub struct FixOutcome {
    pub output: String,
    /// Problems that survive this round: fix-less ones, plus those whose
    /// fix was dropped in a conflict or was unapplicable.
    pub remaining: Vec<Problem>,
    pub applied: bool,
}

/// Applies as many non-conflicting fixes as possible in one pass.
///
/// Candidates are ordered by range start, ties by range end (narrower
/// first), and accepted left to right; a fix overlapping the previously
/// accepted one is dropped and its problem kept. The output is rebuilt in
/// a single pass over the accepted edits.
pub fn apply_fixes(text: &str, problems: Vec<Problem>) -> FixOutcome {
    let mut candidates = Vec::new();
    let mut remaining = Vec::new();
    for problem in problems {
        match &problem.fix {
            Some(fix) if fix.start <= fix.end && fix.end <= text.len() => {
                candidates.push(problem)
            }
            _ => remaining.push(problem),
        }
    }
    candidates.sort_by(|a, b| {
        let fa = a.fix.as_ref().map(|f| (f.start, f.end));
        let fb = b.fix.as_ref().map(|f| (f.start, f.end));
        fa.cmp(&fb)
    });

    let mut output = String::with_capacity(text.len());
    let mut cursor = 0usize;
    let mut applied = false;
    for problem in candidates {
        let (start, end) = match &problem.fix {
            Some(fix) => (fix.start, fix.end),
            None => continue,
        };
        if start < cursor {
            remaining.push(problem);
            continue;
        }
        output.push_str(&text[cursor..start]);
        if let Some(fix) = &problem.fix {
            output.push_str(&fix.text);
        }
        cursor = end;
        applied = true;
    }
    output.push_str(&text[cursor..]);

    FixOutcome {
        output,
        remaining,
        applied,
    }
}

/// Result of the full fix convergence loop.
pub struct FixReport {
    pub output: String,
    pub problems: Vec<Problem>,
    /// True when any pass applied at least one fix.
    pub fixed: bool,
}

/// Repeatedly analyzes and fixes until no fix applies, a fatal problem
/// appears, or the pass ceiling is hit. A fatal pass stops immediately with
/// the text as it stood going into that pass. Hitting the ceiling after a
/// fixing pass triggers one verification re-analysis of the final text.
pub fn fix_until_converged(
    file_path: &Path,
    text: &str,
    config: &EffectiveConfiguration,
    registry: &Registry,
    parser: &dyn Parser,
) -> FixReport {
    let mut current = text.to_string();
    let mut fixed = false;
    let mut passes = 0usize;

    loop {
        let problems = analyze(file_path, &current, config, registry, parser);
        if problems.iter().any(|p| p.fatal) {
            return FixReport {
                output: current,
                problems,
                fixed,
            };
        }

        let outcome = apply_fixes(&current, problems);
        if !outcome.applied {
            return FixReport {
                output: current,
                problems: outcome.remaining,
                fixed,
            };
        }
        fixed = true;
        current = outcome.output;
        passes += 1;

        if passes == MAX_FIX_PASSES {
            let problems = analyze(file_path, &current, config, registry, parser);
            return FixReport {
                output: current,
                problems,
                fixed,
            };
        }
    }
}
