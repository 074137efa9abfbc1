use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use sift_core::engine::{IgnoreKind, Target};
use walkdir::WalkDir;

/// File holding ignore patterns, one glob per line, resolved from the
/// working directory.
pub const IGNORE_FILE_NAME: &str = ".siftignore";

fn load_ignore_set(cwd: &Path) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let ignore_path = cwd.join(IGNORE_FILE_NAME);
    if ignore_path.is_file() {
        let text = fs::read_to_string(&ignore_path)
            .with_context(|| format!("reading {}", ignore_path.display()))?;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let glob = Glob::new(line)
                .with_context(|| format!("invalid ignore pattern '{line}'"))?;
            builder.add(glob);
        }
    }
    builder.build().context("building ignore patterns")
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn relative<'a>(path: &'a Path, cwd: &Path) -> &'a Path {
    path.strip_prefix(cwd).unwrap_or(path)
}

fn has_hidden_component(rel: &Path) -> bool {
    rel.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| s.starts_with('.'))
    })
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Expands command-line patterns into an ordered, de-duplicated target list.
///
/// Files named directly are kept even when ignored, marked so the engine
/// can warn about them; files discovered by walking a directory or glob are
/// silently skipped when ignored or hidden. `no_ignore` turns both the
/// ignore file and the hidden-file default off.
pub fn collect_targets(patterns: &[String], cwd: &Path, no_ignore: bool) -> Result<Vec<Target>> {
    let ignore_set = if no_ignore {
        GlobSetBuilder::new().build().context("building ignore patterns")?
    } else {
        load_ignore_set(cwd)?
    };

    let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
    let mut targets = Vec::new();
    let mut push = |target: Target, targets: &mut Vec<Target>| {
        if seen.insert(target.path.clone()) {
            targets.push(target);
        }
    };

    for pattern in patterns {
        let joined = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            cwd.join(pattern)
        };

        if joined.is_file() {
            let target = if !no_ignore && ignore_set.is_match(relative(&joined, cwd)) {
                Target::ignored(joined, IgnoreKind::Pattern)
            } else if !no_ignore && is_hidden(&joined) {
                Target::ignored(joined, IgnoreKind::Dotfile)
            } else {
                Target::file(joined)
            };
            push(target, &mut targets);
            continue;
        }

        if joined.is_dir() {
            for entry in WalkDir::new(&joined).sort_by_file_name() {
                let entry = entry.with_context(|| format!("walking {}", joined.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = relative(entry.path(), cwd);
                if !no_ignore && (has_hidden_component(rel) || ignore_set.is_match(rel)) {
                    continue;
                }
                push(Target::file(entry.path().to_path_buf()), &mut targets);
            }
            continue;
        }

        if has_glob_meta(pattern) {
            let glob = Glob::new(pattern)
                .with_context(|| format!("invalid pattern '{pattern}'"))?
                .compile_matcher();
            let mut matched = false;
            for entry in WalkDir::new(cwd).sort_by_file_name() {
                let entry = entry.with_context(|| format!("walking {}", cwd.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = relative(entry.path(), cwd);
                if !glob.is_match(rel) {
                    continue;
                }
                if !no_ignore && (has_hidden_component(rel) || ignore_set.is_match(rel)) {
                    continue;
                }
                matched = true;
                push(Target::file(entry.path().to_path_buf()), &mut targets);
            }
            if !matched {
                bail!("no files matching '{pattern}' were found");
            }
            continue;
        }

        bail!("no files matching '{pattern}' were found");
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(targets: &[Target], cwd: &Path) -> Vec<String> {
        targets
            .iter()
            .map(|t| relative(&t.path, cwd).display().to_string())
            .collect()
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        std::fs::create_dir_all(dir.path().join("vendor")).expect("mkdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write");
        std::fs::write(dir.path().join(".hidden.txt"), "h").expect("write");
        std::fs::write(dir.path().join("src/b.txt"), "b").expect("write");
        std::fs::write(dir.path().join("vendor/c.txt"), "c").expect("write");
        std::fs::write(dir.path().join(IGNORE_FILE_NAME), "vendor/*\n").expect("write");
        dir
    }

    #[test]
    fn walking_a_directory_skips_hidden_and_ignored_files_silently() {
        let dir = project();
        let targets =
            collect_targets(&[".".to_string()], dir.path(), false).expect("collect");
        assert_eq!(names(&targets, dir.path()), vec!["a.txt", "src/b.txt"]);
        assert!(targets.iter().all(|t| t.ignored.is_none()));
    }

    #[test]
    fn explicitly_named_ignored_files_become_warn_targets() {
        let dir = project();
        let targets = collect_targets(
            &["vendor/c.txt".to_string(), ".hidden.txt".to_string()],
            dir.path(),
            false,
        )
        .expect("collect");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].ignored, Some(IgnoreKind::Pattern));
        assert_eq!(targets[1].ignored, Some(IgnoreKind::Dotfile));
    }

    #[test]
    fn no_ignore_lifts_both_kinds_of_ignoring() {
        let dir = project();
        let targets = collect_targets(
            &["vendor/c.txt".to_string(), ".hidden.txt".to_string()],
            dir.path(),
            true,
        )
        .expect("collect");
        assert!(targets.iter().all(|t| t.ignored.is_none()));
    }

    #[test]
    fn globs_match_relative_paths_and_skip_ignored_files() {
        let dir = project();
        let targets =
            collect_targets(&["**/*.txt".to_string()], dir.path(), false).expect("collect");
        assert_eq!(names(&targets, dir.path()), vec!["a.txt", "src/b.txt"]);
    }

    #[test]
    fn duplicate_patterns_yield_one_target() {
        let dir = project();
        let targets = collect_targets(
            &["a.txt".to_string(), "a.txt".to_string()],
            dir.path(),
            false,
        )
        .expect("collect");
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn unmatched_patterns_are_an_error() {
        let dir = project();
        let err = collect_targets(&["missing.txt".to_string()], dir.path(), false)
            .expect_err("nothing matches");
        assert!(err.to_string().contains("missing.txt"));
        let err = collect_targets(&["*.rs".to_string()], dir.path(), false)
            .expect_err("glob matches nothing");
        assert!(err.to_string().contains("*.rs"));
    }
}
