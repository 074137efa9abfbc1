use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::cache::{file_identity, CacheDescriptor, FileCache};
use crate::config::EffectiveConfiguration;
use crate::driver::analyze;
use crate::fixer::fix_until_converged;
use crate::parser::Parser;
use crate::problem::{Problem, Severity};
use crate::registry::{PluginLoader, Registry};
use crate::resolver::ConfigResolver;

pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Hash identifying one effective configuration under one tool version.
/// Serialization is stable: every map inside is ordered.
pub fn config_hash(config: &EffectiveConfiguration) -> String {
    let json = serde_json::to_string(config).unwrap_or_default();
    sha256_hex(format!("{TOOL_VERSION}_{json}").as_bytes())
}

/// Why a target was ignored rather than analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreKind {
    Dotfile,
    Pattern,
}

/// One file the engine was asked to look at. Ignored targets still produce
/// a result so the caller can explain why nothing happened.
#[derive(Debug, Clone)]
pub struct Target {
    pub path: PathBuf,
    pub ignored: Option<IgnoreKind>,
}

impl Target {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Target {
            path: path.into(),
            ignored: None,
        }
    }

    pub fn ignored(path: impl Into<PathBuf>, kind: IgnoreKind) -> Self {
        Target {
            path: path.into(),
            ignored: Some(kind),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub path: PathBuf,
    pub problems: Vec<Problem>,
    pub error_count: usize,
    pub warning_count: usize,
    /// Fixed text, present only when fixing changed the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl FileResult {
    fn from_problems(path: PathBuf, problems: Vec<Problem>, output: Option<String>) -> Self {
        let error_count = problems.iter().filter(|p| p.is_error()).count();
        let warning_count = problems.len() - error_count;
        FileResult {
            path,
            problems,
            error_count,
            warning_count,
            output,
        }
    }

    fn clean(path: PathBuf) -> Self {
        FileResult {
            path,
            problems: Vec::new(),
            error_count: 0,
            warning_count: 0,
            output: None,
        }
    }

    fn ignored(path: PathBuf, kind: IgnoreKind) -> Self {
        let message = match kind {
            IgnoreKind::Dotfile => {
                "File ignored by default. Use a negated ignore pattern to check it."
            }
            IgnoreKind::Pattern => {
                "File ignored because of a matching ignore pattern. Use --no-ignore to override."
            }
        };
        let mut problem = Problem::new(message, 1, 1, 0, 0);
        problem.severity = Severity::Warn;
        FileResult::from_problems(path, vec![problem], None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub results: Vec<FileResult>,
    pub error_count: usize,
    pub warning_count: usize,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub fix: bool,
    pub cache: bool,
    pub cache_location: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            fix: false,
            cache: false,
            cache_location: PathBuf::from(".siftcache"),
        }
    }
}

/// Ties the resolver, registry, driver, fixer, and cache together for one
/// run over a set of targets.
pub struct Engine {
    options: EngineOptions,
    registry: Registry,
    resolver: ConfigResolver,
    parser: Box<dyn Parser>,
    loader: Box<dyn PluginLoader>,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        registry: Registry,
        resolver: ConfigResolver,
        parser: Box<dyn Parser>,
        loader: Box<dyn PluginLoader>,
    ) -> Self {
        Engine {
            options,
            registry,
            resolver,
            parser,
            loader,
        }
    }

    pub fn run(&mut self, targets: &[Target]) -> Result<RunReport> {
        let mut cache = FileCache::load(&self.options.cache_location)
            .context("loading analysis cache")?;
        if !self.options.cache {
            cache
                .discard_persisted()
                .context("discarding stale analysis cache")?;
        }

        // The hash is recomputed only when the resolved configuration is a
        // different allocation than the previous file's.
        let mut hashed: Option<(Arc<EffectiveConfiguration>, String)> = None;
        let mut results = Vec::with_capacity(targets.len());

        for target in targets {
            if let Some(kind) = target.ignored {
                results.push(FileResult::ignored(target.path.clone(), kind));
                continue;
            }

            let config = self
                .resolver
                .resolve(&target.path, &mut self.registry, self.loader.as_ref())
                .map_err(anyhow::Error::new)
                .with_context(|| format!("resolving configuration for {}", target.path.display()))?;
            let hash = match &hashed {
                Some((previous, hash)) if Arc::ptr_eq(previous, &config) => hash.clone(),
                _ => {
                    let hash = config_hash(&config);
                    hashed = Some((Arc::clone(&config), hash.clone()));
                    hash
                }
            };

            let identity = if self.options.cache {
                let identity = file_identity(&target.path)
                    .with_context(|| format!("stat {}", target.path.display()))?;
                let fresh = cache
                    .get(&target.path)
                    .is_some_and(|d| d.is_fresh(identity, &hash));
                if fresh {
                    results.push(FileResult::clean(target.path.clone()));
                    continue;
                }
                Some(identity)
            } else {
                None
            };

            let text = fs::read_to_string(&target.path)
                .with_context(|| format!("reading {}", target.path.display()))?;
            let result = self.check_text(&target.path, &text, &config);

            if self.options.cache {
                let clean = result.problems.is_empty() && result.output.is_none();
                match (clean, identity) {
                    (true, Some(identity)) => cache.set(
                        target.path.clone(),
                        CacheDescriptor {
                            identity,
                            config_hash: hash,
                        },
                    ),
                    _ => cache.remove(&target.path),
                }
            }
            results.push(result);
        }

        if self.options.cache {
            cache.flush().context("writing analysis cache")?;
        }

        let error_count = results.iter().map(|r| r.error_count).sum();
        let warning_count = results.iter().map(|r| r.warning_count).sum();
        Ok(RunReport {
            results,
            error_count,
            warning_count,
        })
    }

    /// Checks one in-memory string as if it lived at `virtual_path`, which
    /// anchors both config discovery and the reported path.
    pub fn run_text(&mut self, text: &str, virtual_path: &Path) -> Result<RunReport> {
        let config = self
            .resolver
            .resolve(virtual_path, &mut self.registry, self.loader.as_ref())
            .map_err(anyhow::Error::new)
            .with_context(|| format!("resolving configuration for {}", virtual_path.display()))?;
        let result = self.check_text(virtual_path, text, &config);
        let error_count = result.error_count;
        let warning_count = result.warning_count;
        Ok(RunReport {
            results: vec![result],
            error_count,
            warning_count,
        })
    }

    fn check_text(
        &self,
        path: &Path,
        text: &str,
        config: &EffectiveConfiguration,
    ) -> FileResult {
        if self.options.fix {
            let report =
                fix_until_converged(path, text, config, &self.registry, self.parser.as_ref());
            let output = (report.fixed && report.output != text).then_some(report.output);
            FileResult::from_problems(path.to_path_buf(), report.problems, output)
        } else {
            let problems = analyze(path, text, config, &self.registry, self.parser.as_ref());
            FileResult::from_problems(path.to_path_buf(), problems, None)
        }
    }

    /// Writes every fixed output in the report back to its file.
    pub fn write_fixes(report: &RunReport) -> Result<()> {
        for result in &report.results {
            if let Some(output) = &result.output {
                fs::write(&result.path, output)
                    .with_context(|| format!("writing fixes to {}", result.path.display()))?;
            }
        }
        Ok(())
    }
}
