//! Engine library for the `sift` static analysis tool: configuration
//! cascade resolution, the rule registry, the analysis driver, autofix
//! convergence, and the cache-aware run orchestrator.

pub mod cache;
pub mod config;
pub mod driver;
pub mod engine;
pub mod fixer;
pub mod parser;
pub mod problem;
pub mod registry;
pub mod resolver;
pub mod rule;
pub mod validate;

pub use engine::{Engine, EngineOptions, FileResult, IgnoreKind, RunReport, Target};
pub use problem::{Fix, Problem, Severity};
