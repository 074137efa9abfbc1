use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use sift_core::config::ConfigSource;
use sift_core::engine::{Engine, EngineOptions};
use sift_core::registry::{Registry, StaticPluginLoader};
use sift_core::resolver::{ConfigResolver, ResolverOptions};

mod parser;
mod report;
mod rules;
mod util;
mod walk;

#[derive(Parser, Debug)]
#[command(name = "sift")]
#[command(about = "Configurable static analysis with autofix and caching.", long_about = None)]
#[command(version)]
struct Cli {
    /// Files, directories, or glob patterns to check.
    #[arg(value_name = "PATTERN", required_unless_present = "stdin")]
    patterns: Vec<String>,

    /// Apply fixes and write them back to disk.
    #[arg(long)]
    fix: bool,

    /// Use this configuration file on top of anything discovered.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not discover configuration fragment files.
    #[arg(long = "no-siftrc")]
    no_siftrc: bool,

    /// Configure a rule, as `id=SETTING` (e.g. `no-tabs=2` or `linebreak-style=[2,"unix"]`).
    #[arg(long = "rule", value_name = "ID=SETTING")]
    rules: Vec<String>,

    /// Enable an environment.
    #[arg(long = "env", value_name = "NAME")]
    envs: Vec<String>,

    /// Define a global, as `NAME` or `NAME=VALUE`.
    #[arg(long = "global", value_name = "NAME[=VALUE]")]
    globals: Vec<String>,

    /// Load a plugin.
    #[arg(long = "plugin", value_name = "NAME")]
    plugins: Vec<String>,

    /// Lint ignored and hidden files too.
    #[arg(long = "no-ignore")]
    no_ignore: bool,

    /// Report errors only.
    #[arg(long)]
    quiet: bool,

    /// Fail when more than this many warnings are reported.
    #[arg(long, value_name = "N")]
    max_warnings: Option<usize>,

    /// Skip files that were clean last run and have not changed.
    #[arg(long)]
    cache: bool,

    /// Where the cache lives.
    #[arg(long, value_name = "PATH", default_value = ".siftcache")]
    cache_location: PathBuf,

    /// Read the text to check from standard input.
    #[arg(long)]
    stdin: bool,

    /// Path used for configuration lookup and reporting in --stdin mode.
    #[arg(long, value_name = "PATH", default_value = "stdin.txt")]
    stdin_filename: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Format {
    Text,
    Json,
}

/// `id=SETTING` with the setting either JSON or a bare severity word.
fn parse_rule_arg(arg: &str) -> Result<(String, Value)> {
    let Some((id, setting)) = arg.split_once('=') else {
        bail!("--rule expects ID=SETTING, got '{arg}'");
    };
    let id = id.trim();
    if id.is_empty() {
        bail!("--rule expects ID=SETTING, got '{arg}'");
    }
    let setting = setting.trim();
    let value = serde_json::from_str(setting).unwrap_or_else(|_| json!(setting));
    Ok((id.to_string(), value))
}

/// `NAME` defines the global as true; `NAME=VALUE` takes the value as JSON
/// or, failing that, as a string.
fn parse_global_arg(arg: &str) -> (String, Value) {
    match arg.split_once('=') {
        Some((name, value)) => {
            let parsed = serde_json::from_str(value.trim()).unwrap_or_else(|_| json!(value.trim()));
            (name.trim().to_string(), parsed)
        }
        None => (arg.trim().to_string(), json!(true)),
    }
}

fn build_engine(cli: &Cli, cwd: &Path) -> Result<Engine> {
    let mut registry = Registry::new();
    rules::register_builtins(&mut registry);

    let mut cli_rules = BTreeMap::new();
    for arg in &cli.rules {
        let (id, setting) = parse_rule_arg(arg)?;
        cli_rules.insert(id, setting);
    }
    let mut cli_globals = BTreeMap::new();
    for arg in &cli.globals {
        let (name, value) = parse_global_arg(arg);
        cli_globals.insert(name, value);
    }

    let mut resolver_options = ResolverOptions::new(cwd);
    resolver_options.use_rc_files = !cli.no_siftrc;
    resolver_options.config_source = cli
        .config
        .as_ref()
        .map(|path| ConfigSource::FilePath(path.clone()));
    resolver_options.cli_rules = cli_rules;
    resolver_options.cli_globals = cli_globals;
    resolver_options.cli_envs = cli.envs.clone();
    resolver_options.cli_plugins = cli.plugins.clone();
    let resolver = ConfigResolver::new(resolver_options)
        .map_err(anyhow::Error::new)
        .context("loading configuration")?;

    let engine_options = EngineOptions {
        fix: cli.fix,
        cache: cli.cache,
        cache_location: cli.cache_location.clone(),
    };

    Ok(Engine::new(
        engine_options,
        registry,
        resolver,
        Box::new(parser::PlainParser),
        Box::new(StaticPluginLoader::new()),
    ))
}

fn run(cli: Cli) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("determining working directory")?;
    let mut engine = build_engine(&cli, &cwd)?;

    let mut report = if cli.stdin {
        let text = std::io::read_to_string(std::io::stdin()).context("reading standard input")?;
        engine.run_text(&text, &cwd.join(&cli.stdin_filename))?
    } else {
        let targets = walk::collect_targets(&cli.patterns, &cwd, cli.no_ignore)?;
        let report = engine.run(&targets)?;
        if cli.fix {
            Engine::write_fixes(&report).context("writing fixes")?;
        }
        report
    };

    if cli.quiet {
        report = report::apply_quiet(report);
    }

    match cli.format {
        Format::Text => print!("{}", report::render_text(&report)),
        Format::Json => println!("{}", report::render_json(&report)?),
    }

    if report.error_count > 0 {
        return Ok(ExitCode::from(1));
    }
    if let Some(ceiling) = cli.max_warnings {
        if report.warning_count > ceiling {
            eprintln!("sift found too many warnings (maximum: {ceiling})");
            return Ok(ExitCode::from(1));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("sift: {err:#}");
            ExitCode::from(2)
        }
    }
}
