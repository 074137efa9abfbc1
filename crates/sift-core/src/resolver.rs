use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::config::{
    load_fragment, merge, ConfigError, ConfigFragment, ConfigSource, EffectiveConfiguration,
    CONFIG_FILE_NAMES,
};
use crate::registry::{PluginError, PluginLoader, Registry};
use crate::validate::{check_environments, check_rules};

/// Parser id applied when no layer configures one.
pub const DEFAULT_PARSER: &str = "plain";

#[derive(Debug)]
pub enum ResolveError {
    Config(ConfigError),
    Plugin(PluginError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Config(err) => err.fmt(f),
            ResolveError::Plugin(err) => err.fmt(f),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ResolveError::Config(err) => Some(err),
            ResolveError::Plugin(err) => Some(err),
        }
    }
}

impl From<ConfigError> for ResolveError {
    fn from(err: ConfigError) -> Self {
        ResolveError::Config(err)
    }
}

impl From<PluginError> for ResolveError {
    fn from(err: PluginError) -> Self {
        ResolveError::Plugin(err)
    }
}

/// Caller-supplied configuration slots. Each maps to one precedence step;
/// empty slots contribute nothing.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    pub cwd: PathBuf,
    /// Lowest-precedence layer under everything discovered or passed in.
    pub base: ConfigFragment,
    /// When false, fragment files are never discovered or read.
    pub use_rc_files: bool,
    pub config_source: Option<ConfigSource>,
    pub cli_envs: Vec<String>,
    pub cli_rules: BTreeMap<String, Value>,
    pub cli_globals: BTreeMap<String, Value>,
    pub cli_parser: Option<String>,
    pub cli_parser_options: BTreeMap<String, Value>,
    pub cli_plugins: Vec<String>,
    /// Overridable for tests; defaults to `$HOME`.
    pub home_dir: Option<PathBuf>,
}

impl ResolverOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        ResolverOptions {
            cwd: cwd.into(),
            base: ConfigFragment::default(),
            use_rc_files: true,
            config_source: None,
            cli_envs: Vec::new(),
            cli_rules: BTreeMap::new(),
            cli_globals: BTreeMap::new(),
            cli_parser: None,
            cli_parser_options: BTreeMap::new(),
            cli_plugins: Vec::new(),
            home_dir: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    fn has_cli_layers(&self) -> bool {
        self.config_source.is_some()
            || !self.cli_envs.is_empty()
            || !self.cli_rules.is_empty()
            || !self.cli_globals.is_empty()
            || self.cli_parser.is_some()
            || !self.cli_parser_options.is_empty()
            || !self.cli_plugins.is_empty()
    }
}

struct SourcedFragment {
    fragment: ConfigFragment,
    source: String,
}

/// Resolves the effective configuration for files, one directory at a time.
/// Results are memoized per directory; resolving the same directory twice
/// hands back the same `Arc`.
pub struct ConfigResolver {
    options: ResolverOptions,
    cli_fragment: Option<SourcedFragment>,
    cache: RefCell<BTreeMap<PathBuf, Arc<EffectiveConfiguration>>>,
}

impl ConfigResolver {
    /// Builds the resolver, reading the caller-supplied config file (if any)
    /// exactly once.
    pub fn new(options: ResolverOptions) -> Result<Self, ConfigError> {
        let cli_fragment = match &options.config_source {
            Some(source) => {
                let fragment = match source {
                    ConfigSource::Inline(fragment) => fragment.clone(),
                    ConfigSource::FilePath(path) => load_fragment(path)?,
                };
                Some(SourcedFragment {
                    fragment,
                    source: source.describe(),
                })
            }
            None => None,
        };
        Ok(ConfigResolver {
            options,
            cli_fragment,
            cache: RefCell::new(BTreeMap::new()),
        })
    }

    pub fn resolve(
        &self,
        file_path: &Path,
        registry: &mut Registry,
        loader: &dyn PluginLoader,
    ) -> Result<Arc<EffectiveConfiguration>, ResolveError> {
        let directory = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(&self.options.cwd)
            .to_path_buf();

        if let Some(hit) = self.cache.borrow().get(&directory) {
            return Ok(Arc::clone(hit));
        }

        let config = Arc::new(self.build(&directory, registry, loader)?);
        self.cache
            .borrow_mut()
            .insert(directory, Arc::clone(&config));
        Ok(config)
    }

    fn build(
        &self,
        directory: &Path,
        registry: &mut Registry,
        loader: &dyn PluginLoader,
    ) -> Result<EffectiveConfiguration, ResolveError> {
        let discovered = if self.options.use_rc_files {
            self.discover(directory)?
        } else {
            Vec::new()
        };

        let has_base = self.options.base != ConfigFragment::default();
        if discovered.is_empty() && !self.options.has_cli_layers() && !has_base {
            return Err(ConfigError::NoConfigFound {
                directory: directory.to_path_buf(),
                files_examined: CONFIG_FILE_NAMES.iter().map(|s| s.to_string()).collect(),
            }
            .into());
        }

        // Precedence, lowest first: base, discovered fragments (outermost
        // first), config file, then the individual command-line slots.
        let mut layers: Vec<SourcedFragment> = Vec::new();
        layers.push(SourcedFragment {
            fragment: self.options.base.clone(),
            source: "base configuration".to_string(),
        });
        for sourced in discovered {
            layers.push(sourced);
        }
        if let Some(cli) = &self.cli_fragment {
            layers.push(SourcedFragment {
                fragment: cli.fragment.clone(),
                source: cli.source.clone(),
            });
        }
        layers.push(SourcedFragment {
            fragment: self.cli_slots_fragment(),
            source: "command line".to_string(),
        });

        let mut merged = ConfigFragment::default();
        for layer in &layers {
            merged = merge(&merged, &layer.fragment);
        }

        for plugin in &merged.plugins {
            registry.load_plugin(plugin, loader)?;
        }

        // Validate each contributing layer against its own source so error
        // messages point at the file (or slot) that is actually wrong.
        for layer in &layers {
            check_environments(&layer.fragment.env, registry, &layer.source)?;
            check_rules(&layer.fragment.rules, registry, &layer.source)?;
        }

        let rules = check_rules(&merged.rules, registry, "resolved configuration")?;

        // Enabled environments contribute globals and parser options below
        // everything configured explicitly.
        let enabled: Vec<String> = merged
            .env
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.clone())
            .collect();
        let mut globals = BTreeMap::new();
        let mut parser_options = BTreeMap::new();
        for name in &enabled {
            if let Some(descriptor) = registry.environment(name) {
                for (k, v) in &descriptor.globals {
                    globals.insert(k.clone(), v.clone());
                }
                for (k, v) in &descriptor.parser_options {
                    parser_options.insert(k.clone(), v.clone());
                }
            }
        }
        for (k, v) in &merged.globals {
            globals.insert(k.clone(), v.clone());
        }
        for (k, v) in &merged.parser_options {
            parser_options.insert(k.clone(), v.clone());
        }

        Ok(EffectiveConfiguration {
            parser: merged.parser.unwrap_or_else(|| DEFAULT_PARSER.to_string()),
            parser_options,
            plugins: merged.plugins,
            env: enabled,
            globals,
            rules,
        })
    }

    /// Walks from `directory` toward the filesystem root collecting fragment
    /// files, outermost first. A `root: true` fragment ends the walk. The
    /// home directory is skipped during the walk and consulted only as the
    /// personal fallback, unless it is the working directory itself; a
    /// caller-supplied config file suppresses the fallback entirely.
    fn discover(&self, directory: &Path) -> Result<Vec<SourcedFragment>, ConfigError> {
        let home = self.options.home_dir.as_deref();
        let mut nearest_first: Vec<SourcedFragment> = Vec::new();

        let mut current = Some(directory);
        while let Some(dir) = current {
            let skip_home = home == Some(dir) && dir != self.options.cwd;
            if !skip_home {
                if let Some(sourced) = self.fragment_in(dir)? {
                    let is_root = sourced.fragment.root;
                    nearest_first.push(sourced);
                    if is_root {
                        break;
                    }
                }
            }
            current = dir.parent();
        }

        if nearest_first.is_empty() && self.cli_fragment.is_none() {
            if let Some(home) = home {
                if let Some(personal) = self.fragment_in(home)? {
                    nearest_first.push(personal);
                }
            }
        }

        nearest_first.reverse();
        Ok(nearest_first)
    }

    fn fragment_in(&self, dir: &Path) -> Result<Option<SourcedFragment>, ConfigError> {
        for name in CONFIG_FILE_NAMES {
            let path = dir.join(name);
            if path.is_file() {
                let fragment = load_fragment(&path)?;
                return Ok(Some(SourcedFragment {
                    fragment,
                    source: path.display().to_string(),
                }));
            }
        }
        Ok(None)
    }

    fn cli_slots_fragment(&self) -> ConfigFragment {
        let mut fragment = ConfigFragment::default();
        for env in &self.options.cli_envs {
            fragment.env.insert(env.clone(), true);
        }
        fragment.rules = self.options.cli_rules.clone();
        fragment.globals = self.options.cli_globals.clone();
        fragment.parser = self.options.cli_parser.clone();
        fragment.parser_options = self.options.cli_parser_options.clone();
        fragment.plugins = self.options.cli_plugins.clone();
        fragment
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::problem::Problem;
    use crate::registry::StaticPluginLoader;
    use crate::rule::{EnvironmentDescriptor, Plugin, RuleContext, RuleDescriptor};

    fn noop_rule() -> RuleDescriptor {
        RuleDescriptor::new(|_: &RuleContext<'_>| Vec::<Problem>::new())
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.define_rule("alpha", noop_rule());
        registry.define_rule("beta", noop_rule());
        let mut ci = EnvironmentDescriptor::default();
        ci.globals.insert("ci".to_string(), json!(true));
        ci.globals.insert("job".to_string(), json!("default"));
        registry.define_environment("ci", ci);
        registry
    }

    fn write_config(dir: &Path, name: &str, value: serde_json::Value) {
        std::fs::write(dir.join(name), value.to_string()).expect("write config");
    }

    fn options_for(dir: &Path) -> ResolverOptions {
        let mut options = ResolverOptions::new(dir);
        options.home_dir = None;
        options
    }

    #[test]
    fn nearer_fragments_win_and_root_truncates() {
        let tree = tempfile::tempdir().expect("tempdir");
        let project = tree.path().join("project");
        let nested = project.join("nested");
        std::fs::create_dir_all(&nested).expect("mkdirs");

        write_config(
            tree.path(),
            ".siftrc.json",
            json!({ "rules": { "alpha": 2, "beta": 2 } }),
        );
        write_config(
            &project,
            ".siftrc.json",
            json!({ "root": true, "rules": { "alpha": 1 } }),
        );

        let resolver = ConfigResolver::new(options_for(&project)).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&nested.join("file.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("resolve");

        assert_eq!(
            config.rules["alpha"].severity,
            crate::problem::Severity::Warn
        );
        // beta lives above the root fragment, so it never applies
        assert!(!config.rules.contains_key("beta"));
    }

    #[test]
    fn resolving_one_directory_twice_reuses_the_same_arc() {
        let tree = tempfile::tempdir().expect("tempdir");
        write_config(tree.path(), ".siftrc.json", json!({ "rules": { "alpha": 2 } }));

        let resolver = ConfigResolver::new(options_for(tree.path())).expect("resolver");
        let mut reg = registry();
        let loader = StaticPluginLoader::new();
        let first = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &loader)
            .expect("first");
        let second = resolver
            .resolve(&tree.path().join("b.txt"), &mut reg, &loader)
            .expect("second");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_configuration_names_directory_and_candidates() {
        let tree = tempfile::tempdir().expect("tempdir");
        let resolver = ConfigResolver::new(options_for(tree.path())).expect("resolver");
        let mut reg = registry();
        let err = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect_err("nothing configured");
        match err {
            ResolveError::Config(ConfigError::NoConfigFound {
                directory,
                files_examined,
            }) => {
                assert_eq!(directory, tree.path());
                assert_eq!(files_examined, vec![".siftrc.json", "sift.config.json"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn base_rules_alone_are_enough_configuration() {
        let tree = tempfile::tempdir().expect("tempdir");
        let mut options = options_for(tree.path());
        options.base.rules.insert("alpha".to_string(), json!(2));

        let resolver = ConfigResolver::new(options).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("base supplies the configuration");
        assert_eq!(
            config.rules["alpha"].severity,
            crate::problem::Severity::Error
        );
    }

    #[test]
    fn base_fragment_is_validated_like_any_other_layer() {
        let tree = tempfile::tempdir().expect("tempdir");
        let mut options = options_for(tree.path());
        options.base.env.insert("lab".to_string(), true);

        let resolver = ConfigResolver::new(options).expect("resolver");
        let mut reg = registry();
        let err = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect_err("unknown environment in the base layer");
        match err {
            ResolveError::Config(ConfigError::UnknownEnvironment { name, source }) => {
                assert_eq!(name, "lab");
                assert_eq!(source, "base configuration");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn a_supplied_config_file_suppresses_the_personal_fallback() {
        let tree = tempfile::tempdir().expect("tempdir");
        let home = tree.path().join("home");
        let project = tree.path().join("project");
        std::fs::create_dir_all(&home).expect("mkdirs");
        std::fs::create_dir_all(&project).expect("mkdirs");
        write_config(&home, ".siftrc.json", json!({ "rules": { "alpha": 2 } }));

        let mut options = options_for(&project);
        options.home_dir = Some(home);
        options.config_source = Some(ConfigSource::Inline(
            serde_json::from_value(json!({ "rules": { "beta": 1 } })).expect("fragment"),
        ));
        let resolver = ConfigResolver::new(options).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&project.join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("resolve");
        assert!(!config.rules.contains_key("alpha"));
        assert!(config.rules.contains_key("beta"));
    }

    #[test]
    fn command_line_rules_outrank_discovered_fragments() {
        let tree = tempfile::tempdir().expect("tempdir");
        write_config(tree.path(), ".siftrc.json", json!({ "rules": { "alpha": 2 } }));

        let mut options = options_for(tree.path());
        options.cli_rules.insert("alpha".to_string(), json!("off"));
        let resolver = ConfigResolver::new(options).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("resolve");
        assert_eq!(config.rules["alpha"].severity, crate::problem::Severity::Off);
    }

    #[test]
    fn environments_contribute_globals_below_explicit_ones() {
        let tree = tempfile::tempdir().expect("tempdir");
        write_config(
            tree.path(),
            ".siftrc.json",
            json!({ "env": { "ci": true }, "globals": { "job": "release" } }),
        );

        let resolver = ConfigResolver::new(options_for(tree.path())).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("resolve");
        assert_eq!(config.env, vec!["ci"]);
        assert_eq!(config.globals["ci"], json!(true));
        assert_eq!(config.globals["job"], json!("release"));
    }

    #[test]
    fn home_fragment_is_only_a_fallback() {
        let tree = tempfile::tempdir().expect("tempdir");
        let home = tree.path().join("home");
        let project = home.join("work").join("project");
        std::fs::create_dir_all(&project).expect("mkdirs");

        write_config(&home, ".siftrc.json", json!({ "rules": { "alpha": 2 } }));
        write_config(&project, ".siftrc.json", json!({ "rules": { "beta": 1 } }));

        let mut options = options_for(&project);
        options.home_dir = Some(home.clone());
        let resolver = ConfigResolver::new(options).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&project.join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("resolve");
        // the walk passes through home but must not pick its fragment up
        assert!(!config.rules.contains_key("alpha"));
        assert!(config.rules.contains_key("beta"));

        // with no project fragment anywhere, home is consulted
        let bare = tree.path().join("home").join("scratch");
        std::fs::create_dir_all(&bare).expect("mkdirs");
        let mut options = options_for(&bare);
        options.home_dir = Some(home);
        let resolver = ConfigResolver::new(options).expect("resolver");
        let config = resolver
            .resolve(&bare.join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("fallback resolve");
        assert!(config.rules.contains_key("alpha"));
    }

    #[test]
    fn configured_plugins_load_and_missing_ones_fail() {
        let tree = tempfile::tempdir().expect("tempdir");
        write_config(tree.path(), ".siftrc.json", json!({ "plugins": ["extra"] }));

        let mut plugin = Plugin::default();
        plugin.rules.insert("gamma".to_string(), noop_rule());
        let loader = StaticPluginLoader::new().with("sift-plugin-extra", plugin);

        let resolver = ConfigResolver::new(options_for(tree.path())).expect("resolver");
        let mut reg = registry();
        resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &loader)
            .expect("resolve");
        assert!(reg.rule("extra/gamma").is_some());

        let mut fresh = registry();
        let resolver = ConfigResolver::new(options_for(tree.path())).expect("resolver");
        let err = resolver
            .resolve(&tree.path().join("a.txt"), &mut fresh, &StaticPluginLoader::new())
            .expect_err("plugin package is absent");
        match err {
            ResolveError::Plugin(crate::registry::PluginError::Missing { long_name, .. }) => {
                assert_eq!(long_name, "sift-plugin-extra");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn inline_config_source_is_used_without_rc_files() {
        let tree = tempfile::tempdir().expect("tempdir");
        let mut options = options_for(tree.path());
        options.use_rc_files = false;
        options.config_source = Some(ConfigSource::Inline(
            serde_json::from_value(json!({ "rules": { "alpha": 2 } })).expect("fragment"),
        ));
        let resolver = ConfigResolver::new(options).expect("resolver");
        let mut reg = registry();
        let config = resolver
            .resolve(&tree.path().join("a.txt"), &mut reg, &StaticPluginLoader::new())
            .expect("resolve");
        assert_eq!(
            config.rules["alpha"].severity,
            crate::problem::Severity::Error
        );
    }
}
