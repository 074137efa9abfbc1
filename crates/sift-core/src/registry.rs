use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt;

use anyhow::{anyhow, Result};

use crate::rule::{EnvironmentDescriptor, Plugin, RuleDescriptor};

/// Package-name prefix shared by all plugin packages.
pub const PLUGIN_NAME_PREFIX: &str = "sift-plugin-";

fn split_scope(name: &str) -> (&str, &str) {
    if name.starts_with('@') {
        if let Some(slash) = name.find('/') {
            return (&name[..slash + 1], &name[slash + 1..]);
        }
    }
    ("", name)
}

/// The full package name: scope preserved, prefix added when absent.
pub fn long_plugin_name(name: &str) -> String {
    let (scope, rest) = split_scope(name);
    if rest.starts_with(PLUGIN_NAME_PREFIX) {
        format!("{scope}{rest}")
    } else {
        format!("{scope}{PLUGIN_NAME_PREFIX}{rest}")
    }
}

/// The short name used to namespace the plugin's rules and environments.
pub fn short_plugin_name(name: &str) -> String {
    let (scope, rest) = split_scope(name);
    let rest = rest.strip_prefix(PLUGIN_NAME_PREFIX).unwrap_or(rest);
    format!("{scope}{rest}")
}

#[derive(Debug)]
pub enum PluginError {
    WhitespaceInName { name: String },
    Missing {
        name: String,
        long_name: String,
        detail: String,
    },
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::WhitespaceInName { name } => {
                write!(f, "whitespace found in plugin name '{name}'")
            }
            PluginError::Missing {
                name,
                long_name,
                detail,
            } => write!(
                f,
                "failed to load plugin '{name}' (package '{long_name}'): {detail}"
            ),
        }
    }
}

impl Error for PluginError {}

/// Injected plugin loading capability. Receives the long-form package name;
/// a miss surfaces as `PluginError::Missing` with the error text as detail.
pub trait PluginLoader {
    fn load(&self, long_name: &str) -> Result<Plugin>;
}

/// In-memory loader backed by a fixed set of packages. The CLI registers
/// statically linked plugins through this; tests build theirs the same way.
#[derive(Default)]
pub struct StaticPluginLoader {
    packages: BTreeMap<String, Plugin>,
}

impl StaticPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, long_name: impl Into<String>, plugin: Plugin) -> Self {
        self.packages.insert(long_name.into(), plugin);
        self
    }
}

impl PluginLoader for StaticPluginLoader {
    fn load(&self, long_name: &str) -> Result<Plugin> {
        self.packages
            .get(long_name)
            .cloned()
            .ok_or_else(|| anyhow!("cannot find package '{long_name}'"))
    }
}

/// Holds every rule, environment, and plugin known to one engine instance.
/// Nothing here is process-global; each engine owns its own registry.
pub struct Registry {
    rules: BTreeMap<String, RuleDescriptor>,
    environments: BTreeMap<String, EnvironmentDescriptor>,
    loaded_plugins: BTreeSet<String>,
    builtin_rules: BTreeMap<String, RuleDescriptor>,
    builtin_environments: BTreeMap<String, EnvironmentDescriptor>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            rules: BTreeMap::new(),
            environments: BTreeMap::new(),
            loaded_plugins: BTreeSet::new(),
            builtin_rules: BTreeMap::new(),
            builtin_environments: BTreeMap::new(),
        }
    }

    /// Registers a built-in rule. Built-ins survive `test_reset`.
    pub fn define_rule(&mut self, id: impl Into<String>, descriptor: RuleDescriptor) {
        let id = id.into();
        self.builtin_rules.insert(id.clone(), descriptor.clone());
        self.rules.insert(id, descriptor);
    }

    pub fn rule(&self, id: &str) -> Option<&RuleDescriptor> {
        self.rules.get(id)
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn define_environment(&mut self, id: impl Into<String>, descriptor: EnvironmentDescriptor) {
        let id = id.into();
        self.builtin_environments.insert(id.clone(), descriptor.clone());
        self.environments.insert(id, descriptor);
    }

    pub fn environment(&self, id: &str) -> Option<&EnvironmentDescriptor> {
        self.environments.get(id)
    }

    pub fn is_plugin_loaded(&self, name: &str) -> bool {
        self.loaded_plugins.contains(&short_plugin_name(name))
    }

    /// Registers a plugin's exports under `shortName/localId`.
    pub fn import_plugin(&mut self, name: &str, plugin: Plugin) {
        let short = short_plugin_name(name);
        for (id, descriptor) in plugin.rules {
            self.rules.insert(format!("{short}/{id}"), descriptor);
        }
        for (id, descriptor) in plugin.environments {
            self.environments.insert(format!("{short}/{id}"), descriptor);
        }
        self.loaded_plugins.insert(short);
    }

    /// Loads a plugin by configured name through the injected loader.
    /// Loading the same plugin twice is a no-op.
    pub fn load_plugin(&mut self, name: &str, loader: &dyn PluginLoader) -> Result<(), PluginError> {
        if name.chars().any(char::is_whitespace) {
            return Err(PluginError::WhitespaceInName {
                name: name.to_string(),
            });
        }
        let short = short_plugin_name(name);
        if self.loaded_plugins.contains(&short) {
            return Ok(());
        }
        let long = long_plugin_name(name);
        match loader.load(&long) {
            Ok(plugin) => {
                self.import_plugin(name, plugin);
                Ok(())
            }
            Err(err) => Err(PluginError::Missing {
                name: short,
                long_name: long,
                detail: err.to_string(),
            }),
        }
    }

    /// Test support: drops everything plugins added and restores built-ins.
    pub fn test_reset(&mut self) {
        self.rules = self.builtin_rules.clone();
        self.environments = self.builtin_environments.clone();
        self.loaded_plugins.clear();
    }
}
