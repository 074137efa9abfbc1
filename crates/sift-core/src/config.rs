use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::problem::Severity;

/// Fragment file names recognized during the discovery walk, in lookup
/// order. The first present in a directory wins.
pub const CONFIG_FILE_NAMES: &[&str] = &[".siftrc.json", "sift.config.json"];

/// One configuration layer, as written by a user. All keys optional;
/// absent keys contribute nothing to the merge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFragment {
    pub root: bool,
    #[serde(deserialize_with = "string_or_list")]
    pub extends: Vec<String>,
    pub parser: Option<String>,
    #[serde(rename = "parserOptions")]
    pub parser_options: BTreeMap<String, Value>,
    pub plugins: Vec<String>,
    pub env: BTreeMap<String, bool>,
    pub globals: BTreeMap<String, Value>,
    pub rules: BTreeMap<String, Value>,
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Where a caller-supplied configuration comes from. Resolved to a fragment
/// exactly once, when the resolver is constructed.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    Inline(ConfigFragment),
    FilePath(PathBuf),
}

impl ConfigSource {
    pub fn describe(&self) -> String {
        match self {
            ConfigSource::Inline(_) => "inline configuration".to_string(),
            ConfigSource::FilePath(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    NoConfigFound {
        directory: PathBuf,
        files_examined: Vec<String>,
    },
    Io {
        path: PathBuf,
        detail: String,
    },
    Parse {
        path: PathBuf,
        detail: String,
    },
    ExtendsCycle {
        path: PathBuf,
    },
    InvalidSeverity {
        rule_id: String,
        value: Value,
        source: String,
    },
    InvalidRuleOptions {
        rule_id: String,
        detail: String,
        source: String,
    },
    UnknownEnvironment {
        name: String,
        source: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NoConfigFound {
                directory,
                files_examined,
            } => write!(
                f,
                "no configuration found for directory '{}' (looked for {})",
                directory.display(),
                files_examined.join(", ")
            ),
            ConfigError::Io { path, detail } => {
                write!(f, "cannot read config file '{}': {detail}", path.display())
            }
            ConfigError::Parse { path, detail } => {
                write!(f, "cannot parse config file '{}': {detail}", path.display())
            }
            ConfigError::ExtendsCycle { path } => {
                write!(f, "extends cycle through '{}'", path.display())
            }
            ConfigError::InvalidSeverity {
                rule_id,
                value,
                source,
            } => write!(
                f,
                "{source}: rule '{rule_id}' has invalid severity {value} \
                 (expected 0, 1, 2, \"off\", \"warn\", or \"error\")"
            ),
            ConfigError::InvalidRuleOptions {
                rule_id,
                detail,
                source,
            } => write!(f, "{source}: rule '{rule_id}' has invalid options: {detail}"),
            ConfigError::UnknownEnvironment { name, source } => {
                write!(f, "{source}: environment '{name}' is not defined")
            }
        }
    }
}

impl Error for ConfigError {}

/// Merges `over` on top of `base`. Map-valued keys merge entry by entry with
/// `over` winning; scalars replace when present; plugin lists union in order.
/// `extends` is consumed at load time and never survives a merge.
pub fn merge(base: &ConfigFragment, over: &ConfigFragment) -> ConfigFragment {
    let mut out = ConfigFragment {
        root: base.root || over.root,
        extends: Vec::new(),
        parser: over.parser.clone().or_else(|| base.parser.clone()),
        parser_options: base.parser_options.clone(),
        plugins: base.plugins.clone(),
        env: base.env.clone(),
        globals: base.globals.clone(),
        rules: base.rules.clone(),
    };
    for (k, v) in &over.parser_options {
        out.parser_options.insert(k.clone(), v.clone());
    }
    for plugin in &over.plugins {
        if !out.plugins.contains(plugin) {
            out.plugins.push(plugin.clone());
        }
    }
    for (k, v) in &over.env {
        out.env.insert(k.clone(), *v);
    }
    for (k, v) in &over.globals {
        out.globals.insert(k.clone(), v.clone());
    }
    for (k, v) in &over.rules {
        out.rules.insert(k.clone(), v.clone());
    }
    out
}

fn read_fragment(path: &Path) -> Result<ConfigFragment, ConfigError> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })
}

/// Loads a fragment file and flattens its `extends` chain: referenced files
/// resolve relative to the referencing fragment and apply depth-first at
/// lower precedence than the fragment itself.
pub fn load_fragment(path: &Path) -> Result<ConfigFragment, ConfigError> {
    let mut visiting = Vec::new();
    load_with_extends(path, &mut visiting)
}

fn load_with_extends(
    path: &Path,
    visiting: &mut Vec<PathBuf>,
) -> Result<ConfigFragment, ConfigError> {
    if visiting.iter().any(|p| p == path) {
        return Err(ConfigError::ExtendsCycle {
            path: path.to_path_buf(),
        });
    }
    visiting.push(path.to_path_buf());

    let own = read_fragment(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut merged = ConfigFragment::default();
    for reference in &own.extends {
        let target = base_dir.join(reference);
        let parent = load_with_extends(&target, visiting)?;
        merged = merge(&merged, &parent);
    }
    let mut out = merge(&merged, &own);
    // root only applies where it was written, not where it was extended from
    out.root = own.root;

    visiting.pop();
    Ok(out)
}

/// A fully enabled rule after validation: severity plus schema-checked
/// positional options.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetting {
    pub severity: Severity,
    pub options: Vec<Value>,
}

/// The final configuration applied to files in one directory. Built once
/// per directory by the resolver and shared behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfiguration {
    pub parser: String,
    #[serde(rename = "parserOptions")]
    pub parser_options: BTreeMap<String, Value>,
    pub plugins: Vec<String>,
    pub env: Vec<String>,
    pub globals: BTreeMap<String, Value>,
    pub rules: BTreeMap<String, RuleSetting>,
}
