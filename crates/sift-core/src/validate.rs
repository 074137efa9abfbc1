use std::collections::BTreeMap;

use jsonschema::Draft;
use serde_json::{json, Value};

use crate::config::{ConfigError, RuleSetting};
use crate::problem::Severity;
use crate::registry::Registry;

/// Splits a configured rule entry into severity and positional options.
/// Accepts a bare severity or `[severity, option...]`.
pub fn normalize_rule_entry(value: &Value) -> Option<RuleSetting> {
    match value {
        Value::Array(items) => {
            let (head, tail) = items.split_first()?;
            let severity = Severity::from_config_value(head)?;
            Some(RuleSetting {
                severity,
                options: tail.to_vec(),
            })
        }
        other => Some(RuleSetting {
            severity: Severity::from_config_value(other)?,
            options: Vec::new(),
        }),
    }
}

/// Wraps a rule's positional option schemas into one array schema so the
/// whole option list validates in a single pass.
fn tuple_schema(positional: &[Value]) -> Value {
    json!({
        "type": "array",
        "prefixItems": positional,
        "items": false,
        "maxItems": positional.len(),
    })
}

fn validate_options(
    rule_id: &str,
    positional: &[Value],
    options: &[Value],
    source: &str,
) -> Result<(), ConfigError> {
    // rules that declare no schema accept any options
    if positional.is_empty() {
        return Ok(());
    }
    let schema = tuple_schema(positional);
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| ConfigError::InvalidRuleOptions {
            rule_id: rule_id.to_string(),
            detail: format!("rule declares an unusable schema: {err}"),
            source: source.to_string(),
        })?;

    let doc = Value::Array(options.to_vec());
    let detail: Vec<String> = validator
        .iter_errors(&doc)
        .map(|err| format!("{} (at {})", err, err.instance_path()))
        .collect();
    if detail.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::InvalidRuleOptions {
            rule_id: rule_id.to_string(),
            detail: detail.join("; "),
            source: source.to_string(),
        })
    }
}

/// Normalizes and validates every configured rule entry. Unknown rule ids
/// pass through unvalidated; the driver reports them when the file is
/// actually analyzed.
pub fn check_rules(
    rules: &BTreeMap<String, Value>,
    registry: &Registry,
    source: &str,
) -> Result<BTreeMap<String, RuleSetting>, ConfigError> {
    let mut out = BTreeMap::new();
    for (rule_id, entry) in rules {
        let setting =
            normalize_rule_entry(entry).ok_or_else(|| ConfigError::InvalidSeverity {
                rule_id: rule_id.clone(),
                value: entry.clone(),
                source: source.to_string(),
            })?;
        if let Some(descriptor) = registry.rule(rule_id) {
            validate_options(rule_id, &descriptor.schema, &setting.options, source)?;
        }
        out.insert(rule_id.clone(), setting);
    }
    Ok(out)
}

/// Every referenced environment must exist, enabled or not.
pub fn check_environments(
    env: &BTreeMap<String, bool>,
    registry: &Registry,
    source: &str,
) -> Result<(), ConfigError> {
    for name in env.keys() {
        if registry.environment(name).is_none() {
            return Err(ConfigError::UnknownEnvironment {
                name: name.clone(),
                source: source.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::problem::Problem;
    use crate::rule::{RuleContext, RuleDescriptor};

    fn registry_with_rule(schema: Vec<Value>) -> Registry {
        let mut registry = Registry::new();
        registry.define_rule(
            "sample",
            RuleDescriptor::new(|_: &RuleContext<'_>| Vec::<Problem>::new()).with_schema(schema),
        );
        registry
    }

    fn rules_map(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).expect("rules map")
    }

    #[test]
    fn bare_severity_and_array_forms_normalize() {
        let bare = normalize_rule_entry(&json!(2)).expect("bare severity");
        assert_eq!(bare.severity, Severity::Error);
        assert!(bare.options.is_empty());

        let with_options =
            normalize_rule_entry(&json!(["warn", { "max": 3 }])).expect("array form");
        assert_eq!(with_options.severity, Severity::Warn);
        assert_eq!(with_options.options, vec![json!({ "max": 3 })]);

        assert!(normalize_rule_entry(&json!("sometimes")).is_none());
        assert!(normalize_rule_entry(&json!([])).is_none());
    }

    #[test]
    fn schema_less_rules_validate_under_any_configuration() {
        let registry = registry_with_rule(Vec::new());
        let rules = rules_map(json!({ "sample": 2 }));
        let settings = check_rules(&rules, &registry, "test config").expect("bare severity");
        assert_eq!(settings["sample"].severity, Severity::Error);

        let rules = rules_map(json!({ "sample": [1, "anything", { "at": "all" }] }));
        let settings = check_rules(&rules, &registry, "test config").expect("free-form options");
        assert_eq!(settings["sample"].options.len(), 2);
    }

    #[test]
    fn options_matching_the_schema_pass() {
        let registry = registry_with_rule(vec![json!({
            "type": "object",
            "properties": { "max": { "type": "integer" } },
            "additionalProperties": false
        })]);
        let rules = rules_map(json!({ "sample": [2, { "max": 10 }] }));
        let settings = check_rules(&rules, &registry, "test config").expect("valid options");
        assert_eq!(settings["sample"].severity, Severity::Error);
    }

    #[test]
    fn options_violating_the_schema_are_rejected() {
        let registry = registry_with_rule(vec![json!({ "enum": ["unix", "windows"] })]);
        let rules = rules_map(json!({ "sample": [2, "mac"] }));
        let err = check_rules(&rules, &registry, "test config").expect_err("bad option");
        match err {
            ConfigError::InvalidRuleOptions { rule_id, source, .. } => {
                assert_eq!(rule_id, "sample");
                assert_eq!(source, "test config");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn extra_options_beyond_the_schema_are_rejected() {
        let registry = registry_with_rule(vec![json!({ "type": "string" })]);
        let rules = rules_map(json!({ "sample": [1, "a", "b"] }));
        assert!(check_rules(&rules, &registry, "test config").is_err());
    }

    #[test]
    fn invalid_severity_is_a_distinct_error() {
        let registry = registry_with_rule(Vec::new());
        let rules = rules_map(json!({ "sample": "shrug" }));
        let err = check_rules(&rules, &registry, "test config").expect_err("bad severity");
        match err {
            ConfigError::InvalidSeverity { rule_id, .. } => assert_eq!(rule_id, "sample"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_rules_pass_through_for_the_driver() {
        let registry = registry_with_rule(Vec::new());
        let rules = rules_map(json!({ "nonexistent": [2, "anything", "goes"] }));
        let settings = check_rules(&rules, &registry, "test config").expect("deferred");
        assert!(settings.contains_key("nonexistent"));
    }

    #[test]
    fn unknown_environment_names_the_source() {
        let registry = Registry::new();
        let env: BTreeMap<String, bool> =
            serde_json::from_value(json!({ "lab": true })).expect("env map");
        let err = check_environments(&env, &registry, ".siftrc.json").expect_err("unknown env");
        match err {
            ConfigError::UnknownEnvironment { name, source } => {
                assert_eq!(name, "lab");
                assert_eq!(source, ".siftrc.json");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
