use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single rule: identifier, match condition, and the violation template.
///
/// The condition payload is opaque to the orchestrator; providers evaluate it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(rename = "ruleID")]
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub when: Value,
}

/// A named, versioned bundle of rules plus the results of evaluating them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing)]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub violations: BTreeMap<String, Violation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched: Vec<String>,
}

/// A rule that matched, with every incident the providers reported.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<u32>,
    #[serde(default)]
    pub incidents: Vec<Incident>,
}

/// One place a rule matched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_snip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
}

/// One dependency reported by a provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default)]
    pub indirect: bool,
}

/// Dependency list flattened per provider and file, as written to
/// `dependencies.yaml`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatDependency {
    pub provider: String,
    #[serde(rename = "fileURI")]
    pub file_uri: String,
    pub dependencies: Vec<Dependency>,
}

/// Order rulesets by name so output is deterministic across runs.
pub fn sort_rule_sets(rule_sets: &mut [RuleSet]) {
    rule_sets.sort_by(|a, b| a.name.cmp(&b.name));
}

/// Order flattened dependencies by `(provider, fileURI)`.
pub fn sort_dependencies(deps: &mut [FlatDependency]) {
    deps.sort_by(|a, b| {
        a.provider
            .cmp(&b.provider)
            .then_with(|| a.file_uri.cmp(&b.file_uri))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> RuleSet {
        RuleSet {
            name: name.to_owned(),
            ..RuleSet::default()
        }
    }

    #[test]
    fn rule_sets_sort_by_name() {
        let mut sets = vec![named("zeta"), named("alpha"), named("mid")];
        sort_rule_sets(&mut sets);
        let names: Vec<_> = sets.iter().map(|set| set.name.as_str()).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn dependencies_sort_by_provider_then_uri() {
        let mut deps = vec![
            FlatDependency {
                provider: "java".into(),
                file_uri: "file:///b/pom.xml".into(),
                dependencies: vec![],
            },
            FlatDependency {
                provider: "go".into(),
                file_uri: "file:///z/go.mod".into(),
                dependencies: vec![],
            },
            FlatDependency {
                provider: "java".into(),
                file_uri: "file:///a/pom.xml".into(),
                dependencies: vec![],
            },
        ];
        sort_dependencies(&mut deps);
        let order: Vec<_> = deps
            .iter()
            .map(|dep| (dep.provider.as_str(), dep.file_uri.as_str()))
            .collect();
        assert_eq!(
            order,
            [
                ("go", "file:///z/go.mod"),
                ("java", "file:///a/pom.xml"),
                ("java", "file:///b/pom.xml"),
            ]
        );
    }

    #[test]
    fn rules_are_not_serialized_into_output() {
        let mut set = named("example");
        set.rules.push(Rule {
            rule_id: "rule-000".into(),
            ..Rule::default()
        });
        let yaml = serde_yaml::to_string(&set).unwrap();
        assert!(!yaml.contains("rule-000"));
    }
}
