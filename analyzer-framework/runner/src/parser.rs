use std::{fs, path::Path};

use analyzer_framework_core::{
    engine::{LoadedRules, ParseError, RuleParser},
    provider::{ConditionByCapability, ProviderKind},
    rules::{Rule, RuleSet},
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Metadata file naming a ruleset directory.
const RULESET_METADATA: &str = "ruleset.yaml";

#[derive(Debug, Default, Deserialize)]
struct RulesetMetadata {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

/// Loads ruleset YAML from disk.
///
/// A path may be a single rules file, a ruleset directory carrying a
/// `ruleset.yaml`, or a directory of such directories (the extracted default
/// rulesets cache).
#[derive(Clone, Copy, Debug, Default)]
pub struct YamlRuleParser;

impl RuleParser for YamlRuleParser {
    fn load(&self, path: &Path) -> Result<LoadedRules, ParseError> {
        let mut loaded = LoadedRules::default();
        if path.is_dir() {
            if path.join(RULESET_METADATA).is_file() {
                load_ruleset_dir(path, &mut loaded)?;
            } else {
                load_collection_dir(path, &mut loaded)?;
            }
        } else {
            load_rules_file(path, &mut loaded)?;
        }

        if loaded.rule_sets.iter().all(|set| set.rules.is_empty()) {
            return Err(ParseError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(loaded)
    }
}

fn load_collection_dir(path: &Path, loaded: &mut LoadedRules) -> Result<(), ParseError> {
    let entries = fs::read_dir(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let child = entry.path();
        if child.is_dir() && child.join(RULESET_METADATA).is_file() {
            load_ruleset_dir(&child, loaded)?;
        }
    }
    Ok(())
}

fn load_ruleset_dir(dir: &Path, loaded: &mut LoadedRules) -> Result<(), ParseError> {
    let metadata_path = dir.join(RULESET_METADATA);
    let raw = fs::read_to_string(&metadata_path).map_err(|source| ParseError::Io {
        path: metadata_path.clone(),
        source,
    })?;
    let metadata: RulesetMetadata =
        serde_yaml::from_str(&raw).map_err(|source| ParseError::Malformed {
            path: metadata_path,
            source,
        })?;

    let mut rule_set = RuleSet {
        name: metadata.name,
        description: metadata.description,
        labels: metadata.labels,
        ..RuleSet::default()
    };

    let mut rule_files: Vec<_> = fs::read_dir(dir)
        .map_err(|source| ParseError::Io {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
                && path.file_name().is_some_and(|name| name != RULESET_METADATA)
        })
        .collect();
    rule_files.sort();

    for file in rule_files {
        let rules = parse_rules(&file)?;
        for rule in &rules {
            scan_condition(&rule.when, loaded);
        }
        rule_set.rules.extend(rules);
    }

    debug!(ruleset = %rule_set.name, rules = rule_set.rules.len(), "loaded ruleset");
    loaded.rule_sets.push(rule_set);
    Ok(())
}

fn load_rules_file(path: &Path, loaded: &mut LoadedRules) -> Result<(), ParseError> {
    let rules = parse_rules(path)?;
    for rule in &rules {
        scan_condition(&rule.when, loaded);
    }
    let name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    loaded.rule_sets.push(RuleSet {
        name,
        rules,
        ..RuleSet::default()
    });
    Ok(())
}

fn parse_rules(path: &Path) -> Result<Vec<Rule>, ParseError> {
    let raw = fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ParseError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Record which providers and capabilities a condition tree references.
/// `and`/`or` composites recurse; other keys of the form
/// `<provider>.<capability>` are leaves.
fn scan_condition(condition: &Value, loaded: &mut LoadedRules) {
    let Some(map) = condition.as_object() else {
        return;
    };
    for (key, child) in map {
        if key == "and" || key == "or" {
            if let Some(children) = child.as_array() {
                for nested in children {
                    scan_condition(nested, loaded);
                }
            }
            continue;
        }
        let Some((provider, capability)) = key.split_once('.') else {
            continue;
        };
        let Ok(kind) = provider.parse::<ProviderKind>() else {
            continue;
        };
        loaded.required_providers.insert(kind);
        loaded
            .provider_conditions
            .entry(kind)
            .or_default()
            .push(ConditionByCapability {
                capability: capability.to_owned(),
                condition: child.clone(),
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
- ruleID: ds-oracle-00001
  description: Oracle JDBC driver in use
  category: mandatory
  effort: 3
  when:
    java.referenced:
      pattern: oracle.jdbc.*
- ruleID: ds-config-00002
  when:
    or:
      - builtin.filecontent:
          pattern: "jdbc:oracle"
      - java.dependency:
          name: com.oracle.database.jdbc
"#;

    fn write_ruleset(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(
            dir.join("ruleset.yaml"),
            format!("name: {name}\ndescription: test rules\n"),
        )
        .unwrap();
        fs::write(dir.join("rules.yaml"), RULES).unwrap();
    }

    #[test]
    fn ruleset_dir_collects_providers_and_conditions() {
        let dir = tempfile::tempdir().unwrap();
        write_ruleset(dir.path(), "oracle-to-postgres");

        let loaded = YamlRuleParser.load(dir.path()).unwrap();
        assert_eq!(loaded.rule_sets.len(), 1);
        assert_eq!(loaded.rule_sets[0].name, "oracle-to-postgres");
        assert_eq!(loaded.rule_sets[0].rules.len(), 2);

        assert!(loaded.required_providers.contains(&ProviderKind::Java));
        assert!(loaded.required_providers.contains(&ProviderKind::Builtin));

        let java = &loaded.provider_conditions[&ProviderKind::Java];
        let capabilities: Vec<_> = java.iter().map(|c| c.capability.as_str()).collect();
        assert_eq!(capabilities, ["referenced", "dependency"]);
    }

    #[test]
    fn collection_dir_loads_every_nested_ruleset() {
        let dir = tempfile::tempdir().unwrap();
        write_ruleset(&dir.path().join("alpha"), "alpha");
        write_ruleset(&dir.path().join("beta"), "beta");
        fs::write(dir.path().join("stray.txt"), "ignore me").unwrap();

        let loaded = YamlRuleParser.load(dir.path()).unwrap();
        assert_eq!(loaded.rule_sets.len(), 2);
    }

    #[test]
    fn bare_rules_file_is_named_after_its_stem() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom-rules.yaml");
        fs::write(&file, RULES).unwrap();

        let loaded = YamlRuleParser.load(&file).unwrap();
        assert_eq!(loaded.rule_sets[0].name, "custom-rules");
    }

    #[test]
    fn empty_ruleset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ruleset.yaml"), "name: empty\n").unwrap();

        let err = YamlRuleParser.load(dir.path()).unwrap_err();
        assert!(matches!(err, ParseError::Empty { .. }));
    }

    #[test]
    fn malformed_rules_surface_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("broken.yaml");
        fs::write(&file, "ruleID: [unbalanced").unwrap();

        let err = YamlRuleParser.load(&file).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { .. }));
    }
}
