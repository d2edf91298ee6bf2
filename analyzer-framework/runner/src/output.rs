use std::{fs, path::Path};

use analyzer_framework_core::rules::RuleSet;
use serde::Serialize;
use tracing::info;

use crate::errors::OutputError;

/// Analysis results file name.
pub const OUTPUT_YAML: &str = "output.yaml";

/// Optional JSON rendition of the analysis results.
pub const OUTPUT_JSON: &str = "output.json";

pub fn write_yaml<T: Serialize>(value: &T, path: &Path) -> Result<(), OutputError> {
    let rendered = serde_yaml::to_string(value).map_err(|source| OutputError::Yaml {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, rendered).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), OutputError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|source| OutputError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    fs::write(path, rendered).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize the final rulesets. The caller sorts them by name first, so
/// repeated runs produce byte-identical files.
pub fn write_results(
    rule_sets: &[RuleSet],
    output: &Path,
    json_output: bool,
) -> Result<(), OutputError> {
    let yaml_path = output.join(OUTPUT_YAML);
    write_yaml(&rule_sets, &yaml_path)?;
    info!(path = %yaml_path.display(), "analysis results written");
    if json_output {
        write_json(&rule_sets, &output.join(OUTPUT_JSON))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use analyzer_framework_core::rules::sort_rule_sets;

    use super::*;

    fn named(name: &str) -> RuleSet {
        RuleSet {
            name: name.to_owned(),
            ..RuleSet::default()
        }
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut sets = vec![named("zeta"), named("alpha")];
        sort_rule_sets(&mut sets);

        write_results(&sets, dir.path(), false).unwrap();
        let first = fs::read(dir.path().join(OUTPUT_YAML)).unwrap();
        write_results(&sets, dir.path(), false).unwrap();
        let second = fs::read(dir.path().join(OUTPUT_YAML)).unwrap();
        assert_eq!(first, second);

        let rendered = String::from_utf8(first).unwrap();
        assert!(rendered.find("alpha").unwrap() < rendered.find("zeta").unwrap());
    }

    #[test]
    fn json_output_is_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        write_results(&[named("only")], dir.path(), false).unwrap();
        assert!(!dir.path().join(OUTPUT_JSON).exists());

        write_results(&[named("only")], dir.path(), true).unwrap();
        assert!(dir.path().join(OUTPUT_JSON).exists());
    }
}
