use std::{
    collections::{BTreeMap, BTreeSet},
    io,
    path::Path,
};

use analyzer_framework_core::{
    constants::{BINARY_INPUT_EXTENSIONS, DEFAULT_EXCLUDED_DIRS},
    provider::ProviderKind,
};
use tracing::debug;
use walkdir::WalkDir;

/// Map a display-language name to the provider that serves it.
fn provider_for_language(language: &str) -> Option<ProviderKind> {
    match language {
        "Java" => Some(ProviderKind::Java),
        "Go" => Some(ProviderKind::Go),
        "Python" => Some(ProviderKind::Python),
        "JavaScript" | "TypeScript" => Some(ProviderKind::NodeJs),
        "C#" => Some(ProviderKind::CSharp),
        _ => None,
    }
}

fn language_for_extension(extension: &str) -> Option<&'static str> {
    match extension {
        "java" | "jar" | "war" | "ear" | "class" => Some("Java"),
        "go" => Some("Go"),
        "py" => Some("Python"),
        "js" | "jsx" | "mjs" => Some("JavaScript"),
        "ts" | "tsx" => Some("TypeScript"),
        "cs" | "csproj" => Some("C#"),
        "xml" => Some("XML"),
        "properties" => Some("Properties"),
        "yaml" | "yml" => Some("YAML"),
        "json" => Some("JSON"),
        _ => None,
    }
}

/// Count recognized source files per language under the input.
///
/// An archive input counts as a single Java artifact; the default exclusion
/// directories are skipped.
pub fn language_census(input: &Path) -> io::Result<BTreeMap<String, usize>> {
    let mut census = BTreeMap::new();

    if input.is_file() {
        let extension = input
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if BINARY_INPUT_EXTENSIONS.contains(&extension.as_str()) {
            census.insert("Java".to_owned(), 1);
        }
        return Ok(census);
    }

    if !input.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("input path {} does not exist", input.display()),
        ));
    }

    let walker = WalkDir::new(input).into_iter().filter_entry(|entry| {
        let name = entry.file_name().to_string_lossy();
        !(entry.file_type().is_dir() && DEFAULT_EXCLUDED_DIRS.contains(&name.as_ref()))
    });

    for entry in walker {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(extension) = entry.path().extension().and_then(|ext| ext.to_str()) else {
            continue;
        };
        if let Some(language) = language_for_extension(&extension.to_ascii_lowercase()) {
            *census.entry(language.to_owned()).or_insert(0) += 1;
        }
    }

    Ok(census)
}

/// Determine which providers the input needs, one provider per language
/// family.
pub fn detect_providers(input: &Path) -> io::Result<BTreeSet<ProviderKind>> {
    let census = language_census(input)?;
    let providers: BTreeSet<ProviderKind> = census
        .keys()
        .filter_map(|language| provider_for_language(language))
        .collect();
    debug!(?providers, "detected providers from language census");
    Ok(providers)
}
