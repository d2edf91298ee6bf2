use std::{collections::BTreeMap, path::Path, sync::Arc};

use analyzer_framework_core::{
    provider::{ProviderClient, ProviderKind},
    rules::{FlatDependency, sort_dependencies},
};
use futures::future::join_all;
use tracing::{info, warn};

use crate::{
    errors::OutputError,
    output::{write_json, write_yaml},
};

/// Flattened dependency listing file name.
pub const DEPENDENCIES_YAML: &str = "dependencies.yaml";

/// Optional JSON rendition of the dependency listing.
pub const DEPENDENCIES_JSON: &str = "dependencies.json";

/// Query every provider for its dependency map and flatten the results,
/// sorted by `(provider, fileURI)`. Provider failures degrade to an empty
/// contribution.
pub async fn collect_dependencies(
    providers: &BTreeMap<ProviderKind, Arc<dyn ProviderClient>>,
) -> Vec<FlatDependency> {
    let queries = providers.iter().map(|(kind, client)| async move {
        match client.get_dependencies().await {
            Ok(map) => (*kind, map),
            Err(err) => {
                warn!(provider = %kind, error = %err, "dependency retrieval failed");
                (*kind, BTreeMap::new())
            }
        }
    });

    let mut flat = Vec::new();
    for (kind, map) in join_all(queries).await {
        for (file_uri, dependencies) in map {
            flat.push(FlatDependency {
                provider: kind.name().to_owned(),
                file_uri,
                dependencies,
            });
        }
    }
    sort_dependencies(&mut flat);
    flat
}

/// Write the dependency artifacts into the output directory.
pub fn write_dependencies(
    dependencies: &[FlatDependency],
    output: &Path,
    json_output: bool,
) -> Result<(), OutputError> {
    let yaml_path = output.join(DEPENDENCIES_YAML);
    write_yaml(&dependencies, &yaml_path)?;
    info!(
        path = %yaml_path.display(),
        entries = dependencies.len(),
        "dependency listing written"
    );
    if json_output {
        write_json(&dependencies, &output.join(DEPENDENCIES_JSON))?;
    }
    Ok(())
}
