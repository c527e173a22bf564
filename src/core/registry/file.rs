use super::{MappingRegistry, MappingSource, Stage, StageMapping};
use crate::core::error::PipelineError;
use crate::core::tables::TableCatalog;
use serde::Deserialize;
use std::path::Path;

/// Registry file layout. Table references are `"<tier>.<table>"` strings.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryDocument {
    #[serde(default)]
    stages: Vec<StageEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageEntry {
    name: String,
    endpoint: Option<String>,
    description: Option<String>,
    #[serde(default)]
    mappings: Vec<MappingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MappingEntry {
    name: Option<String>,
    source: SourceEntry,
    destination: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourceEntry {
    Single(String),
    Many(Vec<String>),
}

/// Load a registry from a TOML file, resolving table references through the catalog.
pub fn load_registry_file(path: &Path, catalog: &TableCatalog) -> Result<MappingRegistry, PipelineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!(
            "failed to read registry file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_registry(&content, catalog).map_err(|e| match e {
        PipelineError::Configuration(message) => {
            PipelineError::config(format!("{}: {}", path.display(), message))
        }
        other => other,
    })
}

pub fn parse_registry(content: &str, catalog: &TableCatalog) -> Result<MappingRegistry, PipelineError> {
    let document: RegistryDocument = toml::from_str(content)
        .map_err(|e| PipelineError::config(format!("failed to parse registry: {}", e)))?;

    let mut stages = Vec::with_capacity(document.stages.len());
    for entry in document.stages {
        let endpoint = entry.endpoint.unwrap_or_else(|| entry.name.clone());
        let mut stage = Stage::new(entry.name, endpoint);
        stage.description = entry.description;
        for mapping in entry.mappings {
            let source = match mapping.source {
                SourceEntry::Single(reference) => {
                    MappingSource::Single(catalog.resolve_reference(&reference)?)
                }
                SourceEntry::Many(references) => MappingSource::Many(
                    references
                        .iter()
                        .map(|reference| catalog.resolve_reference(reference))
                        .collect::<Result<_, _>>()?,
                ),
            };
            let destination = catalog.resolve_reference(&mapping.destination)?;
            stage.mappings.push(StageMapping {
                name: mapping.name,
                source,
                destination,
            });
        }
        stages.push(stage);
    }
    Ok(MappingRegistry::new(stages))
}
