//! Declarative stage mappings: which source tables feed which destination tables.

pub mod file;
pub mod variants;

use crate::core::error::PipelineError;
use crate::core::tables::{DatasetTier, TableCatalog, TableIdentifier};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

pub use file::{load_registry_file, parse_registry};
pub use variants::{loop_variables_registry, standard_registry};

/// One table or an ordered list of tables feeding a single mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MappingSource {
    Single(TableIdentifier),
    Many(Vec<TableIdentifier>),
}

impl MappingSource {
    pub fn tables(&self) -> &[TableIdentifier] {
        match self {
            MappingSource::Single(table) => std::slice::from_ref(table),
            MappingSource::Many(tables) => tables,
        }
    }
}

impl From<TableIdentifier> for MappingSource {
    fn from(table: TableIdentifier) -> Self {
        MappingSource::Single(table)
    }
}

impl From<Vec<TableIdentifier>> for MappingSource {
    fn from(tables: Vec<TableIdentifier>) -> Self {
        MappingSource::Many(tables)
    }
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingSource::Single(table) => write!(f, "{}", table),
            MappingSource::Many(tables) => {
                let joined: Vec<&str> = tables.iter().map(|t| t.as_str()).collect();
                write!(f, "[{}]", joined.join(", "))
            }
        }
    }
}

/// One unit of work. Serializes to exactly the JSON body sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageMapping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub source: MappingSource,
    pub destination: TableIdentifier,
}

impl StageMapping {
    pub fn new(source: impl Into<MappingSource>, destination: TableIdentifier) -> Self {
        Self {
            name: None,
            source: source.into(),
            destination,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Short label used in logs: the name when present, else the destination.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.destination.as_str())
    }
}

/// A named transformation step and the endpoint that performs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub name: String,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub mappings: Vec<StageMapping>,
}

impl Stage {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            description: None,
            mappings: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mapping(mut self, mapping: StageMapping) -> Self {
        self.mappings.push(mapping);
        self
    }
}

/// Which built-in registry to use when no registry file is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryVariant {
    /// clean_columns, clean_rows, merge_table_versions
    #[default]
    Standard,
    /// single fix_loop_variables stage
    LoopVariables,
}

impl fmt::Display for RegistryVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryVariant::Standard => write!(f, "standard"),
            RegistryVariant::LoopVariables => write!(f, "loop_variables"),
        }
    }
}

impl FromStr for RegistryVariant {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(RegistryVariant::Standard),
            "loop_variables" => Ok(RegistryVariant::LoopVariables),
            other => Err(PipelineError::config(format!(
                "unknown registry variant '{}'; supported values are standard, loop_variables",
                other
            ))),
        }
    }
}

/// Ordered stages for one pipeline. Stage order is execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingRegistry {
    pub stages: Vec<Stage>,
}

impl MappingRegistry {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// Build one of the built-in registries against the given catalog.
    pub fn builtin(variant: RegistryVariant, catalog: &TableCatalog) -> Result<Self, PipelineError> {
        match variant {
            RegistryVariant::Standard => standard_registry(catalog),
            RegistryVariant::LoopVariables => loop_variables_registry(catalog),
        }
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    pub fn mapping_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.mappings.len()).sum()
    }

    /// Stages starting at the named one, for resuming a partially completed run.
    pub fn starting_from(&self, name: &str) -> Result<&[Stage], PipelineError> {
        let index = self
            .stages
            .iter()
            .position(|stage| stage.name == name)
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "unknown stage '{}'; registry stages are {}",
                    name,
                    self.stage_names().join(", ")
                ))
            })?;
        Ok(&self.stages[index..])
    }

    /// Check internal consistency, including the stage-to-stage hand-off.
    ///
    /// Every source of a stage after the first must be a source-tier table or the
    /// destination of an earlier stage. Destinations are unique and never land in
    /// the source tier.
    pub fn validate(&self, catalog: &TableCatalog) -> Result<(), PipelineError> {
        if self.stages.is_empty() {
            return Err(PipelineError::config("registry defines no stages"));
        }

        let mut stage_names = HashSet::new();
        let mut produced: HashMap<&TableIdentifier, &str> = HashMap::new();
        let mut problems = Vec::new();

        for stage in &self.stages {
            if stage.name.trim().is_empty() {
                problems.push("stage with empty name".to_string());
            } else if !stage_names.insert(stage.name.as_str()) {
                problems.push(format!("duplicate stage '{}'", stage.name));
            }
            if stage.endpoint.trim().is_empty() {
                problems.push(format!("stage '{}' has no endpoint", stage.name));
            }
            if stage.mappings.is_empty() {
                problems.push(format!("stage '{}' has no mappings", stage.name));
            }

            for mapping in &stage.mappings {
                if mapping.source.tables().is_empty() {
                    problems.push(format!(
                        "stage '{}' mapping '{}' has no source tables",
                        stage.name,
                        mapping.label()
                    ));
                }
                for source in mapping.source.tables() {
                    let from_source_tier = catalog.tier_of(source) == Some(DatasetTier::Source);
                    if !from_source_tier && !produced.contains_key(source) {
                        problems.push(format!(
                            "stage '{}' reads {} which no earlier stage produces",
                            stage.name, source
                        ));
                    }
                }
            }

            for mapping in &stage.mappings {
                match catalog.tier_of(&mapping.destination) {
                    Some(DatasetTier::Source) => problems.push(format!(
                        "stage '{}' writes into source table {}",
                        stage.name, mapping.destination
                    )),
                    None => problems.push(format!(
                        "stage '{}' writes {} outside the configured datasets",
                        stage.name, mapping.destination
                    )),
                    Some(_) => {}
                }
                if let Some(previous) = produced.insert(&mapping.destination, &stage.name) {
                    problems.push(format!(
                        "{} is written by both '{}' and '{}'",
                        mapping.destination, previous, stage.name
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::config(format!(
                "invalid mapping registry: {}",
                problems.join("; ")
            )))
        }
    }
}
