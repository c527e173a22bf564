//! Fully-qualified table identifiers and the catalog of tables the pipeline touches.

use crate::core::error::PipelineError;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const DEFAULT_SOURCE_DATASET: &str = "FlatConnect";
pub const DEFAULT_STAGING_DATASET: &str = "ForTestingOnly";
pub const DEFAULT_CLEAN_DATASET: &str = "CleanConnect";

/// Raw survey exports, keyed by the logical name used for mapping names.
const SOURCE_TABLES: &[(&str, &str)] = &[
    ("MODULE1_V1", "module1_v1_JP"),
    ("MODULE1_V2", "module1_v2_JP"),
    ("MODULE2_V1", "module2_v1_JP"),
    ("MODULE2_V2", "module2_v2_JP"),
    ("MODULE3", "module3_v1_JP"),
    ("MODULE4", "module4_v1_JP"),
    ("BIOSURVEY", "bioSurvey_v1_JP"),
    ("CLINICALBIOSURVEY", "clinicalBioSurvey_v1_JP"),
    ("COVID19SURVEY", "covid19Survey_v1_JP"),
    ("MENSTRUALSURVEY", "menstrualSurvey_v1_JP"),
    ("EXPERIENCE2024", "experience2024_JP"),
    ("MOUTHWASH", "mouthwash_v1_JP"),
    ("BIOSPECIMEN", "biospecimen_JP"),
    ("PARTICIPANTS", "participants_JP"),
];

/// Entities that pass through the staging tier, keyed by logical prefix.
const STAGED_ENTITIES: &[(&str, &str)] = &[
    ("MODULE1_V1", "module1_v1"),
    ("MODULE1_V2", "module1_v2"),
    ("MODULE2_V1", "module2_v1"),
    ("MODULE2_V2", "module2_v2"),
    ("MODULE3", "module3"),
    ("MODULE4", "module4"),
    ("BIOSURVEY", "biosurvey"),
    ("CLINICALBIOSURVEY", "clinicalbiosurvey"),
    ("COVID19SURVEY", "covid19survey"),
    ("MOUTHWASH", "mouthwash"),
    ("BIOSPECIMEN", "biospecimen"),
    ("PARTICIPANTS", "participants"),
    ("EXPERIENCE2024", "experience2024"),
];

/// Staging suffixes, one per intermediate product.
const STAGING_PRODUCTS: &[(&str, &str)] = &[
    ("CLEANED_COLUMNS", "with_cleaned_columns"),
    ("CLEANED_ROWS", "with_cleaned_rows"),
    ("FIXED_LOOP_VARIABLES", "with_fixed_loop_variables"),
];

const CLEAN_TABLES: &[(&str, &str)] = &[
    ("MODULE1", "module1"),
    ("MODULE2", "module2"),
    ("MODULE3", "module3"),
    ("MODULE4", "module4"),
    ("BIOSURVEY", "bioSurvey"),
    ("CLINICALBIOSURVEY", "clinicalBioSurvey"),
    ("COVID19SURVEY", "covid19Survey"),
    ("MENSTRUALSURVEY", "menstrualSurvey"),
    ("EXPERIENCE2024", "experience2024"),
    ("MOUTHWASH", "mouthwash"),
    ("BIOSPECIMEN", "biospecimen"),
    ("PARTICIPANTS", "participants"),
];

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("static pattern is valid"))
}

fn validate_segment(kind: &str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::config(format!("{} cannot be empty", kind)));
    }
    if !segment_pattern().is_match(value) {
        return Err(PipelineError::config(format!(
            "{} '{}' may only contain letters, digits, '_' and '-'",
            kind, value
        )));
    }
    Ok(())
}

/// Data-quality tier a dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetTier {
    Source,
    Staging,
    Clean,
}

impl DatasetTier {
    pub const ALL: [DatasetTier; 3] = [DatasetTier::Source, DatasetTier::Staging, DatasetTier::Clean];

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetTier::Source => "source",
            DatasetTier::Staging => "staging",
            DatasetTier::Clean => "clean",
        }
    }
}

impl fmt::Display for DatasetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatasetTier {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "source" => Ok(DatasetTier::Source),
            "staging" => Ok(DatasetTier::Staging),
            "clean" => Ok(DatasetTier::Clean),
            other => Err(PipelineError::config(format!(
                "unknown dataset tier '{}'; supported tiers are source, staging, clean",
                other
            ))),
        }
    }
}

/// `<namespace>.<dataset>.<table>`; serializes as the bare string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TableIdentifier(String);

impl TableIdentifier {
    pub fn new(namespace: &str, dataset: &str, table: &str) -> Result<Self, PipelineError> {
        validate_segment("project id", namespace)?;
        validate_segment("dataset name", dataset)?;
        validate_segment("table name", table)?;
        Ok(TableIdentifier(format!("{}.{}.{}", namespace, dataset, table)))
    }

    pub fn parse(value: &str) -> Result<Self, PipelineError> {
        let parts: Vec<&str> = value.split('.').collect();
        match parts.as_slice() {
            [namespace, dataset, table] => Self::new(namespace, dataset, table),
            _ => Err(PipelineError::config(format!(
                "table identifier '{}' must have the form <project>.<dataset>.<table>",
                value
            ))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn part(&self, index: usize) -> &str {
        self.0.split('.').nth(index).unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.part(0)
    }

    pub fn dataset(&self) -> &str {
        self.part(1)
    }

    pub fn table(&self) -> &str {
        self.part(2)
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TableIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TableIdentifier::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Dataset names for each tier within one deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetNames {
    pub source: String,
    pub staging: String,
    pub clean: String,
}

impl Default for DatasetNames {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE_DATASET.to_string(),
            staging: DEFAULT_STAGING_DATASET.to_string(),
            clean: DEFAULT_CLEAN_DATASET.to_string(),
        }
    }
}

impl DatasetNames {
    pub fn for_tier(&self, tier: DatasetTier) -> &str {
        match tier {
            DatasetTier::Source => &self.source,
            DatasetTier::Staging => &self.staging,
            DatasetTier::Clean => &self.clean,
        }
    }
}

/// Immutable map from logical table name to identifier, built once per process.
#[derive(Debug, Clone)]
pub struct TableCatalog {
    namespace: String,
    datasets: DatasetNames,
    tables: IndexMap<(DatasetTier, String), TableIdentifier>,
}

impl TableCatalog {
    /// Resolve every known table for the given deployment namespace.
    pub fn build(namespace: &str, datasets: DatasetNames) -> Result<Self, PipelineError> {
        validate_segment("project id", namespace)?;
        let mut catalog = TableCatalog {
            namespace: namespace.to_string(),
            datasets,
            tables: IndexMap::new(),
        };

        for (key, table) in SOURCE_TABLES {
            catalog.insert(DatasetTier::Source, key, table)?;
        }
        for (entity, prefix) in STAGED_ENTITIES {
            for (product, suffix) in STAGING_PRODUCTS {
                let key = format!("{}_{}", entity, product);
                let table = format!("{}_{}", prefix, suffix);
                catalog.insert(DatasetTier::Staging, &key, &table)?;
            }
        }
        for (key, table) in CLEAN_TABLES {
            catalog.insert(DatasetTier::Clean, key, table)?;
        }
        Ok(catalog)
    }

    fn insert(&mut self, tier: DatasetTier, key: &str, table: &str) -> Result<(), PipelineError> {
        let identifier = self.identifier(tier, table)?;
        self.tables.insert((tier, key.to_string()), identifier);
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Format an identifier for an arbitrary table in the given tier.
    pub fn identifier(&self, tier: DatasetTier, table: &str) -> Result<TableIdentifier, PipelineError> {
        TableIdentifier::new(&self.namespace, self.datasets.for_tier(tier), table)
    }

    /// Look up a known table by its logical key.
    pub fn get(&self, tier: DatasetTier, key: &str) -> Result<&TableIdentifier, PipelineError> {
        self.tables
            .get(&(tier, key.to_string()))
            .ok_or_else(|| {
                PipelineError::config(format!("no {} table registered under '{}'", tier, key))
            })
    }

    /// Resolve a `"<tier>.<table_name>"` reference as used by registry files.
    pub fn resolve_reference(&self, reference: &str) -> Result<TableIdentifier, PipelineError> {
        let (tier, table) = reference.split_once('.').ok_or_else(|| {
            PipelineError::config(format!(
                "table reference '{}' must have the form <tier>.<table>",
                reference
            ))
        })?;
        self.identifier(tier.parse()?, table)
    }

    /// Tier an identifier belongs to, if it lives in this deployment.
    pub fn tier_of(&self, identifier: &TableIdentifier) -> Option<DatasetTier> {
        if identifier.namespace() != self.namespace {
            return None;
        }
        DatasetTier::ALL
            .into_iter()
            .find(|tier| self.datasets.for_tier(*tier) == identifier.dataset())
    }

    pub fn tables(&self, tier: DatasetTier) -> impl Iterator<Item = (&str, &TableIdentifier)> + '_ {
        self.tables
            .iter()
            .filter(move |((t, _), _)| *t == tier)
            .map(|((_, key), id)| (key.as_str(), id))
    }
}
