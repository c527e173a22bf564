use crate::core::error::PipelineError;
use crate::core::registry::{load_registry_file, MappingRegistry, RegistryVariant};
use crate::core::tables::{DatasetNames, TableCatalog};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

pub mod loader;

pub use loader::ConfigLoader;

/// Fully resolved pipeline configuration. Every field required to reach the
/// service and name its tables is present once this exists.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub service: ServiceConfig,
    pub auth: AuthConfig,
    pub tables: TablesConfig,
    pub execution: ExecutionSettings,
    pub registry: RegistrySource,
}

/// Transformation service endpoint settings.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub url: Url,
    pub request_timeout: Option<Duration>,
    /// Endpoints whose outbound calls are logged at DEBUG rather than INFO.
    pub quiet_endpoints: Vec<String>,
}

/// How bearer credentials are obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthConfig {
    /// Run a command before every call and use its trimmed stdout.
    Command(Vec<String>),
    /// Use a fixed token.
    Static(String),
}

#[derive(Debug, Clone)]
pub struct TablesConfig {
    pub project_id: String,
    pub datasets: DatasetNames,
}

/// Fan-out, timeout and retry settings applied uniformly to every stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionSettings {
    pub max_active_mappings: usize,
    pub mapping_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_active_mappings: DEFAULT_MAX_ACTIVE_MAPPINGS,
            mapping_timeout: DEFAULT_MAPPING_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where the stage mappings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrySource {
    Builtin(RegistryVariant),
    File(PathBuf),
}

impl PipelineConfig {
    pub fn catalog(&self) -> Result<TableCatalog, PipelineError> {
        TableCatalog::build(&self.tables.project_id, self.tables.datasets.clone())
    }

    pub fn load_registry(&self, catalog: &TableCatalog) -> Result<MappingRegistry, PipelineError> {
        match &self.registry {
            RegistrySource::Builtin(variant) => MappingRegistry::builtin(*variant, catalog),
            RegistrySource::File(path) => load_registry_file(path, catalog),
        }
    }
}

pub const DEFAULT_MAX_ACTIVE_MAPPINGS: usize = 10;
pub const DEFAULT_MAPPING_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_QUIET_ENDPOINTS: &[&str] = &["pipeline_log"];
pub const DEFAULT_TOKEN_COMMAND: &[&str] = &["gcloud", "auth", "print-identity-token"];

/// On-disk configuration file; every field optional so env can fill gaps.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub tables: TablesSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub registry: RegistrySection,
    /// Parsed by the logging module; kept here so the section is not rejected.
    #[serde(default)]
    pub logging: Option<toml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub url: Option<String>,
    pub request_timeout: Option<String>,
    pub quiet_endpoints: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthSection {
    pub token_command: Option<Vec<String>>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TablesSection {
    pub project_id: Option<String>,
    pub source_dataset: Option<String>,
    pub staging_dataset: Option<String>,
    pub clean_dataset: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionSection {
    pub max_active_mappings: Option<usize>,
    pub mapping_timeout: Option<String>,
    pub retries: Option<u32>,
    pub retry_delay: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySection {
    pub variant: Option<RegistryVariant>,
    pub file: Option<PathBuf>,
}
