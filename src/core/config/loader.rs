use super::{
    AuthConfig, ConfigFile, ExecutionSettings, PipelineConfig, RegistrySource, RetryPolicy,
    ServiceConfig, TablesConfig, DEFAULT_QUIET_ENDPOINTS, DEFAULT_TOKEN_COMMAND,
};
use crate::core::error::PipelineError;
use crate::core::tables::DatasetNames;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

pub const ENV_SERVICE_URL: &str = "PR2_TRANSFORMATION_CLOUD_RUN_URL";
pub const ENV_PROJECT_ID: &str = "GCP_PROJECT_ID";
pub const ENV_CONFIG_FILE: &str = "PR2_CONFIG";
pub const ENV_IDENTITY_TOKEN: &str = "PR2_IDENTITY_TOKEN";
pub const ENV_MAX_ACTIVE_MAPPINGS: &str = "PR2_MAX_ACTIVE_MAPPINGS";
pub const ENV_MAPPING_TIMEOUT: &str = "PR2_MAPPING_TIMEOUT";
pub const ENV_RETRIES: &str = "PR2_RETRIES";
pub const ENV_RETRY_DELAY: &str = "PR2_RETRY_DELAY";
pub const ENV_REGISTRY_VARIANT: &str = "PR2_REGISTRY_VARIANT";
pub const ENV_REGISTRY_FILE: &str = "PR2_REGISTRY_FILE";

/// Config file picked up from the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "pr2.toml";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the optional file plus the process environment.
    pub fn load(path: Option<&Path>) -> Result<PipelineConfig, PipelineError> {
        Self::load_with(path, |key| env::var(key).ok())
    }

    /// Load configuration with an injected environment lookup.
    ///
    /// Precedence, highest first: environment, config file, built-in defaults.
    /// Missing service URL or project id is a configuration error.
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<PipelineConfig, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match Self::resolve_path(path, &lookup)? {
            Some(path) => Self::load_from_file(&path)?,
            None => ConfigFile::default(),
        };
        Self::resolve(file, &lookup)
    }

    /// Explicit path, then `PR2_CONFIG`, then `./pr2.toml` if present.
    pub fn resolve_path<F>(explicit: Option<&Path>, lookup: &F) -> Result<Option<PathBuf>, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let requested = explicit
            .map(Path::to_path_buf)
            .or_else(|| non_blank(lookup(ENV_CONFIG_FILE)).map(PathBuf::from));
        if let Some(path) = requested {
            if !path.is_file() {
                return Err(PipelineError::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path));
        }
        let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
        Ok(fallback.is_file().then_some(fallback))
    }

    pub fn load_from_file(path: &Path) -> Result<ConfigFile, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut file: ConfigFile = toml::from_str(&content).map_err(|e| {
            PipelineError::config(format!(
                "failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;
        // Relative registry files are relative to the config file, not the cwd.
        if let (Some(registry_file), Some(dir)) = (file.registry.file.as_mut(), path.parent()) {
            if registry_file.is_relative() {
                *registry_file = dir.join(&*registry_file);
            }
        }
        Ok(file)
    }

    fn resolve<F>(file: ConfigFile, lookup: &F) -> Result<PipelineConfig, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let execution = Self::resolve_execution(&file, lookup)?;

        let url = non_blank(lookup(ENV_SERVICE_URL))
            .or(non_blank(file.service.url))
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "transformation service URL is not set ({} or [service].url)",
                    ENV_SERVICE_URL
                ))
            })?;
        let url = validate_url(&url)?;

        let project_id = non_blank(lookup(ENV_PROJECT_ID))
            .or(non_blank(file.tables.project_id))
            .ok_or_else(|| {
                PipelineError::config(format!(
                    "project id is not set ({} or [tables].project_id)",
                    ENV_PROJECT_ID
                ))
            })?;

        let defaults = DatasetNames::default();
        let datasets = DatasetNames {
            source: non_blank(file.tables.source_dataset).unwrap_or(defaults.source),
            staging: non_blank(file.tables.staging_dataset).unwrap_or(defaults.staging),
            clean: non_blank(file.tables.clean_dataset).unwrap_or(defaults.clean),
        };

        let request_timeout = file
            .service
            .request_timeout
            .as_deref()
            .map(|value| parse_duration("[service].request_timeout", value))
            .transpose()?;
        let quiet_endpoints = file.service.quiet_endpoints.unwrap_or_else(|| {
            DEFAULT_QUIET_ENDPOINTS
                .iter()
                .map(|endpoint| endpoint.to_string())
                .collect()
        });

        let auth = match non_blank(lookup(ENV_IDENTITY_TOKEN)).or(non_blank(file.auth.token)) {
            Some(token) => AuthConfig::Static(token),
            None => {
                let command = file.auth.token_command.unwrap_or_else(|| {
                    DEFAULT_TOKEN_COMMAND.iter().map(|s| s.to_string()).collect()
                });
                if command.is_empty() || command[0].trim().is_empty() {
                    return Err(PipelineError::config("[auth].token_command cannot be empty"));
                }
                AuthConfig::Command(command)
            }
        };

        let registry = match non_blank(lookup(ENV_REGISTRY_FILE))
            .map(PathBuf::from)
            .or(file.registry.file)
        {
            Some(path) => RegistrySource::File(path),
            None => {
                let variant = match non_blank(lookup(ENV_REGISTRY_VARIANT)) {
                    Some(value) => value.parse()?,
                    None => file.registry.variant.unwrap_or_default(),
                };
                RegistrySource::Builtin(variant)
            }
        };

        Ok(PipelineConfig {
            service: ServiceConfig {
                url,
                request_timeout,
                quiet_endpoints,
            },
            auth,
            tables: TablesConfig {
                project_id,
                datasets,
            },
            execution,
            registry,
        })
    }

    fn resolve_execution<F>(file: &ConfigFile, lookup: &F) -> Result<ExecutionSettings, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ExecutionSettings::default();
        let section = &file.execution;

        let max_active_mappings = match non_blank(lookup(ENV_MAX_ACTIVE_MAPPINGS)) {
            Some(value) => parse_number(ENV_MAX_ACTIVE_MAPPINGS, &value)?,
            None => section
                .max_active_mappings
                .unwrap_or(defaults.max_active_mappings),
        };
        if max_active_mappings == 0 {
            return Err(PipelineError::config(
                "max_active_mappings must be at least 1",
            ));
        }

        let mapping_timeout = match non_blank(lookup(ENV_MAPPING_TIMEOUT)) {
            Some(value) => parse_duration(ENV_MAPPING_TIMEOUT, &value)?,
            None => match &section.mapping_timeout {
                Some(value) => parse_duration("[execution].mapping_timeout", value)?,
                None => defaults.mapping_timeout,
            },
        };
        if mapping_timeout.is_zero() {
            return Err(PipelineError::config("mapping_timeout must be greater than zero"));
        }

        let retries = match non_blank(lookup(ENV_RETRIES)) {
            Some(value) => parse_number(ENV_RETRIES, &value)?,
            None => section.retries.unwrap_or(defaults.retry.retries),
        };
        let delay = match non_blank(lookup(ENV_RETRY_DELAY)) {
            Some(value) => parse_duration(ENV_RETRY_DELAY, &value)?,
            None => match &section.retry_delay {
                Some(value) => parse_duration("[execution].retry_delay", value)?,
                None => defaults.retry.delay,
            },
        };

        Ok(ExecutionSettings {
            max_active_mappings,
            mapping_timeout,
            retry: RetryPolicy { retries, delay },
        })
    }

    /// Documentation for supported environment variables.
    pub fn env_var_documentation() -> &'static [&'static str] {
        &[
            "PR2_CONFIG - Path to the pipeline config file (default: ./pr2.toml if present)",
            "PR2_TRANSFORMATION_CLOUD_RUN_URL - Base URL of the transformation service (required)",
            "GCP_PROJECT_ID - Project that namespaces every table identifier (required)",
            "PR2_IDENTITY_TOKEN - Fixed bearer token instead of running the token command",
            "PR2_MAX_ACTIVE_MAPPINGS - Concurrent mapping calls per stage (default: 10)",
            "PR2_MAPPING_TIMEOUT - Wall-clock budget per mapping attempt (default: 60m)",
            "PR2_RETRIES - Retries per mapping and health check (default: 3)",
            "PR2_RETRY_DELAY - Fixed delay between retries (default: 15s)",
            "PR2_REGISTRY_VARIANT - Built-in registry: standard or loop_variables (default: standard)",
            "PR2_REGISTRY_FILE - TOML registry file used instead of a built-in registry",
            "PR2_LOG_FORMAT - Log line format: text or json",
            "PR2_LOG_DIR - Also append logs to pr2-pipeline.log in this directory",
            "PR2_ORCHESTRATED - Set to 1 when launched by a scheduler (JSON logs on stdout)",
            "RUST_LOG - Tracing filter directive overriding [logging].level",
        ]
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_url(value: &str) -> Result<Url, PipelineError> {
    let url = Url::parse(value).map_err(|e| {
        PipelineError::config(format!("invalid transformation service URL '{}': {}", value, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(PipelineError::config(format!(
            "transformation service URL must use http or https, got '{}'",
            scheme
        ))),
    }
}

fn parse_number<T: FromStr>(source: &str, value: &str) -> Result<T, PipelineError> {
    value.trim().parse().map_err(|_| {
        PipelineError::config(format!("{} must be a non-negative integer, got '{}'", source, value))
    })
}

fn parse_duration(source: &str, value: &str) -> Result<Duration, PipelineError> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        PipelineError::config(format!("{} is not a valid duration '{}': {}", source, value, e))
    })
}
