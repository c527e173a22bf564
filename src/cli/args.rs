use clap::Args;
use std::path::PathBuf;

/// Options shared by every command that reads pipeline configuration.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Path to the pipeline config file (default: $PR2_CONFIG, else ./pr2.toml if present)
    #[arg(long, value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Print the stages and mappings that would be invoked, without calling the service
    #[arg(long)]
    pub dry_run: bool,

    /// Start at this stage instead of the first one (the health check still runs)
    #[arg(long, value_name = "STAGE")]
    pub from_stage: Option<String>,

    /// Override the concurrent mapping cap per stage
    #[arg(long, value_name = "N", help_heading = "Execution Overrides")]
    pub max_active_mappings: Option<usize>,

    /// Override the number of retries per mapping and health check
    #[arg(long, value_name = "N", help_heading = "Execution Overrides")]
    pub retries: Option<u32>,
}

#[derive(Args, Clone, Debug)]
pub struct HealthArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Clone, Debug)]
pub struct StagesArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit either terminal-friendly text or machine-readable JSON
    #[arg(long, default_value = "text", value_name = "FORMAT")]
    pub format: OutputFormat,
}

#[derive(Args, Clone, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Clone, Copy, clap::ValueEnum, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable listing
    Text,
    /// JSON payload suitable for downstream tooling
    Json,
}
