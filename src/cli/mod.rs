pub mod args;
pub mod commands;

pub use args::{ConfigArgs, HealthArgs, OutputFormat, RunArgs, StagesArgs, ValidateArgs};
use clap::{Parser, Subcommand};
use std::path::Path;

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
PIPELINE COMMANDS:\n{subcommands}\n\
{after-help}";

fn environment_help() -> String {
    let mut help = String::from(
        "Typical flow: validate the registry, check service health, then run the pipeline.\n\nENVIRONMENT:\n",
    );
    for line in crate::core::ConfigLoader::env_var_documentation() {
        help.push_str("    ");
        help.push_str(line);
        help.push('\n');
    }
    help
}

#[derive(Parser)]
#[command(name = "pr2-pipeline")]
#[command(version = crate::VERSION)]
#[command(about = "Orchestrates the PR2 clean and merge pipeline against the transformation service")]
#[command(help_template = HELP_TEMPLATE)]
#[command(after_long_help = environment_help())]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Run the pipeline stages in order",
        long_about = "Run checks the transformation service heartbeat, then invokes every stage of the active registry in order. A stage starts only after every mapping of the previous stage finished, and any failed mapping stops the run.",
        after_help = "Examples:\n    pr2-pipeline run\n    pr2-pipeline run --from-stage clean_rows\n    pr2-pipeline run --dry-run"
    )]
    Run(RunArgs),
    #[command(
        about = "Check that the transformation service is healthy",
        long_about = "Health calls the service heartbeat (with the configured retry policy) and exits non-zero unless it reports healthy.",
        after_help = "Example:\n    pr2-pipeline health --config pr2.toml"
    )]
    Health(HealthArgs),
    #[command(
        about = "List the stages and mappings of the active registry",
        long_about = "Stages prints every stage with its endpoint and fully resolved source and destination tables.",
        after_help = "Example:\n    pr2-pipeline stages --format json"
    )]
    Stages(StagesArgs),
    #[command(
        about = "Check the registry for consistency",
        long_about = "Validate resolves every table identifier and verifies that each stage only reads source tables or tables written by an earlier stage.",
        after_help = "Example:\n    PR2_REGISTRY_VARIANT=loop_variables pr2-pipeline validate"
    )]
    Validate(ValidateArgs),
}

impl Command {
    /// Config file requested on the command line, if any.
    pub fn config_path(&self) -> Option<&Path> {
        let config = match self {
            Command::Run(args) => &args.config,
            Command::Health(args) => &args.config,
            Command::Stages(args) => &args.config,
            Command::Validate(args) => &args.config,
        };
        config.config.as_deref()
    }
}

pub async fn run(args: Args) -> crate::Result<()> {
    match args.command {
        Command::Run(run_args) => commands::run(run_args).await,
        Command::Health(health_args) => commands::health(health_args).await,
        Command::Stages(stages_args) => commands::stages(stages_args),
        Command::Validate(validate_args) => commands::validate(validate_args),
    }
}
