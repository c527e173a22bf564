use crate::cli::Command;
use std::env;

pub const ENV_ORCHESTRATED: &str = "PR2_ORCHESTRATED";

/// Execution contexts that influence how logging is routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionContext {
    /// `run` and `health` driven from a terminal; logs are the primary output.
    Pipeline,
    /// `stages` and `validate`, whose stdout carries the command result.
    Inspection,
    /// Launched by a scheduler that collects stdout as structured records.
    Orchestrated,
}

impl ExecutionContext {
    /// Returns `true` when log lines should be JSON unless configured otherwise.
    pub fn prefers_json(self) -> bool {
        matches!(self, ExecutionContext::Orchestrated)
    }
}

/// Derive the active execution context from a parsed CLI command plus overrides.
pub fn detect_context(command: &Command) -> ExecutionContext {
    match command {
        Command::Stages(_) | Command::Validate(_) => ExecutionContext::Inspection,
        Command::Run(_) | Command::Health(_) if orchestrated_override_enabled() => {
            ExecutionContext::Orchestrated
        }
        Command::Run(_) | Command::Health(_) => ExecutionContext::Pipeline,
    }
}

fn orchestrated_override_enabled() -> bool {
    env::var(ENV_ORCHESTRATED)
        .map(|value| value.trim() == "1")
        .unwrap_or(false)
}
