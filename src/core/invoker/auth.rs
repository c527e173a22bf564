use crate::core::config::AuthConfig;
use crate::core::error::PipelineError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::process::Command;

/// Source of bearer credentials. Called once per request; implementations must not cache.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, PipelineError>;
}

/// Runs a command (by default `gcloud auth print-identity-token`) and uses its stdout.
#[derive(Debug, Clone)]
pub struct CommandTokenProvider {
    program: String,
    args: Vec<String>,
}

impl CommandTokenProvider {
    pub fn new(command: &[String]) -> Result<Self, PipelineError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| PipelineError::config("token command cannot be empty"))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl TokenProvider for CommandTokenProvider {
    async fn token(&self) -> Result<String, PipelineError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PipelineError::Authentication(format!(
                    "failed to run '{}': {}",
                    self.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::Authentication(format!(
                "'{}' exited with {}: {}",
                self.display(),
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(PipelineError::Authentication(format!(
                "'{}' printed an empty token",
                self.display()
            )));
        }
        Ok(token)
    }
}

/// Fixed token, for environments where credentials are injected up front.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, PipelineError> {
        if self.token.trim().is_empty() {
            return Err(PipelineError::Authentication(
                "configured identity token is empty".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}

/// Build the provider described by configuration.
pub fn token_provider(config: &AuthConfig) -> Result<Arc<dyn TokenProvider>, PipelineError> {
    match config {
        AuthConfig::Command(command) => Ok(Arc::new(CommandTokenProvider::new(command)?)),
        AuthConfig::Static(token) => Ok(Arc::new(StaticTokenProvider::new(token.clone()))),
    }
}
