pub mod config;
pub mod error;
pub mod executor;
pub mod invoker;
pub mod registry;
pub mod sequencer;
pub mod tables;

pub use config::{ConfigLoader, ExecutionSettings, PipelineConfig, RetryPolicy};
pub use error::{ErrorCategory, MappingFailure, PipelineError};
pub use executor::{MappingOutcome, MappingStatus, StageExecutor, StageReport};
pub use invoker::{ApiRequest, ApiResponse, HealthStatus, TransformClient, TransformService};
pub use registry::{MappingRegistry, MappingSource, RegistryVariant, Stage, StageMapping};
pub use sequencer::{PipelineRun, PipelineSequencer, PipelineState};
pub use tables::{DatasetNames, DatasetTier, TableCatalog, TableIdentifier};
