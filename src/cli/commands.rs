use crate::{
    cli::args::{ConfigArgs, HealthArgs, OutputFormat, RunArgs, StagesArgs, ValidateArgs},
    core::{
        ConfigLoader, MappingRegistry, PipelineConfig, PipelineRun, PipelineSequencer, Stage,
        TableCatalog, TransformClient,
    },
    Result,
};
use anyhow::{bail, Context};
use std::sync::Arc;

/// Resolved configuration plus the catalog and registry derived from it.
struct Pipeline {
    config: PipelineConfig,
    catalog: TableCatalog,
    registry: MappingRegistry,
}

fn load_pipeline(args: &ConfigArgs) -> Result<Pipeline> {
    let config = ConfigLoader::load(args.config.as_deref())?;
    let catalog = config.catalog()?;
    let registry = config.load_registry(&catalog)?;
    tracing::debug!(
        project = catalog.namespace(),
        stages = registry.stages.len(),
        mappings = registry.mapping_count(),
        "loaded pipeline configuration"
    );
    Ok(Pipeline {
        config,
        catalog,
        registry,
    })
}

pub async fn run(args: RunArgs) -> Result<()> {
    let Pipeline {
        mut config,
        catalog,
        registry,
    } = load_pipeline(&args.config)?;

    if let Some(max_active) = args.max_active_mappings {
        if max_active == 0 {
            bail!("--max-active-mappings must be at least 1");
        }
        config.execution.max_active_mappings = max_active;
    }
    if let Some(retries) = args.retries {
        config.execution.retry.retries = retries;
    }

    registry.validate(&catalog)?;
    let stages = match &args.from_stage {
        Some(name) => registry.starting_from(name)?,
        None => registry.stages.as_slice(),
    };

    if args.dry_run {
        println!(
            "Dry run: {} stage(s) against {}; no calls issued",
            stages.len(),
            config.service.url
        );
        print_stages(stages);
        return Ok(());
    }

    let client = TransformClient::from_config(&config.service, &config.auth)?;
    let sequencer = PipelineSequencer::new(Arc::new(client), config.execution.clone());
    let run = sequencer.execute(stages).await;
    print_run_summary(&run);
    run.into_result()
        .context("pipeline run failed")
        .map(|_| ())
}

pub async fn health(args: HealthArgs) -> Result<()> {
    let config = ConfigLoader::load(args.config.config.as_deref())?;
    let client = TransformClient::from_config(&config.service, &config.auth)?;
    let sequencer = PipelineSequencer::new(Arc::new(client), config.execution.clone());
    let status = sequencer.check_health().await?;
    println!("{} is {}", config.service.url, status.status);
    Ok(())
}

pub fn stages(args: StagesArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.config)?;
    match args.format {
        OutputFormat::Text => print_stages(&pipeline.registry.stages),
        OutputFormat::Json => {
            let rendered = serde_json::to_string_pretty(&pipeline.registry.stages)
                .context("failed to render stages as JSON")?;
            println!("{}", rendered);
        }
    }
    Ok(())
}

pub fn validate(args: ValidateArgs) -> Result<()> {
    let pipeline = load_pipeline(&args.config)?;
    pipeline.registry.validate(&pipeline.catalog)?;
    println!(
        "Registry is consistent: {} stage(s), {} mapping(s) in project {}",
        pipeline.registry.stages.len(),
        pipeline.registry.mapping_count(),
        pipeline.catalog.namespace()
    );
    Ok(())
}

fn print_stages(stages: &[Stage]) {
    for stage in stages {
        println!(
            "{} (endpoint: {}, {} mapping(s))",
            stage.name,
            stage.endpoint,
            stage.mappings.len()
        );
        if let Some(description) = &stage.description {
            println!("  {}", description);
        }
        for mapping in &stage.mappings {
            match &mapping.name {
                Some(name) => println!(
                    "  [{}] {} -> {}",
                    name, mapping.source, mapping.destination
                ),
                None => println!("  {} -> {}", mapping.source, mapping.destination),
            }
        }
    }
}

fn print_run_summary(run: &PipelineRun) {
    println!("Run {}: {}", run.run_id, run.state);
    for report in &run.reports {
        println!(
            "  {}: {} succeeded, {} failed ({} ms)",
            report.stage,
            report.succeeded(),
            report.failed(),
            report.duration_ms
        );
        for failure in report.failures() {
            println!("    {}", failure);
        }
    }
    if let Some(error) = &run.error {
        println!("  error [{}]: {}", error.code(), error);
    }
}
