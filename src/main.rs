use clap::Parser;
use pr2_pipeline::{cli, logging};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();

    let guard = match logging::init(&args.command) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(
        console = %guard.console_output(),
        format = %guard.format(),
        log_file = ?guard.log_file_path(),
        "logging initialized"
    );

    match cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{:#}", err), "command failed");
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
