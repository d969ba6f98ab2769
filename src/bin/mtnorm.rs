use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mtnorm::cli::{self, Cli};

fn setup_logging(base_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(base_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    match cli::run(&cli) {
        Ok(out) => {
            info!(
                "done after {} outer iterations, scale factors {:?}",
                out.outer_iterations, out.scale_factors
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{} ({:?} error)", e, e.kind());
            ExitCode::FAILURE
        }
    }
}
