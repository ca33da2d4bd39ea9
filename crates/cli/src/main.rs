//! Infra Validator CLI
//!
//! Launches the serving binary against a trained model, probes it and writes
//! the blessing directory.
//!
//! Exit codes: 0 when blessed, 1 when not blessed (including an unreachable
//! runtime backend), 2 on configuration or setup errors.

mod startup;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use infra_validator_application::{
    BlessingWriter, CancellationToken, InfraValidator, check_request,
};
use infra_validator_domain::{PlatformConfig, PlatformKind, Verdict};
use infra_validator_infrastructure::TensorflowServingClient;
use infra_validator_shared::ConfigLoader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "infra-validator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validates that a model can be loaded and queried by its serving binary", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the validation and write the blessing directory
    Validate {
        /// Run configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Optional .env file with process settings
        #[arg(long)]
        env_file: Option<PathBuf>,
    },
    /// Check the run configuration without launching anything
    Check {
        #[arg(short, long)]
        config: PathBuf,

        #[arg(long)]
        env_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.debug);

    let result = match cli.command {
        Command::Validate { config, env_file } => validate(config, env_file).await,
        Command::Check { config, env_file } => check(config, env_file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

/// Setup logging based on debug flag.
fn setup_logging(debug: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

async fn validate(config: PathBuf, env_file: Option<PathBuf>) -> Result<ExitCode> {
    let loader = ConfigLoader::new(env_file);
    let settings = loader.load_settings()?;
    let run = loader.load_run_config(&config)?;

    let request = startup::validation_request(&run);
    let options = startup::validator_options(&settings, &run);
    // Reject bad specs before connecting to any runtime.
    check_request(&request, &options)?;

    let backend = match startup::connect_backend(&run.serving_spec.platform, &settings).await {
        Ok(backend) => backend,
        Err(e) => match startup::unreachable_backend_verdict(&run, &e) {
            Some(verdict) => return finish(&run.blessing_dir, &verdict),
            None => return Err(e).context("Failed to set up the runtime backend"),
        },
    };
    let client = Arc::new(
        TensorflowServingClient::new(settings.probe_timeout())
            .context("Failed to build the serving client")?,
    );
    let validator = InfraValidator::new(backend, client, options);

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let verdict = validator.validate(request, cancel).await?;
    finish(&run.blessing_dir, &verdict)
}

/// Write the blessing directory and map the verdict to the exit code.
fn finish(blessing_dir: &Path, verdict: &Verdict) -> Result<ExitCode> {
    BlessingWriter::write(blessing_dir, verdict)?;
    println!("{}", serde_json::to_string_pretty(verdict)?);

    Ok(if verdict.is_blessed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn check(config: PathBuf, env_file: Option<PathBuf>) -> Result<ExitCode> {
    let loader = ConfigLoader::new(env_file);
    let settings = loader.load_settings()?;
    let run = loader.load_run_config(&config)?;

    check_request(
        &startup::validation_request(&run),
        &startup::validator_options(&settings, &run),
    )?;

    let versions = run.serving_spec.versions();
    info!(
        "Configuration is valid: {} version(s) of {} on {}",
        versions.len(),
        run.serving_spec.model_name(),
        match &run.serving_spec.platform {
            PlatformConfig::LocalDocker(_) => PlatformKind::LocalDocker,
            PlatformConfig::Kubernetes(_) => PlatformKind::Kubernetes,
        }
    );
    Ok(ExitCode::SUCCESS)
}

/// Cancel the run on Ctrl+C. Running attempts still tear down.
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to setup signal handler: {}", e);
        return;
    }

    warn!("Interrupted, cancelling validation...");
    cancel.cancel();
}
