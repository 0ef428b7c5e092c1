//! dbt-migrate CLI - schema object migration into dbt-style projects.

use clap::{Parser, Subcommand};
use dbt_migrate::{
    CatalogAssessor, Config, MetadataCatalog, MigrateError, MigrationReport, Orchestrator,
    ShellEvaluator, ShellRunner,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "dbt-migrate")]
#[command(about = "Migrate relational schema objects into dbt-style projects")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate source metadata and show the migration plan
    Extract {
        /// Write the normalized catalog as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write a starter configuration file
    Init {
        /// Output path for configuration file [default: config.yaml]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Path to the extracted metadata catalog
        #[arg(long, default_value = "metadata.json")]
        metadata: String,

        /// Force overwrite existing file
        #[arg(long, short)]
        force: bool,
    },

    /// Migrate every planned object with the template generator
    Migrate {
        /// Continue from the state file instead of starting fresh
        #[arg(long)]
        resume: bool,
    },

    /// Extract, migrate and evaluate the project with the downstream shell
    Full {
        /// Continue from the state file instead of starting fresh
        #[arg(long)]
        resume: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    // Handle init command separately (doesn't need existing config)
    if let Commands::Init {
        output,
        metadata,
        force,
    } = &cli.command
    {
        let output_path = output.clone().unwrap_or_else(|| PathBuf::from("config.yaml"));
        write_starter_config(&output_path, metadata, *force)?;
        println!("Wrote starter configuration to {}", output_path.display());
        return Ok(0);
    }

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    resolve_paths(&mut config, &cli.config);
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Init { .. } => unreachable!(), // Handled above

        Commands::Extract { output } => {
            extract(&config, output.as_deref(), cli.output_json)?;
            Ok(0)
        }

        Commands::Migrate { resume } => {
            let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;
            let orchestrator = build_orchestrator(config, cli.state_file, resume).await?;
            let report = orchestrator.run(Some(cancel_token)).await?;
            print_report(&report, cli.output_json)?;
            Ok(report.exit_code())
        }

        Commands::Full { resume } => {
            let evaluation = config.evaluation.clone().ok_or_else(|| {
                MigrateError::Config("evaluation.command is required for full".to_string())
            })?;
            if !cli.output_json {
                extract(&config, None, false)?;
            }

            let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;
            let runner = ShellRunner::from_config(&evaluation, config.project.root.clone());
            let orchestrator = build_orchestrator(config, cli.state_file, resume)
                .await?
                .with_evaluator(Arc::new(ShellEvaluator::new(runner)));
            let report = orchestrator.run(Some(cancel_token)).await?;
            print_report(&report, cli.output_json)?;
            Ok(report.exit_code())
        }
    }
}

/// Load the catalog, print the plan, optionally write the normalized catalog.
fn extract(config: &Config, output: Option<&Path>, output_json: bool) -> Result<(), MigrateError> {
    let mut catalog = MetadataCatalog::load(&config.source.metadata)?;
    if let Some(schema) = &config.source.schema {
        catalog.retain_schema(schema);
    }
    let plan = CatalogAssessor::new(&config.migration).plan(&catalog);

    if let Some(path) = output {
        std::fs::write(path, catalog.to_json()?)?;
        info!("Wrote normalized catalog to {:?}", path);
    }

    if output_json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!(
            "Planned {} of {} source objects:",
            plan.len(),
            catalog.len()
        );
        for (i, object) in plan.objects.iter().enumerate() {
            println!("  {:>3}. {} ({})", i + 1, object.source_ref, object.kind);
        }
        for warning in &plan.warnings {
            println!("  warning: {}", warning);
        }
    }
    Ok(())
}

async fn build_orchestrator(
    config: Config,
    state_file: Option<PathBuf>,
    resume: bool,
) -> Result<Orchestrator, MigrateError> {
    let mut orchestrator = Orchestrator::from_config(config)?;

    match (state_file, resume) {
        (Some(path), true) => {
            // State file must exist for resume
            if !path.exists() {
                return Err(MigrateError::Config(format!(
                    "State file not found: {:?}",
                    path
                )));
            }
            orchestrator = orchestrator.with_state_file(path).resume().await?;
        }
        (Some(path), false) => {
            orchestrator = orchestrator.with_state_file(path);
        }
        (None, true) => {
            return Err(MigrateError::Config(
                "--state-file is required for --resume".to_string(),
            ));
        }
        (None, false) => {}
    }
    Ok(orchestrator)
}

fn print_report(report: &MigrationReport, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n{}", report.to_text());
    }
    Ok(())
}

fn write_starter_config(path: &Path, metadata: &str, force: bool) -> Result<(), MigrateError> {
    if path.exists() && !force {
        return Err(MigrateError::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    std::fs::write(path, Config::starter_yaml(metadata))?;
    Ok(())
}

/// Resolve relative metadata and project paths against the config file's
/// directory.
fn resolve_paths(config: &mut Config, config_path: &Path) {
    let base = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => return,
    };
    if config.source.metadata.is_relative() {
        config.source.metadata = base.join(&config.source.metadata);
    }
    if let Some(root) = config.project.root.as_mut().filter(|r| r.is_relative()) {
        *root = base.join(&*root);
    }
    if let Some(dir) = config
        .evaluation
        .as_mut()
        .and_then(|e| e.working_dir.as_mut())
        .filter(|d| d.is_relative())
    {
        *dir = base.join(&*dir);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
/// The run stops at the next object boundary and can be resumed.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing the current object (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();

        // A second signal or the timeout ends the process
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
            _ = tokio::time::sleep(std::time::Duration::from_secs(shutdown_timeout)) => {
                warn!("Graceful shutdown timed out after {}s", shutdown_timeout);
            }
        }
        std::process::exit(130);
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(_shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing the current object...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
