use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use prodwatch::config::Config;
use prodwatch::pipeline::{Pipeline, RunOutcome};
use std::path::{Path, PathBuf};

/// Configuration file looked up in the working directory when none is given
const DEFAULT_CONFIG_FILE: &str = "prodwatch.toml";

/// Command-line arguments for the production evidence collector
#[derive(Parser, Debug)]
#[command(
    name = "prodwatch",
    about = "Collects AWS monitoring evidence and consolidates it into reports",
    long_about = "Captures CloudWatch dashboard screenshots, exports metric and database \
                  datapoints above their thresholds and extracts error logs for every \
                  configured service and region, optionally classifies the errors through an \
                  analysis endpoint, and writes JSON, Markdown and PDF reports."
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Collect evidence for all configured targets and write the reports
    Collect(CollectArgs),
    /// Regenerate reports from a stored JSON report
    Consolidate(ConsolidateArgs),
}

#[derive(Args, Debug, Default)]
struct CollectArgs {
    /// Output directory (overrides output.directory)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Only collect these services (repeatable)
    #[arg(long = "service", value_name = "SERVICE")]
    services: Vec<String>,

    /// Only collect these target names (repeatable)
    #[arg(long = "target", value_name = "TARGET")]
    targets: Vec<String>,

    /// Disable AI analysis of error logs
    #[arg(long)]
    no_ai: bool,

    /// Skip PDF generation
    #[arg(long)]
    no_pdf: bool,

    /// Skip dashboard screenshots
    #[arg(long)]
    no_screenshots: bool,
}

#[derive(Args, Debug)]
struct ConsolidateArgs {
    /// Stored JSON report to regenerate
    #[arg(short, long, value_name = "REPORT")]
    input: PathBuf,

    /// Output directory (overrides output.directory)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Keep the stored run id and timestamp instead of issuing new ones
    #[arg(long)]
    keep_run_id: bool,

    /// Skip PDF generation
    #[arg(long)]
    no_pdf: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(path) = &self.config {
            if path.exists() && !path.is_file() {
                return Err(format!(
                    "Configuration path is not a file: {}",
                    path.display()
                ));
            }
            if path.extension().map_or(false, |ext| ext != "toml") {
                warn!(
                    "Configuration file does not have .toml extension: {}",
                    path.display()
                );
            }
        }
        if let Command::Consolidate(args) = &self.command {
            if args.input.is_dir() {
                return Err(format!(
                    "Input report is a directory: {}",
                    args.input.display()
                ));
            }
        }
        Ok(())
    }

    /// Load the configuration file, or defaults when none exists
    ///
    /// An explicitly given file must be readable; the default file is
    /// optional. Validation happens once command-line overrides are applied.
    fn load_config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::read_file(path)
                .with_context(|| format!("Invalid configuration in {}", path.display())),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Config::read_file(Path::new(DEFAULT_CONFIG_FILE))
                    .with_context(|| format!("Invalid configuration in {}", DEFAULT_CONFIG_FILE))
            }
            None => {
                info!("No configuration file found, using defaults");
                Ok(Config::default())
            }
        }
    }
}

impl CollectArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output {
            config.output.directory = dir.clone();
        }
        if !self.services.is_empty() {
            config.run.services = self.services.clone();
        }
        if !self.targets.is_empty() {
            config.run.targets = self.targets.clone();
        }
        if self.no_ai {
            config.run.enable_ai_analysis = false;
        }
        if self.no_pdf {
            config.run.generate_pdf = false;
        }
        if self.no_screenshots {
            config.run.enable_screenshots = false;
        }
    }
}

impl ConsolidateArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.output {
            config.output.directory = dir.clone();
        }
        if self.no_pdf {
            config.run.generate_pdf = false;
        }
        // Regeneration never calls the analysis endpoint
        config.run.enable_ai_analysis = false;
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

fn report_outcome(outcome: &RunOutcome) {
    let summary = &outcome.report.summary;
    info!(
        "Report {}: {} target(s), {} failed collector(s) on {} target(s)",
        outcome.report.run_id,
        summary.target_count,
        summary.failure_count,
        summary.failed_targets.len()
    );
    let written = &outcome.written;
    for (format, result) in [("JSON", &written.json), ("Markdown", &written.markdown)] {
        match result {
            Ok(path) => println!("{}: {}", format, path.display()),
            Err(e) => error!("{} report could not be written: {}", format, e),
        }
    }
    if let Some(Ok(path)) = &written.pdf {
        println!("PDF: {}", path.display());
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = cli.load_config()?;

    match &cli.command {
        Command::Collect(args) => {
            args.apply(&mut config);
            let pipeline = Pipeline::new(config).context("Invalid configuration")?;
            let outcome = pipeline.collect().await.context("Cannot start collection")?;
            report_outcome(&outcome);
        }
        Command::Consolidate(args) => {
            args.apply(&mut config);
            let pipeline = Pipeline::new(config).context("Invalid configuration")?;
            let outcome = pipeline
                .consolidate(&args.input, args.keep_run_id)
                .await
                .with_context(|| format!("Cannot consolidate {}", args.input.display()))?;
            report_outcome(&outcome);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
