//! # Evaluator Configuration Validator
//!
//! Command-line tool for validating pipeline configuration across environments
//! before starting stage processors.

use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use evaluator_pipeline::config::{ConfigManager, PipelineConfig, PipelineRole};
use evaluator_pipeline::constants::deadletter_queue_name;
use evaluator_pipeline::logging::init_structured_logging_with_default;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate evaluator pipeline configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment section to merge (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format for `show`
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration (default)
    Validate,

    /// Print the merged configuration with secrets masked
    Show,

    /// List the queues each enabled stage would create
    Queues,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    init_structured_logging_with_default(level);

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Queues) => queues(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {e:#}");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<std::sync::Arc<ConfigManager>> {
    ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)
        .with_context(|| format!("loading configuration for '{}'", cli.environment))
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    println!("🔧 Validating Evaluator Pipeline Configuration");
    println!("Environment: {}", cli.environment);

    let manager = load(cli)?;
    println!(
        "✅ Configuration loaded from {}",
        manager.config_directory().display()
    );

    let config = manager.config();
    for role in &config.roles {
        describe_role(config, *role);
    }
    describe_job_status(config);

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn describe_role(config: &PipelineConfig, role: PipelineRole) {
    match role {
        PipelineRole::Inference => {
            println!("🧠 Inference stage");
            println!("   ✅ Inbound queues: {:?}", config.inference.inbound_queues);
            if let Some(outbound) = &config.inference.outbound_queue {
                println!("   ✅ Forwards to: {outbound}");
            }
            println!("   ✅ Concurrency: {}", config.inference.concurrency);
        }
        PipelineRole::Evaluation => {
            println!("📏 Evaluation stage");
            println!("   ✅ Inbound queues: {:?}", config.evaluation.inbound_queues);
            println!("   ✅ Concurrency: {}", config.evaluation.concurrency);
            match &config.catalog.base_url {
                Some(_) => println!("   ✅ Catalog configured"),
                None => println!("   ⚠️  No catalog base_url, results will not be recorded"),
            }
        }
    }
}

fn describe_job_status(config: &PipelineConfig) {
    match &config.job_status.container {
        Some(container) => println!(
            "📊 Job status tracking in '{container}' (idle timeout {} min)",
            config.job_status.idle_timeout_minutes
        ),
        None => println!("📊 Job status tracking disabled"),
    }
}

fn show(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let sanitized = manager.debug_config();
    let rendered = match cli.format {
        OutputFormat::Json => serde_json::to_string_pretty(&sanitized)?,
        OutputFormat::Yaml => serde_yaml::to_string(&sanitized)?,
    };
    println!("{rendered}");
    Ok(())
}

fn queues(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    let mut names = Vec::new();
    if config.runs(PipelineRole::Inference) {
        names.extend(config.inference.inbound_queues.iter().cloned());
        names.extend(config.inference.outbound_queue.iter().cloned());
    }
    if config.runs(PipelineRole::Evaluation) {
        names.extend(config.evaluation.inbound_queues.iter().cloned());
    }
    if names.is_empty() {
        bail!("no stage roles enabled");
    }

    names.sort();
    names.dedup();
    println!("📬 Queues:");
    for name in names {
        println!("  • {name}");
        println!("  • {}", deadletter_queue_name(&name));
    }
    Ok(())
}
