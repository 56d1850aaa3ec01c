//! annotator CLI - Resumable cascading LLM annotation of text corpora.

use annotator::client::HealthStatus;
use annotator::models::ConfigOverrides;
use annotator::{
    Config, DocumentStore, OllamaClient, PromptData, StageLayout, StagePipeline, StageSelection,
};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "annotator")]
#[command(version)]
#[command(about = "Resumable cascading LLM annotation of text corpora")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stage cascade
    Run {
        #[command(flatten)]
        overrides: OverrideArgs,

        /// Resume the cascade from this stage
        #[arg(long, conflicts_with = "only")]
        from: Option<String>,

        /// Run only this stage
        #[arg(long)]
        only: Option<String>,
    },

    /// Show checkpoint progress of every stage
    Status {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Validate configuration, prompt files and the completion service
    Validate {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show example configuration
    Example,
}

/// Values that replace the config file's.
#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Corpus file, relative to the data root
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Base checkpoint file name
    #[arg(long)]
    out_filename: Option<String>,

    /// Model id
    #[arg(long)]
    model: Option<String>,

    /// Base sampling seed
    #[arg(long)]
    seed: Option<i64>,

    /// Base sampling temperature
    #[arg(long)]
    temperature: Option<f64>,

    /// Completion service host
    #[arg(long)]
    host: Option<String>,

    /// Completion service port
    #[arg(long)]
    port: Option<u16>,

    /// Concurrent documents
    #[arg(short, long)]
    workers: Option<usize>,

    /// Completions between checkpoint writes
    #[arg(long)]
    save_interval: Option<usize>,

    /// Attempts per document
    #[arg(long)]
    max_retries: Option<u32>,

    /// Enable self-consistency with this many samples per document
    #[arg(long)]
    samples: Option<usize>,

    /// Data root
    #[arg(long = "data-path", env = "DATA_PATH")]
    data_path: Option<PathBuf>,

    /// Run identifier
    #[arg(long, env = "RUN_ID")]
    run_id: Option<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            dataset: args.dataset,
            out_filename: args.out_filename,
            model: args.model,
            seed: args.seed,
            temperature: args.temperature,
            host: args.host,
            port: args.port,
            workers: args.workers,
            save_interval: args.save_interval,
            max_retries: args.max_retries,
            samples: args.samples,
            data_root: args.data_path,
            run_id: args.run_id,
        }
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

/// Load, override and validate the configuration.
fn load_config(path: &Path, overrides: OverrideArgs) -> Result<Config> {
    let mut config = Config::from_file(path)
        .with_context(|| format!("Failed to load config from {path:?}"))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    config.prompts.resolve_relative(base);
    config.apply(overrides.into());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn selection(from: Option<String>, only: Option<String>) -> StageSelection {
    match (from, only) {
        (_, Some(name)) => StageSelection::Only(name),
        (Some(name), None) => StageSelection::From(name),
        (None, None) => StageSelection::All,
    }
}

fn print_example_config() {
    let example = r#"# annotator configuration file

[service]
# Ollama host, with or without scheme
host = "http://localhost"
port = 11434
model = "llama3.1:8b"
timeout_secs = 120

[sampling]
seed = 42
temperature = 0.0

[workers]
size = 4
save_interval = 50
max_retries = 5
# Jittered exponential backoff between attempts (0 disables)
backoff_base_ms = 250
backoff_max_ms = 10000

[self_consistency]
# Classify each document several times and keep the majority label
enabled = false
samples = 5

[data]
# Relative to the data root (--data-path or DATA_PATH)
dataset = "reddit/comments.json"
# out_filename = "comments_processed.json"
# run_id = "0"  # or RUN_ID

[prompts]
# Relative to this file
hate = "prompts/hate.json"
dehumanizing = "prompts/dehumanizing.json"
stigmatizing = "prompts/stigmatizing.json"
stereotyping = "prompts/stereotyping.json"
simplifying = "prompts/simplifying.json"
othering = "prompts/othering.json"

[cascade]
screen_label = "hate"
forward_label = "other"
"#;
    println!("{example}");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Example => {
            print_example_config();
            return Ok(());
        }

        Commands::Validate { overrides } => {
            let config = load_config(&cli.config, overrides)?;

            let client = OllamaClient::from_config(&config.service)?;
            let layout = StageLayout::new(&config)?;

            for stage in layout.stages() {
                let prompt = PromptData::from_file(&stage.prompt_file)?;
                info!(
                    stage = %stage.name,
                    demos = prompt.demos.len(),
                    "Prompt definition loaded"
                );
            }

            let dataset = config.dataset_path()?;
            let corpus = DocumentStore::load(&dataset)
                .with_context(|| format!("Failed to load corpus {dataset:?}"))?;

            let health = client.health_check().await;
            if let Some(error) = &health.error {
                warn!(endpoint = %health.endpoint, status = %health.status, error = %error, "Service check failed");
            }

            info!("Configuration is valid");
            info!("  Corpus: {} documents", corpus.len());
            info!("  Model: {} at {}", config.service.model, client.base_url());
            info!("  Service: {}", health.status);
            info!(
                "  Workers: {}, checkpoint every {} documents",
                config.workers.size, config.workers.save_interval
            );
            if let Some(samples) = config.self_consistency.samples() {
                info!("  Self-consistency: {samples} samples per document");
            }
            info!("  Results: {:?}", config.results_dir()?);

            if health.status != HealthStatus::Healthy {
                bail!("Completion service is {}", health.status);
            }
            return Ok(());
        }

        Commands::Status { overrides } => {
            let config = load_config(&cli.config, overrides)?;
            let layout = StageLayout::new(&config)?;

            println!("\n=== Stage Status ===");
            for status in layout.status()? {
                let stats = &status.stats;
                if !status.exists {
                    println!("{:<14} no checkpoint", stats.stage);
                    continue;
                }
                println!(
                    "{:<14} {:>7}/{:<7} annotated {:>7}  failed {:>5}  {:?}",
                    stats.stage,
                    stats.already_done,
                    stats.total_documents,
                    stats.annotated,
                    stats.failed,
                    status.checkpoint
                );
            }
        }

        Commands::Run {
            overrides,
            from,
            only,
        } => {
            let config = load_config(&cli.config, overrides)?;
            let results_dir = config.results_dir()?;
            let client = Arc::new(OllamaClient::from_config(&config.service)?);
            let pipeline = StagePipeline::new(config, client.clone())?;

            let report = pipeline.run(&selection(from, only)).await?;

            println!("\n=== Annotation Complete ===");
            for stats in &report.stages {
                println!("--- {} ---", stats.stage);
                println!("Documents:   {}", stats.total_documents);
                println!("Resumed:     {}", stats.already_done);
                println!("Processed:   {}", stats.processed);
                println!("Annotated:   {}", stats.annotated);
                println!("Failed:      {}", stats.failed);
                for (label, count) in &stats.labels {
                    println!("  {label:<18} {count}");
                }
                if let Some(forwarded) = stats.forwarded {
                    println!("Forwarded:   {forwarded}");
                }
                println!("Throughput:  {:.0}/hr", stats.throughput_per_hour);
            }
            let (prompt_tokens, completion_tokens) = client.total_tokens();
            println!("---");
            println!("Requests:    {}", client.total_requests());
            println!("Tokens:      {prompt_tokens} in / {completion_tokens} out");
            println!("Runtime:     {:.1}s", report.runtime_secs);
            println!("Output:      {results_dir:?}");
        }
    }

    Ok(())
}
