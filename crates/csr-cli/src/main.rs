//! `csr`: review instructional content against a standards rule set.
//!
//! ## Commands
//!
//! - `review`: run one review over a file or stdin
//! - `standards`: list loaded rule sets
//! - `health`: standards count and backend liveness
//! - `config`: effective settings, secrets masked

mod display;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use csr_core::{PolicyConfig, PromptsConfig, RequestOptions, ReviewRequest, Strictness};
use csr_engine::{EngineSettings, ReviewEngine};
use csr_model::{ClientConfig, ModelClient};
use csr_store::RuleStore;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "csr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Content standards reviewer", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

/// Process settings. Every flag falls back to a `CSR_*` environment variable.
#[derive(Args, Debug, Clone)]
struct Settings {
    /// OpenAI-compatible API base URL
    #[arg(long, env = "CSR_BASE_URL", default_value = "http://localhost:11435/v1", global = true)]
    base_url: String,

    /// Model identifier sent to the backend
    #[arg(long, env = "CSR_MODEL_ID", default_value = "llama3", global = true)]
    model_id: String,

    /// Backend API key (sent as a bearer token)
    #[arg(long, env = "CSR_API_KEY", default_value = "ollama", global = true, hide_env_values = true)]
    api_key: String,

    /// Backend call timeout in seconds
    #[arg(long, env = "CSR_MODEL_TIMEOUT", default_value_t = 30, global = true)]
    model_timeout: u64,

    /// Sampling temperature
    #[arg(long, env = "CSR_TEMPERATURE", default_value_t = 0.1, global = true)]
    temperature: f32,

    /// Request JSON-object replies from the backend
    #[arg(long, env = "CSR_JSON_MODE", default_value_t = true, action = ArgAction::Set, global = true)]
    json_mode: bool,

    /// Directory of standards JSON files
    #[arg(long, env = "CSR_STANDARDS_DIR", default_value = "standards", global = true)]
    standards_dir: PathBuf,

    /// Maximum content length in characters
    #[arg(long, env = "CSR_MAX_CONTENT_LENGTH", default_value_t = 50_000, global = true)]
    max_content_length: usize,

    /// Version tag reported with every response
    #[arg(long, env = "CSR_POLICY_VERSION", default_value = "1.0.0", global = true)]
    policy_version: String,

    /// Policy YAML (retrieval k, thresholds, defaults)
    #[arg(long, env = "CSR_POLICY_CONFIG_PATH", default_value = "config/policy.yaml", global = true)]
    policy_config: PathBuf,

    /// Prompt templates YAML (built-in prompts when absent)
    #[arg(long, env = "CSR_PROMPTS_CONFIG_PATH", default_value = "config/prompts.yaml", global = true)]
    prompts_config: PathBuf,

    /// One backend call per retrieved rule
    #[arg(long, env = "CSR_SINGLE_RULE_MODE", action = ArgAction::SetTrue, global = true)]
    single_rule_mode: bool,

    /// Concurrent backend calls per review in single-rule mode
    #[arg(long, env = "CSR_MAX_CONCURRENT_CALLS", default_value_t = 4, global = true)]
    max_concurrent_calls: usize,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "CSR_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Emit JSON-formatted log lines
    #[arg(long, env = "CSR_LOG_JSON", action = ArgAction::SetTrue, global = true)]
    log_json: bool,
}

impl Settings {
    fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout)
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            model_id: self.model_id.clone(),
            api_key: self.api_key.clone(),
            temperature: self.temperature,
            json_mode: self.json_mode,
        }
    }

    fn engine_settings(&self, prompts: PromptsConfig) -> EngineSettings {
        EngineSettings {
            max_content_length: self.max_content_length,
            policy_version: self.policy_version.clone(),
            single_rule_mode: self.single_rule_mode,
            model_timeout: self.model_timeout(),
            max_concurrent_calls: self.max_concurrent_calls,
            prompts,
        }
    }

    fn pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("base_url", self.base_url.clone()),
            ("model_id", self.model_id.clone()),
            ("api_key", self.api_key.clone()),
            ("model_timeout", format!("{}s", self.model_timeout)),
            ("temperature", self.temperature.to_string()),
            ("json_mode", self.json_mode.to_string()),
            ("standards_dir", self.standards_dir.display().to_string()),
            ("max_content_length", self.max_content_length.to_string()),
            ("policy_version", self.policy_version.clone()),
            ("policy_config", self.policy_config.display().to_string()),
            ("prompts_config", self.prompts_config.display().to_string()),
            ("single_rule_mode", self.single_rule_mode.to_string()),
            ("max_concurrent_calls", self.max_concurrent_calls.to_string()),
            ("log_level", self.log_level.clone()),
            ("log_json", self.log_json.to_string()),
        ]
    }
}

#[derive(Subcommand)]
enum Command {
    /// Review content against a standards set
    Review {
        /// Standards set id
        #[arg(short, long)]
        standards: String,

        /// Content file (default: stdin)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// low, medium or high
        #[arg(long, default_value = "medium")]
        strictness: Strictness,

        /// Caller-supplied request id (generated when omitted)
        #[arg(long)]
        request_id: Option<String>,

        /// Maximum observations returned (default from policy config)
        #[arg(long)]
        max_observations: Option<usize>,

        /// Confidence floor (default from policy config)
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Omit rationale from observations
        #[arg(long)]
        no_rationale: bool,

        /// Omit standard excerpts from observations
        #[arg(long)]
        no_excerpts: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// List loaded standards sets
    Standards,

    /// Report standards count and probe the backend
    Health,

    /// Print effective settings with secrets masked
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Cards,
}

/// Initialise the global subscriber: `RUST_LOG` wins, else `level`.
fn init_tracing(json: bool, level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout stays machine-readable.
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.settings.log_json, &cli.settings.log_level);
    info!(version = env!("CARGO_PKG_VERSION"), "csr starting");

    let settings = cli.settings;
    match cli.command {
        Command::Review {
            standards,
            file,
            strictness,
            request_id,
            max_observations,
            min_confidence,
            no_rationale,
            no_excerpts,
            format,
        } => {
            let policy = load_policy(&settings.policy_config)?;
            let options = RequestOptions {
                return_rationale: no_rationale.then_some(false),
                return_excerpts: no_excerpts.then_some(false),
                max_observations,
                min_confidence,
            };
            let content = read_content(file.as_deref())?;

            let mut request = ReviewRequest::new(content.clone(), standards)
                .with_strictness(strictness)
                .with_options(options);
            request.request_id = request_id;

            let client = Arc::new(ModelClient::new(settings.client_config()));
            let engine = build_engine(&settings, policy, client)?;

            let outcome = tokio::select! {
                outcome = engine.review(request) => outcome,
                _ = tokio::signal::ctrl_c() => {
                    warn!("interrupted, abandoning in-flight backend calls");
                    return Ok(ExitCode::from(130));
                }
            };

            match outcome {
                Ok(resp) => {
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&resp)?);
                        }
                        OutputFormat::Cards => display::print_review_cards(&resp, &content),
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    let body = serde_json::json!({ "code": e.code(), "message": e.to_string() });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    Ok(ExitCode::from(2))
                }
            }
        }

        Command::Standards => {
            let store = RuleStore::load_dir(&settings.standards_dir);
            let infos = store.infos();
            println!("{}", serde_json::to_string_pretty(&infos)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Health => {
            let policy = load_policy(&settings.policy_config)?;
            let client = Arc::new(ModelClient::new(settings.client_config()));
            let engine = build_engine(&settings, policy, client.clone())?;

            let reachable = client.probe(settings.model_timeout()).await;
            let standards_loaded = engine.list_standards().len();
            let status = if reachable && standards_loaded > 0 {
                "ok"
            } else {
                "degraded"
            };
            let body = serde_json::json!({
                "status": status,
                "version": env!("CARGO_PKG_VERSION"),
                "standards_loaded": standards_loaded,
                "backend_healthy": engine.backend_healthy(),
                "model_id": settings.model_id,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(if status == "ok" {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }

        Command::Config => {
            display::print_settings(&settings.pairs());
            let policy = load_policy(&settings.policy_config)?;
            println!();
            println!("Policy");
            println!("{}", serde_json::to_string_pretty(&policy)?);
            let prompts = load_prompts(&settings.prompts_config)?;
            println!();
            println!("Prompts");
            println!("{}", serde_json::to_string_pretty(&prompts)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_policy(path: &Path) -> Result<PolicyConfig> {
    PolicyConfig::load(path).with_context(|| format!("loading policy config {}", path.display()))
}

fn load_prompts(path: &Path) -> Result<PromptsConfig> {
    PromptsConfig::load(path).with_context(|| format!("loading prompt templates {}", path.display()))
}

fn build_engine(
    settings: &Settings,
    policy: PolicyConfig,
    client: Arc<ModelClient>,
) -> Result<ReviewEngine> {
    let prompts = load_prompts(&settings.prompts_config)?;
    let store = RuleStore::load_dir(&settings.standards_dir);
    Ok(ReviewEngine::new(
        &store,
        client,
        policy,
        settings.engine_settings(prompts),
    ))
}

fn read_content(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading content from {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading content from stdin")?;
            Ok(buf)
        }
    }
}
