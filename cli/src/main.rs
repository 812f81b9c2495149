//! FuzzLSP binary: wires configuration, the chosen backend and the language
//! server together and serves the protocol on stdin/stdout.
//!
//! ```text
//! flags + config.toml -> Settings -> LlmBackend::start()
//!                                        |
//!                                        v
//!                  Handlers(store, analyzer, transport=stdout) -> Server::run(stdin)
//! ```
//!
//! stdout carries protocol frames only; logs go to a file (or stderr).

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fuzz_config::{FuzzConfig, Overrides, Settings, config_path};
use fuzz_lsp::completion::DEFAULT_COMPLETION_PROMPT;
use fuzz_lsp::{AnalysisOptions, Handlers, RetryPrompt, Server, ServerOptions, Transport};
use fuzz_providers::{DEFAULT_ANALYSIS_PROMPT, LlmBackend, LlmOptions};
use fuzz_types::{Backend, BackendKind};

#[derive(Debug, Parser)]
#[command(name = "fuzzlsp", version, about)]
struct Args {
    /// Text-generation backend: ollama or openai.
    #[arg(long, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// File holding the analysis system prompt.
    #[arg(long, value_name = "PATH")]
    prompt_file: Option<PathBuf>,

    /// File holding the instruction sent when analysis output is malformed.
    #[arg(long, value_name = "PATH")]
    retry_prompt_file: Option<PathBuf>,

    /// Check that the backend is reachable before serving.
    #[arg(long)]
    connect_test: bool,

    #[arg(long)]
    model: Option<String>,

    /// Configuration file (default: ~/.fuzzlsp/config.toml).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            backend: self.backend,
            model: self.model.clone(),
            prompt_file: self.prompt_file.clone(),
            retry_prompt_file: self.retry_prompt_file.clone(),
            connect_test: self.connect_test,
        }
    }
}

fn parse_backend(value: &str) -> Result<BackendKind, String> {
    BackendKind::parse(value).ok_or_else(|| {
        let known: Vec<&str> = BackendKind::all().iter().map(BackendKind::as_str).collect();
        format!("unknown backend '{value}' (expected one of: {})", known.join(", "))
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout is the protocol channel; stderr is the only safe fallback.
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => warnings.push(format!(
                "Failed to open log file {}: {e}",
                candidate.display()
            )),
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // ~/.fuzzlsp/logs/fuzzlsp.log
    if let Some(path) = config_path()
        && let Some(dir) = path.parent()
    {
        candidates.push(log_path_in(dir));
    }

    // ./.fuzzlsp/logs/fuzzlsp.log
    candidates.push(log_path_in(Path::new(".fuzzlsp")));

    candidates
}

fn log_path_in(dir: &Path) -> PathBuf {
    dir.join("logs").join("fuzzlsp.log")
}

fn load_settings(args: &Args) -> Result<Settings> {
    let config = match &args.config {
        Some(path) => FuzzConfig::load_from(path)?,
        None => FuzzConfig::load()?.unwrap_or_default(),
    };
    Ok(config.resolve(args.overrides())?)
}

fn llm_options(settings: &Settings) -> Result<LlmOptions> {
    let analysis_prompt = settings
        .analysis_prompt()?
        .unwrap_or_else(|| DEFAULT_ANALYSIS_PROMPT.to_string());

    Ok(LlmOptions {
        kind: settings.backend,
        model: settings.model.clone(),
        base_url: settings.base_url.clone(),
        api_key: settings.api_key.clone(),
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        connect_test: settings.connect_test,
        analysis_prompt,
        ..LlmOptions::for_kind(settings.backend)
    })
}

fn server_options(settings: &Settings) -> ServerOptions {
    ServerOptions {
        name: settings.server_name.clone(),
        completion_prompt: settings
            .completion_prompt
            .clone()
            .unwrap_or_else(|| DEFAULT_COMPLETION_PROMPT.to_string()),
        call_timeout: settings.call_timeout,
    }
}

fn analysis_options(settings: &Settings) -> AnalysisOptions {
    AnalysisOptions {
        retry_prompt: settings
            .retry_prompt_file
            .clone()
            .map(RetryPrompt::File)
            .unwrap_or_default(),
        call_timeout: settings.call_timeout,
        max_attempts: settings.max_attempts,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let settings = load_settings(&args).context("failed to load configuration")?;
    tracing::info!(
        backend = %settings.backend,
        model = %settings.model,
        timeout_secs = settings.call_timeout.as_secs(),
        "Starting FuzzLSP"
    );

    let backend: Arc<dyn Backend> = Arc::new(
        LlmBackend::new(&llm_options(&settings)?).context("failed to create backend")?,
    );
    backend
        .start()
        .await
        .with_context(|| format!("{} backend failed to start", backend.name()))?;

    let transport = Arc::new(Transport::new(tokio::io::stdout()));
    let handlers = Handlers::new(
        server_options(&settings),
        analysis_options(&settings),
        backend,
        transport,
    );

    let result = Server::new(handlers).run(tokio::io::stdin()).await;
    match &result {
        Ok(()) => tracing::info!("FuzzLSP stopped"),
        Err(e) => tracing::error!("FuzzLSP stopped: {e:#}"),
    }
    result
}
