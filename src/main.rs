use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cueso::Config;
use cueso::api::{self, AppState};
use cueso::core::roku::RokuClient;
use cueso::core::search::BraveSearchClient;
use cueso::core::session::{GenerationDefaults, SessionDriver, SessionStore};
use cueso::core::tools::{RemoteExecutor, RokuExecutor, ToolExecutor, ToolRegistry};

/// Conversational control plane for Roku devices.
#[derive(Debug, Parser)]
#[command(name = "cueso", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "cueso.toml")]
    config: PathBuf,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "cueso=info,chat_core=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = if cli.config.exists() {
        Config::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        Config::default()
    };

    let provider = config.create_provider()?;
    tracing::info!(provider = provider.name(), model = %config.llm.model, "provider ready");

    let roku = RokuClient::new(&config.roku.ip);
    let search = config.search_api_key().map(BraveSearchClient::new);
    if search.is_none() {
        tracing::warn!(
            env = %config.search.api_key_env,
            "no search API key; find_content and web_search will report errors"
        );
    }

    let direct: Arc<dyn ToolExecutor> = Arc::new(RokuExecutor::new(
        roku,
        search,
        &config.search.streaming,
        config.tool_timeout(),
    ));

    let mut executors = vec![direct];
    if !config.tools.servers.is_empty() {
        let remote = RemoteExecutor::discover(&config.tools.servers, config.tool_timeout()).await;
        executors.push(Arc::new(remote));
    }

    let pause_after = config.tools.pause_after.iter().cloned().collect();
    let registry = Arc::new(ToolRegistry::new(
        executors,
        &config.tools.expose,
        &pause_after,
    ));

    let driver = Arc::new(SessionDriver::new(
        provider,
        registry,
        GenerationDefaults {
            model: config.llm.model.clone(),
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        },
    ));

    let store = Arc::new(SessionStore::new(
        config.chat.max_sessions,
        config.session_ttl(),
        config.session_defaults(),
    ));

    let state = Arc::new(AppState {
        store,
        driver,
        allowed_origins: config.server.allowed_origins.clone(),
    });

    let host = cli.host.unwrap_or_else(|| config.server.host.clone());
    let port = cli.port.unwrap_or(config.server.port);
    api::serve(state, &host, port).await
}
