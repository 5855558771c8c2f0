use std::{path::PathBuf, process::ExitCode, sync::Arc};

use automcp::{
    config::Config,
    hooks::ServerHook,
    server::{GatewayServer, PromptRegistry},
    session::SessionStore,
};
use automcp_platform::PlatformClient;
use clap::{Parser, ValueEnum};
use rmcp::{
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    },
    ServiceExt,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "automcp", version, about = "MCP gateway for the automation platform")]
struct Cli {
    /// Configuration file (JSON or YAML).
    #[arg(long, env = "AUTOMCP_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "stdio")]
    transport: Transport,

    /// Listen address for the HTTP transport.
    #[arg(long, default_value = "127.0.0.1:8385")]
    listen: String,

    /// Platform API base URL (overrides config).
    #[arg(long)]
    api_url: Option<String>,

    /// Platform API key (overrides config).
    #[arg(long, env = "AUTOMCP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Require an authenticated session on every call.
    #[arg(long)]
    require_auth: bool,

    /// Register the platform mutation tools.
    #[arg(long)]
    allow_platform_apis: bool,

    /// Validate executions against the platform policy engine.
    #[arg(long)]
    enforce_policies: bool,

    /// Log as JSON instead of human-readable lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Runtime flags sit at the top of the precedence chain.
    fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(key) = &self.api_key {
            config.api_key = Some(key.clone());
        }
        if self.require_auth {
            config.require_auth = true;
        }
        if self.allow_platform_apis {
            config.capabilities.allow_platform_apis = true;
        }
        if self.enforce_policies {
            config.capabilities.enable_opa_policies = true;
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal startup error");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    let platform = PlatformClient::new(&config.api_url, config.api_key.clone())?;
    let prompts = Arc::new(PromptRegistry::new());
    let extra_hooks: Vec<Arc<dyn ServerHook>> = Vec::new();

    info!(
        server = %config.server_name,
        version = %config.server_version,
        api_url = %config.api_url,
        whitelist_mode = config.whitelist_mode(),
        "Starting MCP gateway"
    );

    let server = GatewayServer::new(config, platform, prompts, extra_hooks, None);
    let sweeper = SessionStore::spawn_sweeper(server.sessions().clone());
    server.hooks().on_server_start();

    let result = match cli.transport {
        Transport::Stdio => serve_stdio(server.clone()).await,
        Transport::Http => serve_http(server.clone(), &cli.listen).await,
    };

    server.hooks().on_server_stop();
    sweeper.abort();
    result
}

async fn serve_stdio(server: GatewayServer) -> anyhow::Result<()> {
    info!("Serving MCP over stdio");
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

async fn serve_http(server: GatewayServer, listen: &str) -> anyhow::Result<()> {
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        Default::default(),
    );
    let router = axum::Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(%listen, "Serving MCP over streamable HTTP");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
