use a3s_http_service::config::{ListenSocket, ServiceConfig};
use a3s_http_service::{handler_fn, HttpService, ServiceError};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// A3S HTTP: serve declared endpoints from an HCL file
#[derive(Parser)]
#[command(name = "a3s-http", version, about)]
struct Cli {
    /// Path to configuration file (.hcl)
    #[arg(short, long, default_value = "service.hcl")]
    config: String,

    /// Override the listen port
    #[arg(short, long)]
    listen: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file without starting the service
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, default_value = "service.hcl")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> a3s_http_service::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Validate { config: config_path }) = &cli.command {
        return validate_config(config_path).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("A3S HTTP v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if std::path::Path::new(&cli.config).exists() {
        tracing::info!(config = cli.config, "Loading configuration");
        ServiceConfig::from_file(&cli.config).await?
    } else {
        tracing::warn!("Config file not found, using defaults");
        ServiceConfig::default()
    };

    if let Some(port) = cli.listen {
        config.listen.url = None;
        config.listen.socket = Some(ListenSocket::Port(port));
    }
    if config.listen.socket().is_none() {
        config.listen.socket = Some(ListenSocket::Port(8080));
    }

    let service = HttpService::new(config)?;
    register_builtin_handlers(&service)?;
    service.start().await?;

    tracing::info!("Service ready, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    service.stop().await
}

/// Handlers available to declarations via `connected = "<name>"`
fn register_builtin_handlers(service: &HttpService) -> a3s_http_service::Result<()> {
    service.register_handler("echo", handler_fn(|message| async move { Ok(Some(message)) }))?;
    service.register_handler(
        "ok",
        handler_fn(|message| async move {
            let text = match message {
                Value::String(s) => s,
                other => other.to_string(),
            };
            Ok(Some(Value::String(format!("{} OK", text))))
        }),
    )?;
    service.register_handler(
        "fail",
        handler_fn(|_| async { Err(ServiceError::Handler("handler failed".to_string())) }),
    )?;
    Ok(())
}

/// Validate a configuration file and print diagnostics
async fn validate_config(path: &str) -> a3s_http_service::Result<()> {
    if !std::path::Path::new(path).exists() {
        eprintln!("✗ Config file not found: {}", path);
        std::process::exit(1);
    }

    let config = match ServiceConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid");
    println!();
    println!("  Service:   {}", config.name);
    if let Some(url) = config.listen.url(config.is_secure(), None) {
        println!("  Listen:    {}", url);
    }
    println!("  Endpoints: {}", config.endpoints.len());
    for (name, ep) in &config.endpoints {
        let (method, path) = ep.resolve(name);
        let kind = if ep.ws { "WS".to_string() } else { method };
        let chain: Vec<&str> = ep
            .interceptors
            .iter()
            .map(|i| i.interceptor_type.as_str())
            .collect();
        println!(
            "    - {} {} → {} [{}]",
            kind,
            path,
            ep.connected.as_deref().unwrap_or("-"),
            chain.join(", ")
        );
    }
    if config.jwt.is_some() {
        println!("  JWT:       configured");
    }

    Ok(())
}
