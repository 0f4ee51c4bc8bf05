//! Devserver Binary
//!
//! Serves the editor front end over a WebSocket on localhost.
//!
//! # Usage
//!
//! ```bash
//! bedrock-devserver
//! bedrock-devserver --port 5678 --host 127.0.0.1
//! bedrock-devserver --config ./devserver.toml --compiler ./target/release/mcc
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use bedrock_devserver::compiler::ExternalCompiler;
use bedrock_devserver::config::ServerConfig;
use bedrock_devserver::desktop::{SystemOpener, ZenityDialog};
use bedrock_devserver::error::ServerError;
use bedrock_devserver::socket_server::{Dispatcher, Listener};

/// Bedrock compiler devserver
#[derive(Parser, Debug)]
#[command(name = "bedrock-devserver")]
#[command(about = "WebSocket devserver for the Bedrock compiler editor")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides config)
    #[arg(short, long, env = "BEDROCK_DEVSERVER_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Config file (default: <config dir>/bedrock-devserver/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compiler executable (overrides config)
    #[arg(long)]
    compiler: Option<String>,
}

fn load_config(args: &Args) -> Result<ServerConfig, ServerError> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load_from(path)?,
        None => ServerConfig::load()?,
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(compiler) = &args.compiler {
        config.compiler.command = compiler.clone();
    }
    Ok(config)
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let directive = format!("bedrock_devserver={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .init();
    Ok(())
}

fn run(config: ServerConfig) -> Result<(), ServerError> {
    let compiler = Arc::new(ExternalCompiler::from_config(&config.compiler));
    let dialog = Arc::new(ZenityDialog::detect());
    let dispatcher = Dispatcher::new(compiler, dialog, Arc::new(SystemOpener)).with_config(&config);

    let listener = Listener::bind(
        config.bind_address(),
        dispatcher,
        config.server.max_payload_size,
    )?;
    tracing::info!("Compiler: {}", config.compiler.command);
    tracing::info!("Connect the editor to start");
    listener.run()
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bedrock-devserver: {}", e);
            return Ok(e.exit_code());
        }
    };
    init_logging(&config.logging.level)?;

    match run(config) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            tracing::error!("{}", e);
            Ok(e.exit_code())
        }
    }
}
