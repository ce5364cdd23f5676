use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use op_guardian::config::GuardianConfig;
use op_guardian::{api, AppState};

#[derive(Parser)]
#[command(name = "guardian", about = "OpenPalm signed-channel trust boundary")]
struct Cli {
    /// Path to the guardian TOML config file.
    #[arg(long, env = "OPENPALM_GUARDIAN_CONFIG", default_value = "guardian.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the guardian HTTP server (default).
    Serve,
    /// Validate configuration without starting the server.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = GuardianConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Doctor => {
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let has_errors = issues
                .iter()
                .any(|i| i.severity == op_guardian::config::ConfigSeverity::Error);
            if has_errors {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve => serve(config).await,
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,op_guardian=debug")),
        )
        .json()
        .init();
}

async fn serve(config: GuardianConfig) -> anyhow::Result<()> {
    init_tracing();

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            op_guardian::config::ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            op_guardian::config::ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues
        .iter()
        .any(|i| i.severity == op_guardian::config::ConfigSeverity::Error)
    {
        anyhow::bail!("guardian config validation failed");
    }

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(%addr, "guardian starting");

    let state = AppState::new(config)?;
    let app = api::router(state).fallback(api::not_found);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
