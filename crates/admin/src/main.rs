use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use op_control::admin::{AdminConfig, AppState, ConfigSeverity};
use op_control::{channels, snapshot};

#[derive(Parser)]
#[command(name = "admin", about = "OpenPalm control-plane admin API")]
struct Cli {
    /// Path to the admin TOML config file.
    #[arg(long, env = "OPENPALM_ADMIN_CONFIG", default_value = "admin.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the admin HTTP server (default).
    Serve,
    /// Validate configuration without starting the server.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AdminConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Doctor => {
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            let has_errors = issues.iter().any(|i| i.severity == ConfigSeverity::Error);
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
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,op_control=debug")))
        .json()
        .init();
}

async fn serve(config: AdminConfig) -> anyhow::Result<()> {
    init_tracing();

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!("admin config validation failed");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state_dir = config.state_dir.clone();
    let config_dir = config.config_dir.clone();

    // Startup recovery (spec §4.5 "Recovery", §4.6 "Startup recovery"): a
    // crash between staging and swap, or between intent and clear-backup,
    // must never leave the process permanently in a half-applied state.
    snapshot::cleanup_stale_pending(&state_dir)?;
    let restored = channels::cleanup_stale_config_backups(&state_dir, &config_dir)?;
    for channel in &restored {
        tracing::warn!(channel = %channel, "restored stale uninstall backup on startup");
    }

    tracing::info!(%addr, "admin control plane starting");

    let state = AppState::new(config)?;
    let app = axum::Router::new().nest("/admin", op_control::admin::router(state));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
