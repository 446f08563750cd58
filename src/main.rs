use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use divergente::{
    cli::{execute_command, Cli},
    config::{Config, LogFormat},
    App,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Divergente starting...");

    let mut app = match App::open(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Failed to initialize application");
            return Err(e.into());
        }
    };

    match app.auth.restore().await {
        Ok(Some(user)) => info!(user_id = %user.id, "Session restored"),
        Ok(None) => info!("No stored session"),
        Err(e) => warn!(error = %e, "Failed to restore session"),
    }

    let result = execute_command(cli.command, &mut app).await;

    if let Err(e) = app.flush().await {
        warn!(error = %e, "Final outbox flush failed");
    }

    if result.exit_code == 0 {
        println!("{}", result.message);
    } else {
        eprintln!("{}", result.message);
    }
    std::process::exit(result.exit_code);
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
