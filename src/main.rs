//! exthost - extension host CLI
//!
//! Starts extension processes, gathers their provider registrations and
//! answers hover, decoration and command queries with merged results.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use exthost::app::App;
use exthost::cli::{Cli, Commands};

fn main() {
    // Logs go to stderr: stdout carries JSON output, or the wire protocol
    // when running as an extension. Use RUST_LOG=exthost=debug for detail.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "exthost=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!(
                r#"{{"success":false,"error":"Failed to create runtime: {}"}}"#,
                e
            );
            std::process::exit(1);
        }
    };

    // An extension's stdout belongs to the protocol
    let command = match cli.command {
        Commands::Extension(args) => {
            let result = runtime.block_on(exthost::cli::commands::extension::execute(args));
            // A blocking stdin read may still be parked; do not wait for it
            runtime.shutdown_timeout(std::time::Duration::from_millis(100));
            if let Err(e) = result {
                tracing::error!("{}", e);
                std::process::exit(2);
            }
            return;
        }
        command => command,
    };

    if let Err(e) = runtime.block_on(async_main(command)) {
        let response = serde_json::json!({
            "success": false,
            "error": e.to_string()
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&response)
                .unwrap_or_else(|_| format!(r#"{{"success":false,"error":"{}"}}"#, e))
        );
        std::process::exit(2);
    }
}

async fn async_main(command: Commands) -> anyhow::Result<()> {
    let app = App::new()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;

    execute_command(command, &app).await
}

async fn execute_command(command: Commands, app: &App) -> anyhow::Result<()> {
    use exthost::cli::commands;

    match command {
        Commands::Hover(args) => commands::hover::execute(args, app).await,
        Commands::Decorations(args) => commands::decorations::execute(args, app).await,
        Commands::Exec(args) => commands::exec::execute(args, app).await,
        Commands::Config(args) => commands::config::execute(args, app).await,
        Commands::Extension(args) => commands::extension::execute(args).await,
    }
}
