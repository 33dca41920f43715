//! Config command implementation

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;

use crate::app::App;
use crate::models::config::ExtHostConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Initialize configuration file
    Init {
        /// Initialize global config (~/.config/exthost)
        #[arg(long)]
        global: bool,

        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Show {
        /// Show global config only
        #[arg(long)]
        global: bool,
    },

    /// Show config file path
    Path {
        /// Show global config path
        #[arg(long)]
        global: bool,
    },
}

#[derive(Serialize)]
struct ConfigInitResponse {
    status: &'static str,
    path: String,
    level: &'static str,
}

#[derive(Serialize)]
struct ConfigShowResponse<'a> {
    level: &'static str,
    config: &'a ExtHostConfig,
}

#[derive(Serialize)]
struct ConfigPathResponse {
    level: &'static str,
    path: String,
    exists: bool,
}

fn level(global: bool, project: &'static str) -> &'static str {
    if global { "global" } else { project }
}

pub async fn execute(args: ConfigArgs, app: &App) -> Result<()> {
    let ctx = &app.output;

    match args.command {
        ConfigCommand::Init { global, force } => match app.config_service.init(global, force).await
        {
            Ok(path) => ctx.print_success(ConfigInitResponse {
                status: "created",
                path: path.display().to_string(),
                level: level(global, "project"),
            }),
            Err(e) => ctx.print_error(&e.to_string()),
        },

        ConfigCommand::Show { global } => match app.config_service.load(global).await {
            Ok(config) => ctx.print_success(ConfigShowResponse {
                level: level(global, "merged"),
                config: &config,
            }),
            Err(e) => ctx.print_error(&e.to_string()),
        },

        ConfigCommand::Path { global } => {
            let path = app.config_service.config_path(global);
            ctx.print_success(ConfigPathResponse {
                level: level(global, "project"),
                exists: path.exists(),
                path: path.display().to_string(),
            });
        }
    }

    Ok(())
}
