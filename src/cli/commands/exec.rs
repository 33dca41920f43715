//! Exec command implementation
//!
//! Runs a command some extension registered. Arguments are parsed as JSON
//! where possible and passed as strings otherwise.

use anyhow::Result;
use clap::Args;
use serde_json::Value;

use crate::app::App;
use crate::models::{Environment, ExtensionDescriptor};

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command name (e.g. sample.echo)
    pub command: String,

    /// Command arguments
    pub arguments: Vec<String>,

    /// Extension to start (repeatable)
    #[arg(long = "extension", short = 'e', default_value = "hover")]
    pub extensions: Vec<String>,
}

fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub async fn execute(args: ExecArgs, app: &App) -> Result<()> {
    let environment = Environment::default()
        .with_extensions(args.extensions.iter().cloned().map(ExtensionDescriptor::new));
    let controller = app.start_host(environment).await?;

    let arguments = args.arguments.iter().map(|raw| parse_argument(raw)).collect();
    let result = controller.execute_command(&args.command, arguments).await;
    controller.shutdown().await;

    match result {
        Ok(value) => app.output.print_success(value),
        Err(e) => app.output.print_error(&e.to_string()),
    }
    Ok(())
}
