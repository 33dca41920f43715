//! Hover command implementation
//!
//! Hover information for a position, from every extension that provides it.

use anyhow::Result;
use clap::Args;

use super::DocumentArgs;
use crate::app::App;
use crate::infra::rpc::protocol::TextDocumentPositionParams;

#[derive(Args, Debug)]
pub struct HoverArgs {
    #[command(flatten)]
    pub document: DocumentArgs,

    /// Zero-based line
    #[arg(long)]
    pub line: u32,

    /// Zero-based character offset
    #[arg(long)]
    pub character: u32,
}

pub async fn execute(args: HoverArgs, app: &App) -> Result<()> {
    let environment = args.document.environment(&["hover"]);
    let controller = app.start_host(environment).await?;

    let params =
        TextDocumentPositionParams::new(args.document.uri.clone(), args.line, args.character);
    let hover = controller.hover(params).await;
    controller.shutdown().await;

    app.output.print_success(hover);
    Ok(())
}
