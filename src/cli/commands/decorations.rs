//! Decorations command implementation

use anyhow::Result;
use clap::Args;

use super::DocumentArgs;
use crate::app::App;
use crate::infra::rpc::protocol::TextDocumentDecorationParams;

#[derive(Args, Debug)]
pub struct DecorationsArgs {
    #[command(flatten)]
    pub document: DocumentArgs,
}

pub async fn execute(args: DecorationsArgs, app: &App) -> Result<()> {
    let environment = args.document.environment(&["line-colors"]);
    let controller = app.start_host(environment).await?;

    let decorations = controller
        .decorations(TextDocumentDecorationParams::new(args.document.uri.clone()))
        .await;
    controller.shutdown().await;

    app.output.print_success(decorations);
    Ok(())
}
