//! Extension command implementation
//!
//! Runs a built-in extension with the wire protocol on stdin/stdout. Used
//! by the host commands, which spawn `exthost extension <NAME>`.

use anyhow::Result;
use clap::Args;

use crate::extension::samples;
use crate::infra::rpc::MessageTransports;

#[derive(Args, Debug)]
pub struct ExtensionArgs {
    /// Extension name (line-colors, hover)
    pub name: String,
}

pub async fn execute(args: ExtensionArgs) -> Result<()> {
    tracing::debug!("Running extension '{}'", args.name);
    samples::run(&args.name, MessageTransports::stdio()).await?;
    Ok(())
}
