//! Built-in sample extensions
//!
//! - `line-colors`: speaks the protocol directly and declares a static
//!   decoration capability, so the host decorates every document with it
//!   without any registration.
//! - `hover`: uses [`ExtensionHost`] to register a hover provider on `*`
//!   and an echo command.

use std::sync::{Arc, Weak};

use serde_json::Value;

use super::host::ExtensionHost;
use crate::error::{ClientError, HostResult, ProviderError};
use crate::infra::rpc::protocol::{
    DecorationProviderOptions, InitializeResult, ServerCapabilities, TextDocumentDecorationParams,
    TextDocumentPositionParams,
};
use crate::infra::rpc::{Connection, ConnectionOptions, MessageTransports, Method, ResponseError};
use crate::models::{DocumentSelector, Hover, MarkupContent, TextDocument, TextDocumentDecoration};

pub const SAMPLES: [&str; 2] = ["line-colors", "hover"];

const LINE_COLORS: [&str; 4] = ["cyan", "magenta", "yellow", "black"];

/// Run a sample extension until the host disconnects
pub async fn run(name: &str, transports: MessageTransports) -> HostResult<()> {
    match name {
        "line-colors" => line_colors(transports).await,
        "hover" => hover(transports).await,
        other => Err(ClientError::Start {
            extension: other.to_string(),
            reason: format!("unknown sample extension (available: {})", SAMPLES.join(", ")),
        }
        .into()),
    }
}

pub fn line_color_decorations() -> Vec<TextDocumentDecoration> {
    LINE_COLORS
        .iter()
        .zip(0u32..)
        .map(|(color, line)| TextDocumentDecoration::whole_line(line, *color))
        .collect()
}

async fn line_colors(transports: MessageTransports) -> HostResult<()> {
    let (connection, _) =
        Connection::from_transports("line-colors", transports, ConnectionOptions::default());

    connection
        .on_request(Method::Initialize, |_: Value| async {
            Ok::<_, ResponseError>(InitializeResult {
                capabilities: ServerCapabilities {
                    decoration_provider: Some(DecorationProviderOptions { is_static: true }),
                    ..Default::default()
                },
            })
        })
        .await;

    connection
        .on_request(Method::Decoration, |_: TextDocumentDecorationParams| async {
            Ok::<_, ResponseError>(Some(line_color_decorations()))
        })
        .await;

    connection
        .on_request(Method::Shutdown, |_: Value| async {
            Ok::<_, ResponseError>(Value::Null)
        })
        .await;

    let weak: Weak<Connection> = Arc::downgrade(&connection);
    connection
        .on_notification(Method::Exit, move |_: Value| {
            let weak = Weak::clone(&weak);
            async move {
                if let Some(connection) = weak.upgrade() {
                    connection.close().await;
                }
            }
        })
        .await;

    connection.listen().await?;
    connection.closed().await;
    Ok(())
}

async fn hover(transports: MessageTransports) -> HostResult<()> {
    let host = ExtensionHost::new(transports).await;

    // Registered before listening, so the host has them before `initialize`
    // is answered
    let _hover = host
        .register_hover_provider(
            DocumentSelector::all(),
            Arc::new(|document: TextDocument, params: TextDocumentPositionParams| async move {
                Ok::<_, ProviderError>(Some(describe(&document, &params)))
            }),
        )
        .await?;
    let _echo = host
        .register_command(
            "sample.echo",
            Arc::new(|arguments: Vec<Value>| async move {
                Ok::<_, ProviderError>(Value::Array(arguments))
            }),
        )
        .await?;

    host.listen().await?;
    host.closed().await;
    Ok(())
}

fn describe(document: &TextDocument, params: &TextDocumentPositionParams) -> Hover {
    let language = document.language_id.as_deref().unwrap_or("plaintext");
    Hover::new(MarkupContent::markdown(format!(
        "**{}** `{}` at {}:{}",
        language, document.uri, params.position.line, params.position.character
    )))
}
