//! End-to-end scenarios: a controller talking to in-process extensions over
//! the memory transport

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_test::{assert_err, assert_ok};

use common::{environment, sample_factory, scripted_factory, start};
use exthost::config::HostConfig;
use exthost::error::{HostError, ProviderError, RegistryError};
use exthost::extension::{ExtensionHost, ProviderRegistration};
use exthost::host::{ClientState, Controller};
use exthost::infra::rpc::protocol::{TextDocumentDecorationParams, TextDocumentPositionParams};
use exthost::models::{DocumentSelector, Hover, MarkupContent, TextDocument};
use exthost::registry::{HoverMode, HoverProvider};

const URI: &str = "file:///f";

fn hover_returning(value: &'static str) -> Arc<dyn HoverProvider> {
    Arc::new(move |_: TextDocument, _: TextDocumentPositionParams| async move {
        Ok::<_, ProviderError>(Some(Hover::new(MarkupContent::new(value))))
    })
}

async fn hover_json(controller: &Controller) -> Value {
    let hover = controller
        .hover(TextDocumentPositionParams::new(URI, 1, 2))
        .await;
    serde_json::to_value(hover).unwrap()
}

#[tokio::test]
async fn test_hover_then_unsubscribe() {
    let (tx, rx) = oneshot::channel::<ProviderRegistration>();
    let tx = std::sync::Mutex::new(Some(tx));
    let factory = scripted_factory(Duration::ZERO, move |_, host: Arc<ExtensionHost>| {
        let tx = tx.lock().unwrap().take();
        async move {
            let registration = host
                .register_hover_provider(DocumentSelector::all(), hover_returning("a"))
                .await
                .unwrap();
            if let Some(tx) = tx {
                let _ = tx.send(registration);
            }
        }
    });

    let controller = start(factory, HostConfig::default(), environment(URI, "x", &["e"])).await;
    assert_eq!(hover_json(&controller).await, json!({ "contents": [{ "value": "a" }] }));

    let registration = rx.await.unwrap();
    assert_ok!(registration.unsubscribe().await);
    assert_ok!(controller.sync().await);
    assert_eq!(hover_json(&controller).await, Value::Null);

    controller.shutdown().await;
}

#[tokio::test]
async fn test_static_decorations_without_registration() {
    let controller = start(
        sample_factory(Duration::ZERO),
        HostConfig::default(),
        environment(URI, "x", &["line-colors"]),
    )
    .await;

    let decorations = controller
        .decorations(TextDocumentDecorationParams::new(URI))
        .await;
    assert_eq!(decorations, exthost::extension::samples::line_color_decorations());

    controller.shutdown().await;
    assert!(
        controller
            .decorations(TextDocumentDecorationParams::new(URI))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn test_sample_hover_and_echo_command() {
    let controller = start(
        sample_factory(Duration::ZERO),
        HostConfig::default(),
        environment(URI, "rust", &["hover"]),
    )
    .await;

    assert_eq!(
        hover_json(&controller).await,
        json!({ "contents": [{ "kind": "markdown", "value": "**rust** `file:///f` at 1:2" }] })
    );

    let echoed = controller
        .execute_command("sample.echo", vec![json!(1), json!("x")])
        .await;
    assert_eq!(assert_ok!(echoed), json!([1, "x"]));

    let missing = controller.execute_command("sample.nope", Vec::new()).await;
    assert!(matches!(
        assert_err!(missing),
        HostError::Registry(RegistryError::UnknownCommand(name)) if name == "sample.nope"
    ));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_removing_extension_removes_its_providers() {
    let factory = scripted_factory(Duration::ZERO, |name: String, host: Arc<ExtensionHost>| async move {
        let value: &'static str = if name == "keep" { "kept" } else { "dropped" };
        host.register_hover_provider(DocumentSelector::all(), hover_returning(value))
            .await
            .unwrap();
    });
    let config = HostConfig::default().with_hover_mode(HoverMode::Merge);

    let controller = start(factory, config, environment(URI, "x", &["keep", "drop"])).await;
    assert_eq!(controller.registries().hover.len().await, 2);

    assert_ok!(
        controller
            .set_environment(environment(URI, "x", &["keep"]))
            .await
    );
    assert_eq!(controller.client_entries().len(), 1);
    assert_eq!(controller.registries().hover.len().await, 1);
    assert_eq!(hover_json(&controller).await, json!({ "contents": [{ "value": "kept" }] }));

    controller.shutdown().await;
    assert!(controller.registries().hover.is_empty().await);
}

#[tokio::test]
async fn test_extension_disconnect_cascades() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ExtensionHost>>();
    let factory = scripted_factory(Duration::ZERO, move |_, host: Arc<ExtensionHost>| {
        let tx = tx.clone();
        async move {
            host.register_hover_provider(DocumentSelector::all(), hover_returning("a"))
                .await
                .unwrap();
            let _ = tx.send(host);
        }
    });

    let controller = start(factory, HostConfig::default(), environment(URI, "x", &["e"])).await;
    let extension = rx.recv().await.unwrap();
    let client = controller.client_entries()[0].client.clone();
    assert_eq!(client.registration_count().await, 1);

    extension.close().await;
    let mut state = client.subscribe_state();
    assert_ok!(state.wait_for(|s| *s == ClientState::Closed).await);

    assert_eq!(client.registration_count().await, 0);
    assert!(controller.registries().hover.is_empty().await);
    assert_eq!(hover_json(&controller).await, Value::Null);
}

#[tokio::test]
async fn test_wait_active_fails_when_extension_closes_early() {
    let factory = scripted_factory(Duration::ZERO, |_, host: Arc<ExtensionHost>| async move {
        host.close().await;
    });
    let controller = Controller::new(factory, HostConfig::default());
    assert_ok!(
        controller
            .set_environment(environment(URI, "x", &["e"]))
            .await
    );

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        controller.wait_for_active_clients(),
    )
    .await
    .unwrap();
    assert_err!(result);
}

#[tokio::test]
async fn test_extension_sync_makes_dynamic_registrations_visible() {
    let (tx, rx) = oneshot::channel::<()>();
    let tx = std::sync::Mutex::new(Some(tx));
    let factory = scripted_factory(Duration::from_millis(5), move |_, host: Arc<ExtensionHost>| {
        let tx = tx.lock().unwrap().take();
        async move {
            // Registers once active, then signals
            tokio::spawn(async move {
                for value in ["one", "two", "three"] {
                    host.register_hover_provider(DocumentSelector::all(), hover_returning(value))
                        .await
                        .unwrap();
                }
                host.sync().await.unwrap();
                if let Some(tx) = tx {
                    let _ = tx.send(());
                }
            });
        }
    });
    let config = HostConfig::default().with_hover_mode(HoverMode::Merge);

    let controller = start(factory, config, environment(URI, "x", &["e"])).await;
    rx.await.unwrap();

    assert_eq!(
        hover_json(&controller).await,
        json!({ "contents": [{ "value": "one" }, { "value": "two" }, { "value": "three" }] })
    );
    controller.shutdown().await;
}

#[tokio::test]
async fn test_merge_keeps_registration_order_under_latency() {
    let factory = scripted_factory(Duration::from_millis(2), |_, host: Arc<ExtensionHost>| async move {
        let slow: Arc<dyn HoverProvider> =
            Arc::new(|_: TextDocument, _: TextDocumentPositionParams| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, ProviderError>(Some(Hover::new(MarkupContent::new("slow"))))
            });
        let failing: Arc<dyn HoverProvider> =
            Arc::new(|_: TextDocument, _: TextDocumentPositionParams| async {
                Err::<Option<Hover>, _>(ProviderError::failed("boom"))
            });
        for provider in [slow, failing, hover_returning("fast")] {
            host.register_hover_provider(DocumentSelector::all(), provider)
                .await
                .unwrap();
        }
    });
    let config = HostConfig::default().with_hover_mode(HoverMode::Merge);

    let controller = start(factory, config, environment(URI, "x", &["e"])).await;
    assert_eq!(
        hover_json(&controller).await,
        json!({ "contents": [{ "value": "slow" }, { "value": "fast" }] })
    );
    controller.shutdown().await;
}

#[tokio::test]
async fn test_environment_changes_reach_extension() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ExtensionHost>>();
    let factory = scripted_factory(Duration::ZERO, move |_, host: Arc<ExtensionHost>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(host);
        }
    });

    let controller = start(factory, HostConfig::default(), environment(URI, "x", &["e"])).await;
    let extension = rx.recv().await.unwrap();
    assert_ok!(controller.sync().await);
    assert_eq!(extension.active_document().await.map(|d| d.uri), Some(URI.to_string()));

    let mut next = environment("file:///g", "y", &["e"]);
    next.configuration = json!({ "sample": { "enabled": true } });
    assert_ok!(controller.set_environment(next).await);
    assert_ok!(controller.sync().await);

    assert_eq!(
        extension.active_document().await.map(|d| d.uri),
        Some("file:///g".to_string())
    );
    assert_eq!(extension.configuration().await, json!({ "sample": { "enabled": true } }));
    controller.shutdown().await;
}

#[tokio::test]
async fn test_context_only_change_reaches_extension() {
    let (tx, mut rx) = mpsc::unbounded_channel::<Arc<ExtensionHost>>();
    let factory = scripted_factory(Duration::ZERO, move |_, host: Arc<ExtensionHost>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(host);
        }
    });

    let mut first = environment(URI, "x", &["e"]);
    first.context = json!({ "selection": 1 });
    let controller = start(factory, HostConfig::default(), first).await;
    let extension = rx.recv().await.unwrap();
    assert_ok!(controller.sync().await);
    assert_eq!(extension.context().await, json!({ "selection": 1 }));

    let mut next = environment(URI, "x", &["e"]);
    next.context = json!({ "selection": 2 });
    assert_ok!(controller.set_environment(next).await);
    assert_ok!(controller.sync().await);
    assert_eq!(extension.context().await, json!({ "selection": 2 }));

    controller.shutdown().await;
}

#[tokio::test]
async fn test_selector_limits_providers_to_language() {
    let factory = scripted_factory(Duration::ZERO, |_, host: Arc<ExtensionHost>| async move {
        host.register_hover_provider(DocumentSelector::language("rust"), hover_returning("rs"))
            .await
            .unwrap();
    });

    let controller = start(factory, HostConfig::default(), environment(URI, "go", &["e"])).await;
    assert_eq!(hover_json(&controller).await, Value::Null);

    assert_ok!(
        controller
            .set_environment(environment(URI, "rust", &["e"]))
            .await
    );
    assert_eq!(hover_json(&controller).await, json!({ "contents": [{ "value": "rs" }] }));
    controller.shutdown().await;
}
