//! In-process extension harness for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use exthost::config::HostConfig;
use exthost::error::ClientError;
use exthost::extension::ExtensionHost;
use exthost::host::{Controller, InProcessTransportFactory, TransportFactory};
use exthost::infra::rpc::MessageTransports;
use exthost::infra::rpc::transport::memory;
use exthost::models::{Environment, ExtensionDescriptor, TextDocument};

/// Runs the built-in samples in-process
pub fn sample_factory(latency: Duration) -> Arc<dyn TransportFactory> {
    Arc::new(InProcessTransportFactory::new(latency))
}

/// Runs `script` against a fresh [`ExtensionHost`] per extension, then
/// listens until the host disconnects
pub fn scripted_factory<F, Fut>(latency: Duration, script: F) -> Arc<dyn TransportFactory>
where
    F: Fn(String, Arc<ExtensionHost>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let script = Arc::new(script);
    Arc::new(
        move |extension: &ExtensionDescriptor| -> Result<MessageTransports, ClientError> {
            let (host, remote) = memory::pair(latency);
            let name = extension.id.clone();
            let script = Arc::clone(&script);
            tokio::spawn(async move {
                let extension = ExtensionHost::new(remote).await;
                script(name, Arc::clone(&extension)).await;
                if extension.listen().await.is_ok() {
                    extension.closed().await;
                }
            });
            Ok(host)
        },
    )
}

pub fn environment(uri: &str, language: &str, extensions: &[&str]) -> Environment {
    Environment::with_document(TextDocument::new(uri, language, ""))
        .with_extensions(extensions.iter().map(|id| ExtensionDescriptor::new(*id)))
}

/// Controller with every listed extension active
pub async fn start(
    factory: Arc<dyn TransportFactory>,
    config: HostConfig,
    environment: Environment,
) -> Controller {
    let controller = Controller::new(factory, config);
    controller.set_environment(environment).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), controller.wait_for_active_clients())
        .await
        .expect("clients did not become active")
        .unwrap();
    controller
}
