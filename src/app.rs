//! Application container for exthost

use std::sync::Arc;

use crate::cli::OutputContext;
use crate::config::HostConfig;
use crate::host::{Controller, InProcessTransportFactory, ProcessTransportFactory, TransportFactory};
use crate::models::Environment;
use crate::models::config::ExtHostConfig;
use crate::services::config::{ConfigService, DefaultConfigService};

pub struct App {
    pub(crate) output: OutputContext,
    pub(crate) config_service: Arc<dyn ConfigService>,
    pub(crate) config: ExtHostConfig,
}

impl App {
    pub async fn new() -> anyhow::Result<Self> {
        let root = std::env::current_dir()?;

        tracing::debug!("Initializing exthost at {:?}", root);

        let config_service = Arc::new(DefaultConfigService::new(&root));
        let config = match config_service.load(false).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring configuration: {}", e);
                ExtHostConfig::default()
            }
        };
        let output = OutputContext::new(config.output.pretty);

        Ok(Self {
            output,
            config_service,
            config,
        })
    }

    pub fn config(&self) -> &ExtHostConfig {
        &self.config
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig::from(&self.config)
    }

    /// Start a controller and wait until all its extensions are active.
    /// Extensions run as `exthost extension <id>` child processes, or as
    /// tasks of this process when `transport.in_process` is set.
    pub async fn start_host(&self, environment: Environment) -> anyhow::Result<Controller> {
        let config = self.host_config();
        let factory: Arc<dyn TransportFactory> = if config.in_process {
            Arc::new(InProcessTransportFactory::new(config.transport_latency))
        } else {
            let program = std::env::current_exe()?;
            Arc::new(ProcessTransportFactory::new(
                program,
                vec!["extension".to_string()],
            ))
        };
        let controller = Controller::new(factory, config);

        if let Err(e) = controller.set_environment(environment).await {
            controller.shutdown().await;
            return Err(e.into());
        }
        if let Err(e) = controller.wait_for_active_clients().await {
            controller.shutdown().await;
            return Err(e.into());
        }
        controller.sync().await?;
        Ok(controller)
    }
}
