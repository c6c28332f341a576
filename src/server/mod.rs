//! Process wiring: builds the upload store from configuration and runs
//! until shut down. Routing tus HTTP verbs onto [`crate::store::UploadStore`]
//! is the job of an out-of-scope front end; this module owns process
//! lifetime and the metrics endpoint.

use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::metrics::server::{MetricsServer, MetricsServerConfig};
use crate::store::{StoreError, UploadStore, UploadStoreConfig};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to initialize upload store: {0}")]
    Store(#[from] StoreError),

    #[error("metrics server error: {0}")]
    Metrics(#[from] crate::metrics::server::MetricsServerError),

    #[error("signal handling error: {0}")]
    Signal(std::io::Error),
}

pub struct Server {
    config: Config,
    store: Arc<UploadStore>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, ServerError> {
        let store = UploadStore::new(UploadStoreConfig::from_config(&config.store))?;
        Ok(Self {
            config,
            store: Arc::new(store),
        })
    }

    /// The store handle a front end hands PATCH/HEAD/POST bodies to.
    pub fn store(&self) -> Arc<UploadStore> {
        Arc::clone(&self.store)
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        let mut metrics_server = if self.config.metrics.enabled {
            let address = format!("127.0.0.1:{}", self.config.metrics.port);
            let mut server = MetricsServer::new(MetricsServerConfig { address });
            let addr = server.start().await?;
            info!("Metrics server listening on {}", addr);
            Some(server)
        } else {
            None
        };

        info!(bucket = %self.config.store.bucket, "upload store ready");

        tokio::signal::ctrl_c().await.map_err(ServerError::Signal)?;

        info!("shutting down");
        if let Some(server) = metrics_server.as_mut() {
            server.shutdown().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MetricsConfig, StoreConfig};

    fn test_config() -> Config {
        Config {
            store: StoreConfig {
                bucket: "test-bucket".into(),
                region: "us-east-1".into(),
                endpoint: None,
                access_key_id: None,
                secret_access_key: None,
                part_size: crate::config::default_part_size(),
                temp_dir: None,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 0,
            },
        }
    }

    #[test]
    fn test_server_new() {
        let server = Server::new(test_config());
        assert!(server.is_ok());
    }
}
