//! Async driver for inventory passes
//!
//! A pass blocks on backend reads, so the runner moves it onto tokio's
//! blocking pool and bounds it with a timeout. When the timeout fires the
//! pass's cancellation token is cancelled; the pass notices between facts,
//! closes its session on its own thread and finishes in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backend::ManagementBackend;
use crate::config::CollectorConfig;
use crate::inventory::{InventoryCollector, InventoryError, InventoryPlan, InventoryResult};
use crate::sink::InventorySink;

pub struct InventoryRunner {
    collector: InventoryCollector,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl InventoryRunner {
    pub fn new(collector: InventoryCollector, timeout: Duration) -> Self {
        Self {
            collector,
            timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Runner with a fresh module cache built from `config`
    pub fn from_config(config: &CollectorConfig, plan: InventoryPlan) -> Self {
        let modules = Arc::new(config.create_module_cache());
        Self::new(InventoryCollector::new(plan, modules), config.pass_timeout)
    }

    pub fn collector(&self) -> &InventoryCollector {
        &self.collector
    }

    /// Run one pass with the configured timeout
    pub async fn run(
        &self,
        backend: Box<dyn ManagementBackend>,
    ) -> Result<InventoryResult, InventoryError> {
        let pass_token = self.shutdown.child_token();
        let collector = self.collector.clone().with_cancellation(pass_token.clone());
        let pass = tokio::task::spawn_blocking(move || collector.collect(backend));

        match tokio::time::timeout(self.timeout, pass).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                error!("Inventory pass aborted: {}", join_error);
                Err(InventoryError::Aborted {
                    reason: join_error.to_string(),
                })
            }
            Err(_) => {
                warn!(
                    "Inventory pass exceeded {:?}, abandoning remaining facts",
                    self.timeout
                );
                pass_token.cancel();
                Err(InventoryError::Timeout(self.timeout))
            }
        }
    }

    /// Run one pass and hand the result to `sink`
    pub async fn run_to_sink(
        &self,
        backend: Box<dyn ManagementBackend>,
        sink: &mut dyn InventorySink,
    ) -> Result<InventoryResult, InventoryError> {
        let result = self.run(backend).await?;
        sink.write(&result).await?;
        Ok(result)
    }

    /// Cancel every pass still running
    pub fn shutdown(&self) {
        info!("Cancelling outstanding inventory passes");
        self.shutdown.cancel();
    }
}
