//! Queue registry mapping queue names to engines.
//!
//! Queues are created lazily on first access. Deleting a queue resets its
//! engine in place, so handles held by callers stay valid and observe a "new"
//! queue afterwards.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::engine::QueueEngine;
use crate::error::{ConfigurationError, QueueError};
use crate::message::QueueName;
use crate::push::{HttpPushTransport, PushDispatcher, PushTransport};
use crate::retry::BackoffPolicy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Concurrent map of queue name to queue engine
pub struct QueueRegistry {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<PushDispatcher>,
    queues: RwLock<HashMap<QueueName, Arc<QueueEngine>>>,
}

impl QueueRegistry {
    /// Create registry using the system clock and HTTP push delivery
    pub fn new(config: EngineConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let transport =
            HttpPushTransport::new(Duration::from_secs(config.push.request_timeout_seconds))?;
        Ok(Self::with_components(
            config,
            Arc::new(SystemClock),
            Arc::new(transport),
        ))
    }

    /// Create registry with an explicit clock and push transport
    pub fn with_components(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn PushTransport>,
    ) -> Self {
        let dispatcher = Arc::new(PushDispatcher::new(
            transport,
            BackoffPolicy::from_config(&config.push),
        ));
        Self {
            config,
            clock,
            dispatcher,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Engine for `name`, creating it on first access
    pub fn queue(&self, name: &str) -> Result<Arc<QueueEngine>, QueueError> {
        let name = QueueName::new(name.to_string())?;
        Ok(self.queue_by_name(&name))
    }

    /// Engine for a validated queue name, creating it on first access
    pub fn queue_by_name(&self, name: &QueueName) -> Arc<QueueEngine> {
        {
            let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
            if let Some(engine) = queues.get(name) {
                return Arc::clone(engine);
            }
        }

        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        let engine = queues.entry(name.clone()).or_insert_with(|| {
            debug!(queue = %name, "Creating queue engine");
            QueueEngine::new(
                name.clone(),
                &self.config,
                Arc::clone(&self.clock),
                Arc::clone(&self.dispatcher),
            )
        });
        Arc::clone(engine)
    }

    /// Names of every queue accessed so far
    pub fn queue_names(&self) -> Vec<QueueName> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<QueueName> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Reset queue `name` to the never-materialized state
    ///
    /// Deleting a queue that was never used is a no-op.
    pub async fn delete_queue(&self, name: &str) -> Result<(), QueueError> {
        let name = QueueName::new(name.to_string())?;
        let engine = {
            let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
            queues.get(&name).cloned()
        };

        if let Some(engine) = engine {
            engine.reset().await;
        }
        Ok(())
    }

    fn engines(&self) -> Vec<Arc<QueueEngine>> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues.values().cloned().collect()
    }

    /// Apply time-based transitions on every queue
    pub async fn sweep(&self) -> usize {
        let mut promoted = 0;
        for engine in self.engines() {
            promoted += engine.sweep().await;
        }
        promoted
    }

    /// Start the periodic sweeper when enabled in configuration
    ///
    /// The task stops once the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.config.sweep.enabled {
            return None;
        }

        let interval = Duration::from_millis(self.config.sweep.interval_ms);
        let registry = Arc::downgrade(self);
        info!(interval_ms = self.config.sweep.interval_ms, "Starting reservation sweeper");

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!("Registry dropped, stopping sweeper");
                    break;
                };
                let promoted = registry.sweep().await;
                if promoted > 0 {
                    debug!(promoted = promoted, "Sweep promoted messages");
                }
            }
        }))
    }
}
