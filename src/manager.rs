use std::sync::Arc;

use mjpeg_bus::{Engine, StreamConfig};
use tokio::sync::RwLock;

/// Owns the engine for the configured source. Reconfiguring never mutates a
/// running engine: the old one is stopped and a fresh one takes its place.
pub struct EngineManager {
    inner: RwLock<Slot>,
}

struct Slot {
    config: StreamConfig,
    engine: Option<Arc<Engine>>,
}

impl EngineManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Slot {
                config: StreamConfig::default(),
                engine: None,
            }),
        }
    }

    /// Manager holding the boot-time settings, with its engine running when a
    /// source is configured. A source that fails to start is logged and leaves
    /// no engine, but its settings are still kept for `/settings`.
    pub async fn from_config(config: StreamConfig) -> Self {
        let manager = Self::new();
        if !config.is_configured() {
            log::warn!("manager: no camera source configured, set one with PUT /settings");
        }
        if let Err(e) = manager.reconfigure(config.clone()).await {
            log::error!("manager: camera engine not started: {:#}", e);
            manager.inner.write().await.config = config;
        }
        manager
    }

    /// Replace the engine with one built from `config` and start it.
    /// An unconfigured source leaves no engine behind.
    pub async fn reconfigure(&self, config: StreamConfig) -> anyhow::Result<()> {
        config.validate()?;
        let engine = if config.is_configured() {
            Some(Arc::new(Engine::new(config.clone())?))
        } else {
            None
        };

        let mut slot = self.inner.write().await;
        if let Some(old) = slot.engine.take() {
            old.stop().await;
        }
        if let Some(engine) = &engine {
            engine.start()?;
        }
        slot.config = config;
        slot.engine = engine;
        Ok(())
    }

    /// The engine for the configured source, if any.
    pub async fn current(&self) -> Option<Arc<Engine>> {
        self.inner.read().await.engine.clone()
    }

    pub async fn config(&self) -> StreamConfig {
        self.inner.read().await.config.clone()
    }

    pub async fn shutdown(&self) {
        let mut slot = self.inner.write().await;
        if let Some(engine) = slot.engine.take() {
            engine.stop().await;
        }
    }
}

impl Default for EngineManager {
    fn default() -> Self {
        Self::new()
    }
}
