use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::EngineConfig;
use crate::device::DevicePool;
use crate::engine::Engine;
use crate::error::Result;
use crate::paths::IndexPaths;

/// Engines of the open indexes, keyed by keys file.
///
/// Owned by whoever manages index lifecycles: an engine is opened on first use and kept until
/// [`EnginePool::close`]. Every engine shares the pool's device pool.
#[derive(Debug)]
pub struct EnginePool {
    config: EngineConfig,
    devices: Option<Arc<DevicePool>>,
    engines: Mutex<HashMap<PathBuf, Arc<Engine>>>,
}

impl EnginePool {
    pub fn new(config: EngineConfig, devices: Option<Arc<DevicePool>>) -> Self {
        Self {
            config,
            devices,
            engines: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn devices(&self) -> Option<&Arc<DevicePool>> {
        self.devices.as_ref()
    }

    /// The engine of the index at `paths`, opening it if needed.
    ///
    /// The lock is held while opening, so concurrent callers never map an index twice.
    pub fn get_or_open(&self, paths: &IndexPaths, dims: usize) -> Result<Arc<Engine>> {
        let mut engines = self.engines.lock();
        if let Some(engine) = engines.get(&paths.keys()) {
            return Ok(engine.clone());
        }
        let engine = Arc::new(Engine::open(
            paths,
            dims,
            self.config.clone(),
            self.devices.clone(),
        )?);
        engines.insert(paths.keys(), engine.clone());
        Ok(engine)
    }

    /// Forget the engine of the index at `paths`. Returns whether one was open.
    ///
    /// Callers still holding the engine keep it alive until they drop it.
    pub fn close(&self, paths: &IndexPaths) -> bool {
        self.engines.lock().remove(&paths.keys()).is_some()
    }

    /// Number of open engines.
    pub fn len(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.lock().is_empty()
    }
}
