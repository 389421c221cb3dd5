//! Engine and device configuration.

use serde::{Deserialize, Serialize};

use crate::error::{KdError, Result};
use crate::kdtree::DEFAULT_BLOCK_CAPACITY;
use crate::queue::DEFAULT_QUEUE_CAPACITY;

/// Default arena size reserved by every device: 64 MiB.
pub const DEFAULT_ARENA_BYTES: usize = 64 * 1024 * 1024;

/// How the engine evaluates a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Scan every block: filter block ranges on the device, then the surviving blocks' records.
    FullScan,
    /// Prune blocks with the tree on the host, then filter the remaining records on the device.
    #[default]
    TreeFiltered,
    /// Like [`ExecutionMode::TreeFiltered`], but the keys stay resident in device memory between
    /// requests.
    Resident,
    /// Prune with the tree, then filter the records on the host thread pool.
    Cpu,
}

impl ExecutionMode {
    /// Whether this mode runs on the device pool.
    pub fn uses_devices(&self) -> bool {
        !matches!(self, ExecutionMode::Cpu)
    }
}

/// Configuration of a single index engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of records per leaf block. Must match the value the index was built with.
    /// Default: 4096
    pub block_capacity: usize,

    /// Mode used by [`Engine::submit`][crate::engine::Engine::submit].
    /// Default: tree filtered
    pub mode: ExecutionMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            mode: ExecutionMode::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| KdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the leaf block capacity.
    pub fn with_block_capacity(mut self, block_capacity: usize) -> Self {
        self.block_capacity = block_capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_capacity == 0 {
            return Err(KdError::Config("block_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Configuration of the device pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of devices (one worker thread each).
    /// Default: 1
    pub devices: usize,

    /// Bytes reserved for the arena of each device.
    /// Default: 64 MiB
    pub arena_bytes: usize,

    /// Maximum number of queued requests per device; 0 means unbounded.
    /// Default: 128
    pub queue_capacity: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            devices: 1,
            arena_bytes: DEFAULT_ARENA_BYTES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DeviceConfig {
    /// Parse a JSON configuration document; missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| KdError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the number of devices.
    pub fn with_devices(mut self, devices: usize) -> Self {
        self.devices = devices;
        self
    }

    /// Set the arena size of each device.
    pub fn with_arena_bytes(mut self, arena_bytes: usize) -> Self {
        self.arena_bytes = arena_bytes;
        self
    }

    /// Set the per-device queue capacity.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.arena_bytes < std::mem::size_of::<u64>() {
            return Err(KdError::Config(format!(
                "arena_bytes must hold at least one word, got {}",
                self.arena_bytes
            )));
        }
        Ok(())
    }
}
