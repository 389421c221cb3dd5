#![doc = include_str!("../README.md")]

pub mod arena;
pub mod codec;
pub mod config;
pub mod device;
pub mod engine;
mod error;
pub mod executor;
pub mod kdtree;
mod paths;
pub mod query;
pub mod queue;
pub mod shim;

pub use config::{DeviceConfig, EngineConfig, ExecutionMode};
pub use engine::{Engine, EnginePool};
pub use error::{KdError, Result};
pub use paths::IndexPaths;
pub use query::{QueryBox, QuerySpec, Region};
pub use shim::{IndexSpec, KdAccessMethod, KdCursor, RecordLocation};

#[cfg(test)]
pub(crate) mod test;
