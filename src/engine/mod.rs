//! Opening built indexes and dispatching queries against them.

mod dataset;
mod facade;
mod pool;

pub use dataset::DataSet;
pub use facade::Engine;
pub use pool::EnginePool;
