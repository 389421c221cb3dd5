use std::sync::Arc;

use crate::config::{EngineConfig, ExecutionMode};
use crate::device::DevicePool;
use crate::engine::DataSet;
use crate::error::{KdError, Result};
use crate::executor::{
    AcceleratorExecutor, BlockSelection, CpuExecutor, Executor, Job, Pending,
};
use crate::kdtree::{KDTreeIndex, LeafBlock, MappedKDTree};
use crate::paths::IndexPaths;
use crate::query::{QueryBox, QuerySpec};

/// The query entry point of one built index.
///
/// An engine maps the `.tree`, `.keys` and `.range` files of an index and dispatches queries to
/// the device pool it was opened with, or to the CPU executor.
#[derive(Debug)]
pub struct Engine {
    paths: IndexPaths,
    config: EngineConfig,
    tree: MappedKDTree,
    data: Arc<DataSet>,
    records: u64,
    accelerator: Option<AcceleratorExecutor>,
}

impl Engine {
    /// Map the artifacts of the index at `paths`.
    ///
    /// Without `devices`, or with an empty pool, every mode runs on the CPU.
    pub fn open(
        paths: &IndexPaths,
        dims: usize,
        config: EngineConfig,
        devices: Option<Arc<DevicePool>>,
    ) -> Result<Self> {
        config.validate()?;
        let tree = MappedKDTree::open(paths, dims)?;
        let data = DataSet::open(paths, dims, config.block_capacity)?;

        let leaves = tree.leaves();
        if leaves.len() != data.block_count() {
            return Err(KdError::Format(format!(
                "tree has {} leaves but the keys hold {} blocks",
                leaves.len(),
                data.block_count()
            )));
        }
        if let Some(leaf) = leaves
            .iter()
            .find(|leaf| leaf.count as usize > config.block_capacity)
        {
            return Err(KdError::Format(format!(
                "leaf of {} records exceeds the block capacity {}",
                leaf.count, config.block_capacity
            )));
        }
        let key_records = (data.block_count() * config.block_capacity) as u64;
        if let Some(leaf) = leaves.iter().find(|leaf| {
            leaf.offset % config.block_capacity as u64 != 0 || leaf.offset >= key_records
        }) {
            return Err(KdError::Format(format!(
                "leaf offset {} is not a block boundary below {}",
                leaf.offset, key_records
            )));
        }
        let records = leaves.iter().map(|leaf| leaf.count).sum();

        let accelerator = devices
            .filter(|pool| !pool.is_empty())
            .map(AcceleratorExecutor::new);
        tracing::info!(
            path = %paths.base().display(),
            dims,
            records,
            blocks = data.block_count(),
            devices = accelerator.as_ref().map_or(0, |a| a.pool().len()),
            mode = ?config.mode,
            "engine opened"
        );
        Ok(Self {
            paths: paths.clone(),
            config,
            tree,
            data: Arc::new(data),
            records,
            accelerator,
        })
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dims(&self) -> usize {
        self.data.dims()
    }

    /// Records stored in the index, padding excluded.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    pub fn block_count(&self) -> usize {
        self.data.block_count()
    }

    /// The mapped blocks and ranges.
    pub fn data(&self) -> &Arc<DataSet> {
        &self.data
    }

    /// Whether queries in device modes reach a device pool.
    pub fn has_devices(&self) -> bool {
        self.accelerator.is_some()
    }

    /// Leaf blocks whose range overlaps `query_box`.
    pub fn candidate_blocks(&self, query_box: &QueryBox) -> Vec<LeafBlock> {
        self.tree.search(query_box)
    }

    /// Start `query` in the configured mode.
    pub fn submit(&self, query: QuerySpec) -> Result<Pending> {
        self.submit_with_mode(query, self.config.mode)
    }

    /// Start `query` in `mode`.
    pub fn submit_with_mode(&self, query: QuerySpec, mode: ExecutionMode) -> Result<Pending> {
        self.check_query(&query)?;

        let blocks = match mode {
            ExecutionMode::FullScan => BlockSelection::Span(0..self.block_count()),
            _ => BlockSelection::Leaves(self.candidate_blocks(&query.query_box)),
        };
        let job = Job {
            data: self.data.clone(),
            query: Arc::new(query),
            mode,
            blocks,
        };

        match &self.accelerator {
            Some(accelerator) if mode.uses_devices() => accelerator.submit(job),
            _ => {
                if mode.uses_devices() {
                    tracing::debug!(mode = ?mode, "no devices, running on the cpu");
                }
                CpuExecutor.submit(job)
            }
        }
    }

    /// Wait for `pending` and return the matching ordinals in ascending order.
    pub fn collect(&self, pending: Pending) -> Result<Vec<u64>> {
        let mut results = pending.wait()?;
        results.sort_unstable();
        Ok(results)
    }

    /// Run `query` in the configured mode and return the sorted ordinals.
    pub fn query(&self, query: QuerySpec) -> Result<Vec<u64>> {
        self.collect(self.submit(query)?)
    }

    fn check_query(&self, query: &QuerySpec) -> Result<()> {
        let dims = self.dims();
        if query.dims() != dims {
            return Err(KdError::InvalidPredicate(format!(
                "{}-dimensional query against a {}-dimensional index",
                query.dims(),
                dims
            )));
        }
        if let Some(region) = query
            .regions
            .iter()
            .find(|r| r.x_dim() >= dims || r.y_dim() >= dims)
        {
            return Err(KdError::InvalidPredicate(format!(
                "region over dimensions ({}, {}) of a {}-dimensional index",
                region.x_dim(),
                region.y_dim(),
                dims
            )));
        }
        Ok(())
    }
}
