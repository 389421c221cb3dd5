//! Executing a query against a data set, on the device pool or on the host.

mod accel;
mod cpu;
mod request;

pub use accel::AcceleratorExecutor;
pub use cpu::CpuExecutor;
pub use request::{Completion, Pending, Request, RequestState, RequestStatus, Ticket};

pub(crate) use cpu::scan_blocks;

use std::ops::Range;
use std::sync::Arc;

use crate::config::ExecutionMode;
use crate::engine::DataSet;
use crate::error::Result;
use crate::kdtree::LeafBlock;
use crate::query::QuerySpec;

/// The blocks a request has to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSelection {
    /// A contiguous run of block indices.
    Span(Range<usize>),
    /// Blocks selected by a tree search.
    Leaves(Vec<LeafBlock>),
}

impl BlockSelection {
    pub fn len(&self) -> usize {
        match self {
            BlockSelection::Span(span) => span.len(),
            BlockSelection::Leaves(leaves) => leaves.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            BlockSelection::Span(_) => "span",
            BlockSelection::Leaves(_) => "leaves",
        }
    }

    /// The selected block indices.
    pub fn block_indices(&self, block_capacity: usize) -> Vec<usize> {
        match self {
            BlockSelection::Span(span) => span.clone().collect(),
            BlockSelection::Leaves(leaves) => leaves
                .iter()
                .map(|leaf| leaf.block_index(block_capacity))
                .collect(),
        }
    }

    /// Split into `parts` selections whose sizes differ by at most one, keeping order.
    pub fn split(&self, parts: usize) -> Vec<BlockSelection> {
        let parts = parts.max(1);
        let len = self.len();
        let base = len / parts;
        let extra = len % parts;

        let mut start = 0;
        (0..parts)
            .map(|i| {
                let size = base + usize::from(i < extra);
                let part = start..start + size;
                start += size;
                match self {
                    BlockSelection::Span(span) => {
                        BlockSelection::Span(span.start + part.start..span.start + part.end)
                    }
                    BlockSelection::Leaves(leaves) => BlockSelection::Leaves(leaves[part].to_vec()),
                }
            })
            .collect()
    }
}

/// One logical query ready to run.
#[derive(Debug, Clone)]
pub struct Job {
    pub data: Arc<DataSet>,
    pub query: Arc<QuerySpec>,
    pub mode: ExecutionMode,
    pub blocks: BlockSelection,
}

/// Something that can run a [`Job`].
pub trait Executor: Send + Sync {
    /// Start the job; results are collected through the returned [`Pending`].
    fn submit(&self, job: Job) -> Result<Pending>;

    /// Run the job to completion.
    fn execute(&self, job: Job) -> Result<Vec<u64>> {
        self.submit(job)?.wait()
    }
}
