#[cfg(feature = "rayon")]
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::engine::DataSet;
use crate::error::Result;
use crate::executor::{Executor, Job, Pending};
use crate::query::QuerySpec;

/// Runs jobs on the calling thread, spread over the rayon pool when the `rayon` feature is on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuExecutor;

impl Executor for CpuExecutor {
    fn submit(&self, job: Job) -> Result<Pending> {
        let blocks = job.blocks.block_indices(job.data.block_capacity());
        tracing::debug!(blocks = blocks.len(), "cpu scan");
        Ok(Pending::ready(scan_blocks(&job.data, &job.query, &blocks)))
    }
}

/// References of the records in `blocks` that match `query`.
pub(crate) fn scan_blocks(data: &DataSet, query: &QuerySpec, blocks: &[usize]) -> Vec<u64> {
    let width = data.record_width();
    let dims = data.dims();
    let scan = |mut found: Vec<u64>, block: &usize| {
        found.extend(
            data.block(*block)
                .chunks_exact(width)
                .filter(|record| query.matches(record))
                .map(|record| record[dims]),
        );
        found
    };

    #[cfg(feature = "rayon")]
    {
        blocks
            .par_iter()
            .fold(Vec::new, scan)
            .reduce(Vec::new, |mut a, mut b| {
                a.append(&mut b);
                a
            })
    }

    #[cfg(not(feature = "rayon"))]
    {
        blocks.iter().fold(Vec::new(), scan)
    }
}
