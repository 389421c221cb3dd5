use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam::channel::Sender;

use crate::arena::{Arena, ArenaMark, Slot};
use crate::config::ExecutionMode;
use crate::device::kernels::{block_filter, record_filter, StagedQuery};
use crate::engine::DataSet;
use crate::error::{KdError, Result};
use crate::executor::{BlockSelection, Request};
use crate::queue::RequestQueue;

/// Message consumed by a device thread.
#[derive(Debug)]
pub enum Task {
    Run(Request),
    Stop,
}

/// Keys of one data set kept in the arena across requests.
#[derive(Debug, Clone, Copy)]
struct Resident {
    dataset: u64,
    keys: Slot<u64>,
    end: ArenaMark,
}

/// The state owned by one device thread.
#[derive(Debug)]
pub(crate) struct DeviceWorker {
    id: usize,
    arena: Arena,
    resident: Option<Resident>,
}

/// Body of a device thread: reserve the arena, report readiness, then serve the queue until
/// [`Task::Stop`].
pub(crate) fn run(
    id: usize,
    arena_bytes: usize,
    queue: Arc<RequestQueue<Task>>,
    ready: Sender<Result<()>>,
) {
    let arena = match Arena::with_capacity(arena_bytes) {
        Ok(arena) => arena,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));
    drop(ready);

    let mut worker = DeviceWorker {
        id,
        arena,
        resident: None,
    };
    let mut served = 0u64;
    loop {
        match queue.pop() {
            Task::Run(request) => {
                worker.handle(request);
                served += 1;
            }
            Task::Stop => break,
        }
    }

    let mut abandoned = 0u64;
    while let Some(task) = queue.try_pop() {
        if let Task::Run(request) = task {
            request.complete(Err(KdError::Disconnected(format!(
                "device {} stopped before running request",
                id
            ))));
            abandoned += 1;
        }
    }
    tracing::debug!(device = id, served, abandoned, "device stopped");
}

impl DeviceWorker {
    #[cfg(test)]
    pub(crate) fn new(id: usize, arena_bytes: usize) -> Result<Self> {
        Ok(Self {
            id,
            arena: Arena::with_capacity(arena_bytes)?,
            resident: None,
        })
    }

    /// Run one request and complete it, whatever happens.
    pub(crate) fn handle(&mut self, request: Request) {
        request.start();
        let result = catch_unwind(AssertUnwindSafe(|| self.execute(&request)))
            .unwrap_or_else(|panic| Err(KdError::Internal(panic_message(panic))));
        self.reset();
        if let Err(e) = &result {
            tracing::warn!(device = self.id, request = request.id, error = %e, "request failed");
        }
        request.complete(result);
    }

    fn execute(&mut self, request: &Request) -> Result<Vec<u64>> {
        let data = &request.data;
        if request.query.dims() != data.dims() {
            return Err(KdError::UnsupportedRequest(format!(
                "{}-dimensional query against {}-dimensional data",
                request.query.dims(),
                data.dims()
            )));
        }

        match (request.mode, &request.blocks) {
            (ExecutionMode::FullScan, BlockSelection::Span(span)) => {
                self.full_scan(request, span.clone())
            }
            (ExecutionMode::TreeFiltered, BlockSelection::Leaves(leaves)) => {
                let blocks: Vec<usize> = leaves
                    .iter()
                    .map(|leaf| leaf.block_index(data.block_capacity()))
                    .collect();
                self.filtered_scan(request, &blocks)
            }
            (ExecutionMode::Resident, BlockSelection::Leaves(leaves)) => {
                let blocks: Vec<usize> = leaves
                    .iter()
                    .map(|leaf| leaf.block_index(data.block_capacity()))
                    .collect();
                self.resident_scan(request, &blocks)
            }
            (mode, blocks) => Err(KdError::UnsupportedRequest(format!(
                "mode {:?} cannot run a {} selection on a device",
                mode,
                blocks.kind()
            ))),
        }
    }

    /// Release everything above the resident keys.
    fn reset(&mut self) {
        match self.resident {
            Some(resident) => self.arena.reset_to(resident.end),
            None => self.arena.reset(),
        }
    }

    fn evict(&mut self) {
        if let Some(resident) = self.resident.take() {
            tracing::debug!(device = self.id, dataset = resident.dataset, "evicting resident keys");
        }
        self.arena.reset();
    }

    /// Stage the query and size batches of `per_block` bytes in what is left.
    ///
    /// Non-resident modes evict resident keys before giving up.
    fn stage(&mut self, request: &Request, per_block: usize) -> Result<(StagedQuery, usize)> {
        tracing::trace!(
            device = self.id,
            request = request.id,
            query_bytes = StagedQuery::footprint(&request.query),
            per_block,
            "staging query"
        );
        loop {
            self.reset();
            let staged = match StagedQuery::stage(&mut self.arena, &request.query) {
                Ok(staged) => Some(staged),
                Err(KdError::ResourceExhausted { .. }) if self.resident.is_some() => None,
                Err(e) => return Err(e),
            };
            if let Some(staged) = staged {
                let max_blocks = self.arena.remaining() / per_block;
                if max_blocks > 0 {
                    return Ok((staged, max_blocks));
                }
                if self.resident.is_none() {
                    return Err(KdError::ResourceExhausted {
                        required: per_block,
                        available: self.arena.remaining(),
                    });
                }
            }
            self.evict();
        }
    }

    fn full_scan(&mut self, request: &Request, span: std::ops::Range<usize>) -> Result<Vec<u64>> {
        let data = &request.data;
        check_span(data, &span)?;
        let range_words = 2 * data.dims();

        // phase 1: block ranges
        let per_block = range_words * 8 + 4;
        let (staged, max_blocks) = self.stage(request, per_block)?;
        let fixed = self.arena.mark();
        let mut survivors = vec![];
        let mut iterations = 0;
        let mut start = span.start;
        while start < span.end {
            let end = (start + max_blocks).min(span.end);
            let count = end - start;
            self.arena.reset_to(fixed);
            let ranges = self.arena.alloc::<u64>(count * range_words)?;
            self.arena
                .get_mut(ranges)
                .copy_from_slice(&data.ranges()[start * range_words..end * range_words]);
            let flags = self.arena.alloc::<u32>(count)?;

            let (read, flags) = self.arena.split_for(flags);
            block_filter(&staged.load(&read), read.get(ranges), flags);
            survivors.extend(
                flags
                    .iter()
                    .enumerate()
                    .filter(|(_, flag)| **flag != 0)
                    .map(|(i, _)| start + i),
            );
            iterations += 1;
            start = end;
        }
        tracing::debug!(
            device = self.id,
            request = request.id,
            blocks = span.len(),
            survivors = survivors.len(),
            iterations,
            "block filter done"
        );

        // phase 2: records of the surviving blocks
        self.filtered_scan(request, &survivors)
    }

    fn filtered_scan(&mut self, request: &Request, blocks: &[usize]) -> Result<Vec<u64>> {
        let data = &request.data;
        check_blocks(data, blocks)?;
        let block_words = data.block_words();
        let block_capacity = data.block_capacity();

        // staged keys plus one result word per record
        let per_block = block_capacity * (data.record_width() * 8 + 8);
        let (staged, max_blocks) = self.stage(request, per_block)?;
        let fixed = self.arena.mark();

        let mut results = vec![];
        let mut iterations = 0;
        for batch in blocks.chunks(max_blocks) {
            self.arena.reset_to(fixed);
            let keys = self.arena.alloc::<u64>(batch.len() * block_words)?;
            let staging = self.arena.get_mut(keys);
            for (i, block) in batch.iter().enumerate() {
                staging[i * block_words..(i + 1) * block_words].copy_from_slice(data.block(*block));
            }
            let out = self.arena.alloc::<u64>(batch.len() * block_capacity)?;

            let (read, out) = self.arena.split_for(out);
            let found = record_filter(&staged.load(&read), read.get(keys), out);
            results.extend_from_slice(&out[..found]);
            iterations += 1;
        }
        tracing::debug!(
            device = self.id,
            request = request.id,
            blocks = blocks.len(),
            matches = results.len(),
            iterations,
            "record filter done"
        );
        Ok(results)
    }

    fn resident_scan(&mut self, request: &Request, blocks: &[usize]) -> Result<Vec<u64>> {
        let data = &request.data;
        check_blocks(data, blocks)?;
        let resident = self.make_resident(data)?;
        let block_words = data.block_words();
        let block_capacity = data.block_capacity();

        // only the result scratch is allocated per batch
        let per_block = block_capacity * 8;
        self.arena.reset_to(resident.end);
        let staged = StagedQuery::stage(&mut self.arena, &request.query)?;
        let max_blocks = self.arena.remaining() / per_block;
        if max_blocks == 0 {
            return Err(KdError::ResourceExhausted {
                required: per_block,
                available: self.arena.remaining(),
            });
        }
        let fixed = self.arena.mark();

        let mut results = vec![];
        for batch in blocks.chunks(max_blocks) {
            self.arena.reset_to(fixed);
            let out = self.arena.alloc::<u64>(batch.len() * block_capacity)?;
            let (read, out) = self.arena.split_for(out);
            let query = staged.load(&read);
            let keys = read.get(resident.keys);
            let mut found = 0;
            for block in batch {
                found += record_filter(
                    &query,
                    &keys[block * block_words..(block + 1) * block_words],
                    &mut out[found..],
                );
            }
            results.extend_from_slice(&out[..found]);
        }
        Ok(results)
    }

    /// Copy the data set's keys into the arena unless they are already there.
    fn make_resident(&mut self, data: &DataSet) -> Result<Resident> {
        if let Some(resident) = self.resident.filter(|r| r.dataset == data.id()) {
            return Ok(resident);
        }
        self.evict();
        let keys = self.arena.alloc::<u64>(data.keys().len())?;
        self.arena.get_mut(keys).copy_from_slice(data.keys());
        let resident = Resident {
            dataset: data.id(),
            keys,
            end: self.arena.mark(),
        };
        tracing::debug!(
            device = self.id,
            dataset = data.id(),
            bytes = keys.len() * 8,
            "keys made resident"
        );
        self.resident = Some(resident);
        Ok(resident)
    }
}

fn check_span(data: &DataSet, span: &std::ops::Range<usize>) -> Result<()> {
    if span.end > data.block_count() {
        return Err(KdError::UnsupportedRequest(format!(
            "blocks {}..{} out of {}",
            span.start,
            span.end,
            data.block_count()
        )));
    }
    Ok(())
}

fn check_blocks(data: &DataSet, blocks: &[usize]) -> Result<()> {
    match blocks.iter().find(|b| **b >= data.block_count()) {
        Some(block) => Err(KdError::UnsupportedRequest(format!(
            "block {} out of {}",
            block,
            data.block_count()
        ))),
        None => Ok(()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("kernel panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("kernel panicked: {}", msg)
    } else {
        "kernel panicked".to_string()
    }
}
