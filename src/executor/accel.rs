use std::sync::Arc;

use crate::device::DevicePool;
use crate::error::{KdError, Result};
use crate::executor::{Executor, Job, Pending, Request};

/// Splits a job's blocks evenly over the devices of a pool, one request per device.
#[derive(Debug, Clone)]
pub struct AcceleratorExecutor {
    pool: Arc<DevicePool>,
}

impl AcceleratorExecutor {
    pub fn new(pool: Arc<DevicePool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<DevicePool> {
        &self.pool
    }
}

impl AcceleratorExecutor {
    /// Build one request per device and hand each to `send`.
    ///
    /// When `send` fails, the requests already handed over are waited for before the error is
    /// returned, so no device is left working for a caller that is gone.
    pub(crate) fn dispatch(
        &self,
        job: Job,
        mut send: impl FnMut(usize, Request) -> Result<()>,
    ) -> Result<Pending> {
        if self.pool.is_empty() {
            return Err(KdError::Config("device pool has no devices".into()));
        }
        let parts = job.blocks.split(self.pool.len());
        let mut tickets = Vec::with_capacity(parts.len());
        for (device, blocks) in parts.into_iter().enumerate() {
            // an empty job still goes to device 0
            if blocks.is_empty() && !(device == 0 && job.blocks.is_empty()) {
                continue;
            }
            let id = self.pool.next_request_id();
            let (request, ticket) = Request::new(
                id,
                job.mode,
                job.data.clone(),
                job.query.clone(),
                blocks,
            );
            tracing::debug!(
                request = id,
                device,
                mode = ?job.mode,
                blocks = request.blocks.len(),
                "dispatching request"
            );
            if let Err(e) = send(device, request) {
                tracing::warn!(
                    request = id,
                    device,
                    dispatched = tickets.len(),
                    error = %e,
                    "dispatch failed, draining dispatched requests"
                );
                let _ = Pending::new(tickets).wait();
                return Err(e);
            }
            tickets.push(ticket);
        }
        Ok(Pending::new(tickets))
    }
}

impl Executor for AcceleratorExecutor {
    fn submit(&self, job: Job) -> Result<Pending> {
        self.dispatch(job, |device, request| self.pool.submit_to(device, request))
    }
}
