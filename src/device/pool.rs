use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::bounded;

use crate::config::DeviceConfig;
use crate::device::worker::{run, Task};
use crate::error::{KdError, Result};
use crate::executor::Request;
use crate::queue::RequestQueue;

#[derive(Debug)]
struct Device {
    queue: Arc<RequestQueue<Task>>,
    handle: Option<JoinHandle<()>>,
}

/// A set of devices, each with its own arena, queue and thread.
///
/// The pool is created explicitly and shared by the engines that use it. Dropping it stops every
/// device; requests still queued at that point complete with [`KdError::Disconnected`].
#[derive(Debug)]
pub struct DevicePool {
    config: DeviceConfig,
    devices: Vec<Device>,
    next_request: AtomicU64,
    stopped: AtomicBool,
}

impl DevicePool {
    /// Start one worker per configured device and wait until every arena is reserved.
    pub fn start(config: DeviceConfig) -> Result<Self> {
        config.validate()?;
        let mut pool = Self {
            config: config.clone(),
            devices: Vec::with_capacity(config.devices),
            next_request: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        };

        let mut ready = Vec::with_capacity(config.devices);
        for id in 0..config.devices {
            let queue = Arc::new(RequestQueue::new(config.queue_capacity));
            let (sender, receiver) = bounded(1);
            let worker_queue = queue.clone();
            let arena_bytes = config.arena_bytes;
            let handle = thread::Builder::new()
                .name(format!("kd-device-{}", id))
                .spawn(move || run(id, arena_bytes, worker_queue, sender))?;
            pool.devices.push(Device {
                queue,
                handle: Some(handle),
            });
            ready.push(receiver);
        }

        for (id, receiver) in ready.into_iter().enumerate() {
            let started = receiver.recv().map_err(|_| {
                KdError::Disconnected(format!("device {} exited during startup", id))
            })?;
            // dropping `pool` stops the devices that did start
            started?;
        }

        tracing::info!(
            devices = config.devices,
            arena_bytes = config.arena_bytes,
            queue_capacity = config.queue_capacity,
            "device pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Identifier for the next request.
    pub fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }

    /// Queue a request on one device, waiting while its queue is full.
    pub fn submit_to(&self, device: usize, request: Request) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            request.complete(Err(KdError::Disconnected("device pool is stopped".into())));
            return Ok(());
        }
        let target = self.devices.get(device).ok_or_else(|| {
            KdError::Config(format!("device {} out of {}", device, self.devices.len()))
        })?;
        target.queue.push(Task::Run(request));
        Ok(())
    }

    /// Requests waiting in the queue of `device`.
    pub fn queued(&self, device: usize) -> usize {
        self.devices.get(device).map_or(0, |d| d.queue.len())
    }

    /// Stop every device and wait for its thread.
    pub fn shutdown(&mut self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for device in &self.devices {
            device.queue.push(Task::Stop);
        }
        for device in &mut self.devices {
            if let Some(handle) = device.handle.take() {
                if handle.join().is_err() {
                    tracing::warn!("device thread panicked");
                }
            }
        }
        tracing::info!(devices = self.devices.len(), "device pool stopped");
    }
}

impl Drop for DevicePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
