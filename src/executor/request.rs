use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};

use crate::config::ExecutionMode;
use crate::engine::DataSet;
use crate::error::{KdError, Result};
use crate::executor::BlockSelection;
use crate::query::QuerySpec;

/// Lifecycle of a request. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum RequestState {
    Submitted = 0,
    Running = 1,
    Done = 2,
}

impl RequestState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => RequestState::Submitted,
            1 => RequestState::Running,
            _ => RequestState::Done,
        }
    }
}

/// Shared, monotonically advancing state of one request.
#[derive(Debug)]
pub struct RequestStatus(AtomicU8);

impl Default for RequestStatus {
    fn default() -> Self {
        Self(AtomicU8::new(RequestState::Submitted as u8))
    }
}

impl RequestStatus {
    pub fn get(&self) -> RequestState {
        RequestState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `state` unless the request is already past it. Returns the previous state.
    pub fn advance(&self, state: RequestState) -> RequestState {
        RequestState::from_u8(self.0.fetch_max(state as u8, Ordering::AcqRel))
    }
}

/// Sending half of the one-shot channel a request is completed through.
#[derive(Debug)]
pub struct Completion {
    status: Arc<RequestStatus>,
    sender: Sender<Result<Vec<u64>>>,
}

impl Completion {
    /// Deliver the result. Consuming `self` makes a second completion impossible.
    pub fn complete(self, result: Result<Vec<u64>>) {
        self.status.advance(RequestState::Done);
        // the caller may have stopped waiting
        let _ = self.sender.send(result);
    }
}

/// Receiving half of a request's completion channel.
#[derive(Debug)]
pub struct Ticket {
    status: Arc<RequestStatus>,
    receiver: Receiver<Result<Vec<u64>>>,
}

impl Ticket {
    pub fn state(&self) -> RequestState {
        self.status.get()
    }

    /// Block until the request completes.
    pub fn wait(self) -> Result<Vec<u64>> {
        self.receiver.recv().map_err(|_| {
            KdError::Disconnected("request was dropped before completion".to_string())
        })?
    }
}

/// Unit of work handed to one device.
#[derive(Debug)]
pub struct Request {
    pub id: u64,
    pub mode: ExecutionMode,
    pub data: Arc<DataSet>,
    pub query: Arc<QuerySpec>,
    pub blocks: BlockSelection,
    status: Arc<RequestStatus>,
    completion: Completion,
}

impl Request {
    /// Create a request and the ticket its result will arrive on.
    pub fn new(
        id: u64,
        mode: ExecutionMode,
        data: Arc<DataSet>,
        query: Arc<QuerySpec>,
        blocks: BlockSelection,
    ) -> (Self, Ticket) {
        let status = Arc::new(RequestStatus::default());
        let (sender, receiver) = bounded(1);
        let request = Self {
            id,
            mode,
            data,
            query,
            blocks,
            status: status.clone(),
            completion: Completion {
                status: status.clone(),
                sender,
            },
        };
        (request, Ticket { status, receiver })
    }

    pub fn state(&self) -> RequestState {
        self.status.get()
    }

    /// Mark the request as picked up by a worker.
    pub fn start(&self) {
        self.status.advance(RequestState::Running);
    }

    pub fn complete(self, result: Result<Vec<u64>>) {
        self.completion.complete(result)
    }
}

/// The outstanding results of one submitted job.
#[derive(Debug)]
pub struct Pending {
    tickets: Vec<Ticket>,
    ready: Vec<u64>,
}

impl Pending {
    pub fn new(tickets: Vec<Ticket>) -> Self {
        Self {
            tickets,
            ready: vec![],
        }
    }

    /// A job whose results are already known.
    pub fn ready(results: Vec<u64>) -> Self {
        Self {
            tickets: vec![],
            ready: results,
        }
    }

    /// Number of requests this job was split into.
    pub fn requests(&self) -> usize {
        self.tickets.len()
    }

    /// Whether every request has completed.
    pub fn is_done(&self) -> bool {
        self.tickets
            .iter()
            .all(|t| t.state() == RequestState::Done)
    }

    /// Wait for every request and concatenate the results in request order.
    ///
    /// Every request is waited for even after a failure; the first failure is returned.
    pub fn wait(self) -> Result<Vec<u64>> {
        let mut results = self.ready;
        let mut failure = None;
        for ticket in self.tickets {
            match ticket.wait() {
                Ok(mut part) => results.append(&mut part),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}
