//! Devices: one thread, one request queue and one pre-reserved arena each.
//!
//! A device works on one request at a time. Its candidate blocks are staged into the arena in
//! batches sized by what the arena has left after the query tables, and filtered there by the
//! kernels in [`kernels`].

mod kernels;
mod pool;
mod worker;

pub use pool::DevicePool;
pub use worker::Task;

#[cfg(test)]
mod test;
