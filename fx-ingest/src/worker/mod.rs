//! Bounded pool for delegating slow calls off scheduled tasks.

mod pool;

pub use pool::{WorkerPool, WorkerPoolConfig};
