//! Running build work: the bounded executor, completion signalling and the
//! checks done before a work graph may run.

pub mod graph;
mod latch;
mod pool;
mod result;

pub use graph::check_for_cycles;
pub use latch::CountDownLatch;
pub use pool::BuildExecutor;
pub use result::{ExecutionResult, MultipleFailures};
