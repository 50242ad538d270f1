//! Background execution of cleanup runs.
//!
//! - **Task Registry**: in-memory records of async runs, polled over HTTP and
//!   expired a fixed retention window after they finish.
//! - **Cleanup Dispatcher**: starts runs on the shared task tracker and keeps
//!   their registry records up to date.

mod cleanup_dispatcher;
mod task_registry;

#[cfg(test)]
pub(crate) use cleanup_dispatcher::wait_for_terminal;
pub use cleanup_dispatcher::CleanupDispatcher;
pub use task_registry::TaskRegistry;
