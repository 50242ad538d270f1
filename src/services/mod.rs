mod cleanup;
#[cfg(test)]
pub mod testing;

pub use cleanup::{CleanupError, CleanupService, ErrorKind};
