mod cleanup;
mod validators;

pub use cleanup::*;
pub use validators::*;
