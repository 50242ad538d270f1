mod cleanup;

pub use cleanup::*;
