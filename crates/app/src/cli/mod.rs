pub mod args;
pub mod op;
pub mod ops;

pub use ops::{List, Sign, Timestamp, Unsign, Verify, Version};
