//! In-memory doubles for tests and benchmarks.
mod in_memory;

pub use in_memory::{InMemoryRecords, InMemorySink};
