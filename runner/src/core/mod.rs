//! Deterministic, pure logic for the coordination core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (work items, comment windows, transcripts) and return deterministic
//! outputs suitable for tests.

pub mod claim;
pub mod classifier;
pub mod priority;
pub mod retry;
pub mod selector;
pub mod types;
