//! Deterministic, pure logic shared by the workflow components.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod errors;
pub mod message;
pub mod policy;
pub mod retry;
pub mod types;
