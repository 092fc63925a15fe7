//! Reliability primitives.

pub mod retry;
