//! Retry and backoff helpers shared by the queue and the sync coordinator.

pub mod retry;
