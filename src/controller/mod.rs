//! # Controller
//!
//! - `backoff`: Fibonacci backoff for transient errors
//! - `reconciler`: per-Challenge reconciliation

pub mod backoff;
pub mod reconciler;
