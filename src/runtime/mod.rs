//! # Runtime
//!
//! Process-level wiring of the controller binary.
//!
//! - `initialization`: crypto provider, tracing, metrics, probe server, Kubernetes client
//! - `watch_loop`: kube-runtime `Controller` over Challenges
//! - `error_policy`: requeue decisions for failed reconciliations
//! - `sweep`: periodic orphan cleanup

pub mod error_policy;
pub mod initialization;
pub mod sweep;
pub mod watch_loop;
