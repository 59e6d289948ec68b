//! ACME HTTP-01 Solver Controller Library
//!
//! Provisions the in-cluster serving path an ACME CA probes to validate an
//! HTTP-01 challenge (a responder Pod, a Service, and an Ingress path or a
//! Gateway API HTTPRoute rule) and removes it once the challenge is resolved.
//!
//! Tests are included in the module files and under `tests/`.

pub mod acmesolver;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod solver;
pub mod store;
