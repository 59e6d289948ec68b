//! # Custom Resource Definitions
//!
//! Resource types read and written by the HTTP-01 solver controller.
//!
//! ## Module Structure
//!
//! - `challenge.rs` - ACME `Challenge` resource (input, read-only to this crate)
//! - `solver.rs` - HTTP-01 solver configuration carried on a `Challenge`
//! - `gateway.rs` - Gateway API `HTTPRoute` resource
//!
//! The schemas of these resources are owned by their upstream projects, so the
//! derives below disable schema generation.

mod challenge;
mod gateway;
mod solver;

// Re-export all public types
pub use challenge::{
    Challenge, ChallengeSpec, ChallengeState, ChallengeStatus, ChallengeType, IssuerReference,
};
pub use gateway::{
    HttpBackendRef, HttpPathMatch, HttpRoute, HttpRouteMatch, HttpRouteRule, HttpRouteSpec,
    ParentReference,
};
pub use solver::{
    AcmeChallengeSolver, AcmeChallengeSolverHttp01, Http01GatewayHttpRouteSolver,
    Http01IngressSolver, ObjectMetaTemplate, PodSpecTemplate, PodTemplate,
};
