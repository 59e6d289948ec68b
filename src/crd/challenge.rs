//! # Challenge
//!
//! The ACME `Challenge` resource. One Challenge describes one pending proof of
//! domain control: the DNS name, the validation token, the key authorization
//! the responder must serve, and the solver to use.
//!
//! This crate never writes Challenge objects; it reads them to decide whether
//! to solve or to clean up.

use crate::crd::solver::AcmeChallengeSolver;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Challenge Custom Resource
///
/// # Example
///
/// ```yaml
/// apiVersion: acme.cert-manager.io/v1
/// kind: Challenge
/// metadata:
///   name: example-com-2745722290-1
///   namespace: default
/// spec:
///   type: HTTP-01
///   dnsName: example.com
///   token: tok1
///   key: tok1.thumbprint
///   solver:
///     http01:
///       ingress:
///         ingressClassName: nginx
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "acme.cert-manager.io",
    version = "v1",
    kind = "Challenge",
    namespaced,
    status = "ChallengeStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeSpec {
    /// ACME challenge URL
    #[serde(default)]
    pub url: String,
    /// ACME authorization URL this challenge belongs to
    #[serde(default, rename = "authorizationURL")]
    pub authorization_url: String,
    /// DNS name being validated
    pub dns_name: String,
    /// Whether the authorization is for a wildcard name
    #[serde(default)]
    pub wildcard: bool,
    /// ACME challenge type
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// Validation token issued by the CA
    pub token: String,
    /// Key authorization the responder must return
    pub key: String,
    /// Solver configuration selected for this challenge
    pub solver: AcmeChallengeSolver,
    /// Issuer that created the order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_ref: Option<IssuerReference>,
}

/// ACME challenge type
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum ChallengeType {
    #[serde(rename = "HTTP-01")]
    Http01,
    #[serde(rename = "DNS-01")]
    Dns01,
}

/// Reference to the issuer of the owning order
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Status of a Challenge, written by the ACME client
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeStatus {
    /// Whether the ACME client is currently processing this challenge
    #[serde(default)]
    pub processing: bool,
    /// Whether the solver has been presented to the CA
    #[serde(default)]
    pub presented: bool,
    /// Human readable reason for the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// ACME state of the challenge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ChallengeState>,
}

/// ACME challenge state as reported by the CA
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeState {
    Valid,
    Ready,
    Pending,
    Processing,
    Invalid,
    Expired,
    Errored,
}

impl ChallengeState {
    /// Final states: the CA will not probe the solver again
    #[must_use]
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ChallengeState::Valid
                | ChallengeState::Invalid
                | ChallengeState::Expired
                | ChallengeState::Errored
        )
    }
}

impl Challenge {
    /// Current ACME state, if the ACME client has recorded one
    #[must_use]
    pub fn state(&self) -> Option<ChallengeState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    /// True once the challenge is resolved or being deleted
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.metadata.deletion_timestamp.is_some() || self.state().is_some_and(ChallengeState::is_final)
    }
}
