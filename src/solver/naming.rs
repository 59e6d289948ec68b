//! # Naming and Labels
//!
//! Every object the solver creates, and every rule fragment it merges into a
//! shared object, is derived from the Challenge identity alone:
//!
//! - names: `cm-acme-http-solver-<readable dns name>-<identity hash>`
//! - labels: solver marker plus hashes of identity, domain, token and owner
//! - annotations: the Challenge reference, read back by the orphan sweep
//!
//! Re-running with the same Challenge always computes the same names, which
//! is what makes create-if-absent safe without any locking.

use crate::crd::Challenge;
use crate::solver::ACME_CHALLENGE_PATH_PREFIX;
use crate::store::Labels;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Marks every solver-owned object
pub const SOLVER_LABEL: &str = "acme.cert-manager.io/http01-solver";
/// Hash of the full identity tuple
pub const IDENTITY_LABEL: &str = "acme.cert-manager.io/http-identity";
pub const DOMAIN_LABEL: &str = "acme.cert-manager.io/http-domain";
pub const TOKEN_LABEL: &str = "acme.cert-manager.io/http-token";
pub const OWNER_LABEL: &str = "acme.cert-manager.io/http-owner";
/// Marks an Ingress or HTTPRoute the solver created wholesale
pub const ROUTE_OWNER_LABEL: &str = "acme.cert-manager.io/http01-route-owner";

pub const CHALLENGE_NAME_ANNOTATION: &str = "acme.cert-manager.io/challenge-name";
pub const CHALLENGE_NAMESPACE_ANNOTATION: &str = "acme.cert-manager.io/challenge-namespace";
pub const DNS_NAME_ANNOTATION: &str = "acme.cert-manager.io/http-dns-name";

/// Label the ACME client puts on challenges created for a Certificate
pub const CERTIFICATE_NAME_LABEL: &str = "acme.cert-manager.io/certificate-name";

const NAME_PREFIX: &str = "cm-acme-http-solver";
const HASH_LEN: usize = 16;

/// Resource kinds with their own name length limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Pod,
    /// DNS-1035 label
    Service,
    Ingress,
    HttpRoute,
}

impl NameKind {
    #[must_use]
    pub fn max_len(self) -> usize {
        match self {
            NameKind::Service => 63,
            NameKind::Pod | NameKind::Ingress | NameKind::HttpRoute => 253,
        }
    }
}

/// Identity of one Challenge as far as the solver is concerned
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeIdentity {
    pub namespace: String,
    pub name: String,
    /// Certificate owner, empty when the Challenge carries none
    pub owner: String,
    pub dns_name: String,
    pub token: String,
}

impl ChallengeIdentity {
    #[must_use]
    pub fn from_challenge(challenge: &Challenge) -> Self {
        Self {
            namespace: challenge.metadata.namespace.clone().unwrap_or_default(),
            name: challenge.metadata.name.clone().unwrap_or_default(),
            owner: certificate_owner(&challenge.metadata),
            dns_name: challenge.spec.dns_name.clone(),
            token: challenge.spec.token.clone(),
        }
    }

    /// 16 hex character hash of the whole identity tuple
    #[must_use]
    pub fn hash(&self) -> String {
        short_hash(&[
            &self.namespace,
            &self.name,
            &self.owner,
            &self.dns_name,
            &self.token,
        ])
    }

    /// Full label set stamped on every solver-owned object
    #[must_use]
    pub fn labels(&self) -> Labels {
        let mut labels = solver_selector(&self.hash());
        labels.insert(DOMAIN_LABEL.to_string(), short_hash(&[&self.dns_name]));
        labels.insert(TOKEN_LABEL.to_string(), short_hash(&[&self.token]));
        labels.insert(OWNER_LABEL.to_string(), short_hash(&[&self.owner]));
        labels
    }

    /// Annotations pointing back at the Challenge
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CHALLENGE_NAME_ANNOTATION.to_string(), self.name.clone()),
            (
                CHALLENGE_NAMESPACE_ANNOTATION.to_string(),
                self.namespace.clone(),
            ),
            (DNS_NAME_ANNOTATION.to_string(), self.dns_name.clone()),
        ])
    }

    #[must_use]
    pub fn resource_name(&self, kind: NameKind) -> String {
        resource_name(&self.dns_name, &self.hash(), kind)
    }

    /// `/.well-known/acme-challenge/<token>`
    #[must_use]
    pub fn challenge_path(&self) -> String {
        format!("{ACME_CHALLENGE_PATH_PREFIX}{}", self.token)
    }

    /// Reference sufficient for cleanup once the Challenge is gone
    #[must_use]
    pub fn solver_ref(&self) -> SolverRef {
        SolverRef {
            namespace: self.namespace.clone(),
            identity_hash: self.hash(),
            dns_name: self.dns_name.clone(),
        }
    }
}

/// What cleanup needs to find a solver resource set: the namespace, the
/// identity hash carried in labels, and the DNS name that shaped the names
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SolverRef {
    pub namespace: String,
    pub identity_hash: String,
    pub dns_name: String,
}

impl SolverRef {
    /// Selects every object of this resource set
    #[must_use]
    pub fn selector(&self) -> Labels {
        solver_selector(&self.identity_hash)
    }

    #[must_use]
    pub fn resource_name(&self, kind: NameKind) -> String {
        resource_name(&self.dns_name, &self.identity_hash, kind)
    }
}

/// Selects every solver-owned object regardless of identity
#[must_use]
pub fn all_solvers_selector() -> Labels {
    BTreeMap::from([(SOLVER_LABEL.to_string(), "true".to_string())])
}

/// Identity hash carried in a solver resource name, `None` for any name the
/// solver did not generate. Merged fragments have no labels, so this is how
/// the sweep attributes them.
#[must_use]
pub fn identity_hash_of(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(NAME_PREFIX)?.strip_prefix('-')?;
    let split = rest.len().checked_sub(HASH_LEN)?;
    let readable = rest.get(..split)?;
    let hash = rest.get(split..)?;
    let well_formed = (readable.is_empty() || readable.ends_with('-'))
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    well_formed.then_some(hash)
}

fn solver_selector(identity_hash: &str) -> Labels {
    let mut labels = all_solvers_selector();
    labels.insert(IDENTITY_LABEL.to_string(), identity_hash.to_string());
    labels
}

/// `controller` owner reference first, then the certificate-name label
fn certificate_owner(meta: &ObjectMeta) -> String {
    let controller = meta
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true));
    if let Some(owner) = controller {
        return format!("{}/{}", owner.kind, owner.name);
    }
    meta.labels
        .as_ref()
        .and_then(|l| l.get(CERTIFICATE_NAME_LABEL))
        .cloned()
        .unwrap_or_default()
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(HASH_LEN);
    hex
}

fn readable_dns_name(dns_name: &str) -> String {
    let lowered = dns_name.to_ascii_lowercase();
    let trimmed = lowered.strip_prefix("*.").unwrap_or(&lowered);
    trimmed
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}

/// Cut the readable part first, then the prefix; the hash always survives
fn resource_name(dns_name: &str, identity_hash: &str, kind: NameKind) -> String {
    let max = kind.max_len();
    let readable = readable_dns_name(dns_name);

    if !readable.is_empty() {
        let full = format!("{NAME_PREFIX}-{readable}-{identity_hash}");
        if full.len() <= max {
            return full;
        }
        let fixed = NAME_PREFIX.len() + identity_hash.len() + 2;
        if let Some(room) = max.checked_sub(fixed) {
            let cut = readable[..room.min(readable.len())].trim_end_matches('-');
            if !cut.is_empty() {
                return format!("{NAME_PREFIX}-{cut}-{identity_hash}");
            }
        }
    }

    let room = max.saturating_sub(identity_hash.len() + 1);
    let prefix = NAME_PREFIX[..room.min(NAME_PREFIX.len())].trim_end_matches('-');
    if prefix.is_empty() {
        identity_hash.to_string()
    } else {
        format!("{prefix}-{identity_hash}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(dns_name: &str, token: &str) -> ChallengeIdentity {
        ChallengeIdentity {
            namespace: "default".to_string(),
            name: "example-com-1".to_string(),
            owner: "Order/example-com-1".to_string(),
            dns_name: dns_name.to_string(),
            token: token.to_string(),
        }
    }

    #[test]
    fn test_names_are_deterministic_and_hash_suffixed() {
        let a = identity("example.com", "tok1");
        let hash = a.hash();

        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.hash(), identity("example.com", "tok1").hash());
        assert_eq!(
            a.resource_name(NameKind::Pod),
            format!("cm-acme-http-solver-example-com-{hash}")
        );
    }

    #[test]
    fn test_every_identity_field_changes_the_hash() {
        let base = identity("example.com", "tok1");
        let variants = [
            ChallengeIdentity {
                namespace: "other".to_string(),
                ..base.clone()
            },
            ChallengeIdentity {
                name: "example-com-2".to_string(),
                ..base.clone()
            },
            ChallengeIdentity {
                owner: "Order/other".to_string(),
                ..base.clone()
            },
            identity("www.example.com", "tok1"),
            identity("example.com", "tok2"),
        ];
        for variant in variants {
            assert_ne!(variant.hash(), base.hash(), "{variant:?}");
        }
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        let a = ChallengeIdentity {
            dns_name: "ab".to_string(),
            token: "c".to_string(),
            ..identity("", "")
        };
        let b = ChallengeIdentity {
            dns_name: "a".to_string(),
            token: "bc".to_string(),
            ..identity("", "")
        };
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_long_names_cut_readable_part_first() {
        let long = format!("{}.example.com", "a".repeat(80));
        let id = identity(&long, "tok1");
        let hash = id.hash();

        let service = id.resource_name(NameKind::Service);
        assert!(service.len() <= 63, "{service}");
        assert!(service.starts_with("cm-acme-http-solver-aaaa"));
        assert!(service.ends_with(&format!("-{hash}")));

        let pod = id.resource_name(NameKind::Pod);
        assert_eq!(pod, format!("cm-acme-http-solver-{}-example-com-{hash}", "a".repeat(80)));
    }

    #[test]
    fn test_wildcard_and_odd_characters_are_sanitised() {
        let id = identity("*.Example.COM", "tok1");
        assert_eq!(
            id.resource_name(NameKind::Ingress),
            format!("cm-acme-http-solver-example-com-{}", id.hash())
        );

        let empty = identity("*.", "tok1");
        assert_eq!(
            empty.resource_name(NameKind::Service),
            format!("cm-acme-http-solver-{}", empty.hash())
        );
    }

    #[test]
    fn test_hash_is_never_cut() {
        let hash = "0123456789abcdef";
        assert_eq!(
            resource_name("example.com", hash, NameKind::Service).len(),
            "cm-acme-http-solver-example-com-".len() + 16
        );
        let long = "x".repeat(300);
        for kind in [NameKind::Service, NameKind::Pod] {
            let name = resource_name(&long, hash, kind);
            assert_eq!(name.len(), kind.max_len());
            assert!(name.ends_with(&format!("-{hash}")));
        }
    }

    #[test]
    fn test_identity_hash_is_recovered_from_generated_names() {
        let long = format!("{}.example.com", "a".repeat(80));
        for id in [identity("example.com", "tok1"), identity(&long, "tok1"), identity("*.", "tok1")] {
            let hash = id.hash();
            for kind in [NameKind::Service, NameKind::Pod] {
                assert_eq!(identity_hash_of(&id.resource_name(kind)), Some(hash.as_str()));
            }
        }
    }

    #[test]
    fn test_identity_hash_rejects_other_names() {
        for name in [
            "web",
            "cm-acme-http-solver",
            "cm-acme-http-solver-example-com",
            "cm-acme-http-solver-example-com-0123456789ABCDEF",
            "cm-acme-http-solver-example-com0123456789abcdef",
            "other-example-com-0123456789abcdef",
            "cm-acme-http-solver-é0123456789abcde",
        ] {
            assert_eq!(identity_hash_of(name), None, "{name}");
        }
    }

    #[test]
    fn test_labels_never_carry_raw_values() {
        let id = identity("example.com", "tok1");
        let labels = id.labels();

        assert_eq!(labels.get(SOLVER_LABEL).map(String::as_str), Some("true"));
        assert_eq!(labels.get(IDENTITY_LABEL), Some(&id.hash()));
        for key in [DOMAIN_LABEL, TOKEN_LABEL, OWNER_LABEL] {
            let value = labels.get(key).unwrap();
            assert_eq!(value.len(), 16);
        }
        assert!(labels.values().all(|v| v != "example.com" && v != "tok1"));
    }

    #[test]
    fn test_solver_ref_recomputes_the_same_names() {
        let id = identity("example.com", "tok1");
        let solver_ref = id.solver_ref();

        for kind in [NameKind::Pod, NameKind::Service, NameKind::Ingress, NameKind::HttpRoute] {
            assert_eq!(solver_ref.resource_name(kind), id.resource_name(kind));
        }
        assert!(crate::store::matches_selector(
            Some(&id.labels()),
            &solver_ref.selector()
        ));
    }

    #[test]
    fn test_owner_prefers_controller_reference() {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

        let mut meta = ObjectMeta {
            labels: Some(BTreeMap::from([(
                CERTIFICATE_NAME_LABEL.to_string(),
                "example-com".to_string(),
            )])),
            ..Default::default()
        };
        assert_eq!(certificate_owner(&meta), "example-com");

        meta.owner_references = Some(vec![OwnerReference {
            api_version: "acme.cert-manager.io/v1".to_string(),
            kind: "Order".to_string(),
            name: "example-com-123".to_string(),
            uid: "uid".to_string(),
            controller: Some(true),
            block_owner_deletion: None,
        }]);
        assert_eq!(certificate_owner(&meta), "Order/example-com-123");

        assert_eq!(certificate_owner(&ObjectMeta::default()), "");
    }

    #[test]
    fn test_challenge_path() {
        assert_eq!(
            identity("example.com", "tok1").challenge_path(),
            "/.well-known/acme-challenge/tok1"
        );
    }
}
