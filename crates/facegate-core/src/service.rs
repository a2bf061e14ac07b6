//! Verification service — one image in, one outcome out.
//!
//! No publishing or persistence happens here; the same primitive backs the
//! HTTP handler, the poll tick and the CLI.

use crate::catalog::Catalog;
use crate::provider::{EmbeddingProvider, FaceScan, ImageData, ProviderError};
use crate::resolver::{NearestResolver, Resolution, Resolver};
use crate::types::UNKNOWN_USER;
use serde::{Deserialize, Serialize};

/// Wire-shaped verification outcome: `{user, verified, [distance], [error]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub user: String,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationOutcome {
    /// Unverified UNKNOWN, the expected outcome for "no face detected".
    pub fn unknown() -> Self {
        Self {
            user: UNKNOWN_USER.to_string(),
            verified: false,
            distance: None,
            error: None,
        }
    }

    /// Unverified UNKNOWN carrying a human-readable failure description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            user: UNKNOWN_USER.to_string(),
            verified: false,
            distance: None,
            error: Some(error.into()),
        }
    }

    fn from_resolution(resolution: Resolution) -> Self {
        Self {
            user: resolution
                .identity
                .unwrap_or_else(|| UNKNOWN_USER.to_string()),
            verified: resolution.verified,
            distance: resolution.distance,
            error: None,
        }
    }
}

/// Verify one image against the catalog.
pub fn verify(
    provider: &mut dyn EmbeddingProvider,
    image: &ImageData,
    catalog: &Catalog,
    threshold: f32,
) -> VerificationOutcome {
    resolve_scan(provider.scan(image), catalog, threshold)
}

/// Map a provider scan result onto a verification outcome.
///
/// "No face" short-circuits without touching the resolver; provider
/// failures are reported in the `error` field, never propagated.
pub fn resolve_scan(
    scan: Result<FaceScan, ProviderError>,
    catalog: &Catalog,
    threshold: f32,
) -> VerificationOutcome {
    resolve_scan_with(&NearestResolver, scan, catalog, threshold)
}

pub fn resolve_scan_with(
    resolver: &dyn Resolver,
    scan: Result<FaceScan, ProviderError>,
    catalog: &Catalog,
    threshold: f32,
) -> VerificationOutcome {
    match scan {
        Err(error) => {
            tracing::warn!(%error, "embedding provider failed");
            VerificationOutcome::failure(error.to_string())
        }
        Ok(FaceScan::NoFace) => {
            tracing::debug!("no face detected");
            VerificationOutcome::unknown()
        }
        Ok(FaceScan::Face(embedding)) => {
            VerificationOutcome::from_resolution(resolver.resolve(&embedding, catalog, threshold))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::types::Embedding;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn emb(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model: "test".into(),
        }
    }

    fn alice_bob_catalog() -> Catalog {
        Catalog::from_entries(vec![
            CatalogEntry {
                identity: "alice".into(),
                references: vec![emb(&[0.3])],
            },
            CatalogEntry {
                identity: "bob".into(),
                references: vec![emb(&[-0.9])],
            },
        ])
    }

    /// Resolver double that counts invocations.
    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl Resolver for CountingResolver {
        fn resolve(&self, probe: &Embedding, catalog: &Catalog, threshold: f32) -> Resolution {
            self.calls.fetch_add(1, Ordering::SeqCst);
            NearestResolver.resolve(probe, catalog, threshold)
        }
    }

    #[test]
    fn face_scan_resolves_against_catalog() {
        let outcome = resolve_scan(
            Ok(FaceScan::Face(emb(&[0.0]))),
            &alice_bob_catalog(),
            0.7,
        );
        assert!(outcome.verified);
        assert_eq!(outcome.user, "alice");
        assert!((outcome.distance.unwrap() - 0.3).abs() < 1e-6);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn no_face_short_circuits_without_resolver_call() {
        let resolver = CountingResolver {
            calls: AtomicUsize::new(0),
        };
        let outcome = resolve_scan_with(
            &resolver,
            Ok(FaceScan::NoFace),
            &alice_bob_catalog(),
            0.7,
        );

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.user, UNKNOWN_USER);
        assert!(!outcome.verified);
        assert!(outcome.distance.is_none());
        assert!(outcome.error.is_none());
    }

    #[test]
    fn provider_failure_is_reported_not_propagated() {
        let outcome = resolve_scan(
            Err(ProviderError::Decode("truncated jpeg".into())),
            &alice_bob_catalog(),
            0.7,
        );

        assert_eq!(outcome.user, UNKNOWN_USER);
        assert!(!outcome.verified);
        let error = outcome.error.unwrap();
        assert!(error.contains("truncated jpeg"));
    }

    #[test]
    fn outcome_serializes_without_absent_fields() {
        let json = serde_json::to_value(VerificationOutcome::unknown()).unwrap();
        assert_eq!(json["user"], "UNKNOWN");
        assert_eq!(json["verified"], false);
        assert!(json.get("distance").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn verified_outcome_serializes_distance() {
        let outcome = resolve_scan(
            Ok(FaceScan::Face(emb(&[0.0]))),
            &alice_bob_catalog(),
            0.7,
        );
        let json = serde_json::to_value(outcome).unwrap();
        assert_eq!(json["user"], "alice");
        assert_eq!(json["verified"], true);
        assert!(json["distance"].as_f64().is_some());
    }
}
