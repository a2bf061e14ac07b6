//! Identity resolution — nearest reference embedding under a threshold.

use crate::catalog::Catalog;
use crate::types::Embedding;

/// Decision produced by resolving a probe embedding against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Matched identity when verified.
    pub identity: Option<String>,
    pub verified: bool,
    /// Distance of the nearest reference, kept on non-matches for
    /// diagnostics. Absent when the catalog holds no embeddings.
    pub distance: Option<f32>,
}

impl Resolution {
    pub fn unknown() -> Self {
        Self {
            identity: None,
            verified: false,
            distance: None,
        }
    }
}

/// Strategy for resolving a probe embedding against the reference catalog.
pub trait Resolver {
    fn resolve(&self, probe: &Embedding, catalog: &Catalog, threshold: f32) -> Resolution;
}

/// Linear nearest-neighbor resolver.
///
/// Scans every reference embedding of every catalog entry and tracks the
/// single globally minimal L2 distance. Ties break to the first
/// identity/embedding encountered in catalog entry order (the running best
/// is only replaced on a strictly smaller distance), so results are
/// deterministic for a given catalog. Verification requires the minimal
/// distance to be strictly below the threshold.
///
/// Deliberately O(identities × references) per call: catalogs hold tens of
/// people with a handful of references each.
pub struct NearestResolver;

impl Resolver for NearestResolver {
    fn resolve(&self, probe: &Embedding, catalog: &Catalog, threshold: f32) -> Resolution {
        let mut best: Option<(&str, f32)> = None;

        for entry in catalog.entries() {
            for reference in &entry.references {
                let distance = probe.distance(reference);
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((entry.identity.as_str(), distance));
                }
            }
        }

        match best {
            None => Resolution::unknown(),
            Some((identity, distance)) if distance < threshold => Resolution {
                identity: Some(identity.to_string()),
                verified: true,
                distance: Some(distance),
            },
            Some((identity, distance)) => {
                tracing::debug!(
                    nearest = identity,
                    distance,
                    threshold,
                    "nearest reference above threshold"
                );
                Resolution {
                    identity: None,
                    verified: false,
                    distance: Some(distance),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    fn emb(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
            model: "test".into(),
        }
    }

    fn catalog(entries: &[(&str, Vec<Embedding>)]) -> Catalog {
        Catalog::from_entries(
            entries
                .iter()
                .map(|(identity, references)| CatalogEntry {
                    identity: identity.to_string(),
                    references: references.clone(),
                })
                .collect(),
        )
    }

    #[test]
    fn resolves_nearest_identity_under_threshold() {
        // alice at distance 0.3, bob at 0.9, threshold 0.7
        let c = catalog(&[
            ("alice", vec![emb(&[0.3])]),
            ("bob", vec![emb(&[-0.9])]),
        ]);
        let r = NearestResolver.resolve(&emb(&[0.0]), &c, 0.7);

        assert!(r.verified);
        assert_eq!(r.identity.as_deref(), Some("alice"));
        assert!((r.distance.unwrap() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn nearest_above_threshold_is_unknown() {
        // nearest is bob at 0.75, threshold 0.7
        let c = catalog(&[
            ("alice", vec![emb(&[0.8])]),
            ("bob", vec![emb(&[-0.75])]),
        ]);
        let r = NearestResolver.resolve(&emb(&[0.0]), &c, 0.7);

        assert!(!r.verified);
        assert_eq!(r.identity, None);
        assert!((r.distance.unwrap() - 0.75).abs() < 1e-6);
    }

    #[test]
    fn empty_catalog_is_unknown_without_distance() {
        let r = NearestResolver.resolve(&emb(&[0.0]), &Catalog::default(), 0.7);
        assert_eq!(r, Resolution::unknown());
    }

    #[test]
    fn distance_equal_to_threshold_does_not_verify() {
        let c = catalog(&[("alice", vec![emb(&[0.7])])]);
        let r = NearestResolver.resolve(&emb(&[0.0]), &c, 0.7);

        assert!(!r.verified);
        assert_eq!(r.identity, None);
        assert!((r.distance.unwrap() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn tie_breaks_to_first_entry_in_catalog_order() {
        // Both references sit at exactly the same distance from the probe.
        let c = catalog(&[
            ("first", vec![emb(&[0.5])]),
            ("second", vec![emb(&[-0.5])]),
        ]);
        for _ in 0..10 {
            let r = NearestResolver.resolve(&emb(&[0.0]), &c, 0.7);
            assert_eq!(r.identity.as_deref(), Some("first"));
        }
    }

    #[test]
    fn tie_breaks_to_first_reference_within_entry() {
        let c = catalog(&[("alice", vec![emb(&[0.5]), emb(&[-0.5])])]);
        let r = NearestResolver.resolve(&emb(&[0.0]), &c, 0.7);
        assert!(r.verified);
        assert!((r.distance.unwrap() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn scans_all_references_of_all_identities() {
        // Best match is the last reference of the last identity.
        let c = catalog(&[
            ("decoy", vec![emb(&[2.0]), emb(&[3.0])]),
            ("match", vec![emb(&[1.5]), emb(&[0.1])]),
        ]);
        let r = NearestResolver.resolve(&emb(&[0.0]), &c, 0.7);

        assert!(r.verified);
        assert_eq!(r.identity.as_deref(), Some("match"));
        assert!((r.distance.unwrap() - 0.1).abs() < 1e-6);
    }
}
