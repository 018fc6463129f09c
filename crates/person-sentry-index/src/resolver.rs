use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use person_sentry_types::{Embedding, PersonRecord};

use crate::store::{IdentityStore, IndexError, IndexResult, Metric, Placement};

/// Known/new decision rule. Exactly one comparison direction per rule, both
/// inclusive at the boundary; the pairing with the store metric is validated
/// when the resolver is built, so a deployment cannot mix directions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DecisionRule {
    /// Distance metric: smaller is more similar; known when
    /// `score <= threshold`.
    DistanceWithin(f32),
    /// Similarity metric: larger is more similar; known when
    /// `score >= threshold`.
    SimilarityAtLeast(f32),
}

impl DecisionRule {
    pub fn is_known(&self, score: f32) -> bool {
        match self {
            DecisionRule::DistanceWithin(threshold) => score <= *threshold,
            DecisionRule::SimilarityAtLeast(threshold) => score >= *threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionRule::DistanceWithin(_) => "distance-within",
            DecisionRule::SimilarityAtLeast(_) => "similarity-at-least",
        }
    }

    fn pairs_with(&self, metric: Metric) -> bool {
        matches!(
            (self, metric),
            (DecisionRule::DistanceWithin(_), Metric::L2)
                | (DecisionRule::SimilarityAtLeast(_), Metric::Cosine)
        )
    }
}

/// Outcome of one identity resolution.
#[derive(Debug)]
pub struct Resolution {
    pub person_id: String,
    pub is_new: bool,
    /// Nearest-neighbor score when a search ran and returned a neighbor.
    pub score: Option<f32>,
    /// Store failure absorbed by the fail-safe "treat as new" policy. The
    /// caller is expected to log it prominently: every absorbed fault can
    /// inflate the identity count.
    pub fault: Option<IndexError>,
}

/// Turns an embedding into a known/new decision plus a stable identifier.
///
/// The search and the insert are not atomic as a pair unless the store
/// serializes them (the in-memory index serializes its
/// `search_then_insert`); two replicas resolving the same person
/// concurrently may both mint an identity, and so may two in-process
/// resolutions racing through the empty-store bootstrap, which inserts
/// without searching. Strict uniqueness needs a store-level conditional
/// insert or a single serializing writer.
pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    rule: DecisionRule,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("rule", &self.rule)
            .field("metric", &self.store.metric())
            .finish()
    }
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn IdentityStore>, rule: DecisionRule) -> IndexResult<Self> {
        if !rule.pairs_with(store.metric()) {
            return Err(IndexError::MismatchedRule {
                rule: rule.as_str(),
                metric: store.metric().as_str(),
            });
        }
        Ok(Self { store, rule })
    }

    pub fn rule(&self) -> DecisionRule {
        self.rule
    }

    /// Resolves one embedding. Only a dimension mismatch is returned as an
    /// error (a misconfigured extractor); store unavailability is absorbed
    /// by the fail-safe policy and surfaced in `Resolution::fault`.
    pub fn resolve(&self, embedding: &Embedding) -> IndexResult<Resolution> {
        if embedding.dimension() != self.store.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.store.dimension(),
                got: embedding.dimension(),
            });
        }

        let candidate = PersonRecord::new(
            Uuid::new_v4().to_string(),
            embedding.clone(),
            Utc::now(),
        );
        let candidate_id = candidate.id().to_string();

        // Empty store short-circuits to "new" without a search.
        match self.store.is_empty() {
            Ok(true) => {
                let fault = self.store.insert(candidate).err();
                return Ok(Resolution {
                    person_id: candidate_id,
                    is_new: true,
                    score: None,
                    fault,
                });
            }
            Ok(false) => {}
            Err(err) => return Ok(self.fail_safe(candidate_id, err)),
        }

        let rule = self.rule;
        match self
            .store
            .search_then_insert(candidate, &|score| rule.is_known(score))
        {
            Ok(Placement::Matched(hit)) => Ok(Resolution {
                person_id: hit.person_id,
                is_new: false,
                score: Some(hit.score),
                fault: None,
            }),
            Ok(Placement::Inserted) => Ok(Resolution {
                person_id: candidate_id,
                is_new: true,
                score: None,
                fault: None,
            }),
            Err(err) => Ok(self.fail_safe(candidate_id, err)),
        }
    }

    /// Availability over precision: a store failure classifies the person as
    /// new rather than silently dropping a possible alert.
    fn fail_safe(&self, person_id: String, err: IndexError) -> Resolution {
        warn!(error = %err, "identity store failed, treating person as new");
        Resolution {
            person_id,
            is_new: true,
            score: None,
            fault: Some(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryIndex;
    use crate::store::SearchHit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn embedding(values: Vec<f32>) -> Embedding {
        Embedding::from_vec(values).unwrap()
    }

    fn l2_resolver(dimension: usize, threshold: f32) -> IdentityResolver {
        let store = Arc::new(InMemoryIndex::new(Metric::L2, dimension));
        IdentityResolver::new(store, DecisionRule::DistanceWithin(threshold)).unwrap()
    }

    #[test]
    fn mismatched_rule_and_metric_is_rejected_up_front() {
        let store = Arc::new(InMemoryIndex::new(Metric::L2, 2));
        let err = IdentityResolver::new(store, DecisionRule::SimilarityAtLeast(0.9)).unwrap_err();
        assert!(matches!(err, IndexError::MismatchedRule { .. }));
    }

    #[test]
    fn resolving_twice_yields_new_then_known_with_the_same_id() {
        let resolver = l2_resolver(2, 0.3);
        let probe = embedding(vec![0.25, 0.5]);

        let first = resolver.resolve(&probe).unwrap();
        assert!(first.is_new);
        assert!(first.fault.is_none());

        let second = resolver.resolve(&probe).unwrap();
        assert!(!second.is_new);
        assert_eq!(second.person_id, first.person_id);
        assert_eq!(second.score, Some(0.0));
    }

    #[test]
    fn boundary_distance_is_classified_known_inclusively() {
        // 0.25 is exactly representable, so the boundary comparison is exact.
        let resolver = l2_resolver(2, 0.25);
        let first = resolver.resolve(&embedding(vec![0.0, 0.0])).unwrap();
        let at_boundary = resolver.resolve(&embedding(vec![0.25, 0.0])).unwrap();
        assert!(!at_boundary.is_new);
        assert_eq!(at_boundary.person_id, first.person_id);
        assert_eq!(at_boundary.score, Some(0.25));

        let beyond = resolver.resolve(&embedding(vec![0.5, 0.0])).unwrap();
        assert!(beyond.is_new);
    }

    #[test]
    fn similarity_boundary_is_also_inclusive() {
        assert!(DecisionRule::SimilarityAtLeast(0.9).is_known(0.9));
        assert!(!DecisionRule::SimilarityAtLeast(0.9).is_known(0.89));
        assert!(DecisionRule::DistanceWithin(0.3).is_known(0.3));
        assert!(!DecisionRule::DistanceWithin(0.3).is_known(0.31));
    }

    #[test]
    fn dimension_mismatch_is_an_error_not_a_resolution() {
        let resolver = l2_resolver(4, 0.3);
        let err = resolver.resolve(&embedding(vec![1.0, 2.0])).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    /// Store wrapper that counts searches, to prove the empty-store
    /// short-circuit never queries.
    struct CountingStore {
        inner: InMemoryIndex,
        searches: AtomicUsize,
    }

    impl IdentityStore for CountingStore {
        fn metric(&self) -> Metric {
            self.inner.metric()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn is_empty(&self) -> IndexResult<bool> {
            self.inner.is_empty()
        }

        fn insert(&self, record: PersonRecord) -> IndexResult<()> {
            self.inner.insert(record)
        }

        fn search(&self, embedding: &Embedding) -> IndexResult<Option<SearchHit>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search(embedding)
        }

        fn search_then_insert(
            &self,
            candidate: PersonRecord,
            is_match: &dyn Fn(f32) -> bool,
        ) -> IndexResult<Placement> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search_then_insert(candidate, is_match)
        }
    }

    #[test]
    fn empty_store_short_circuits_without_searching() {
        let store = Arc::new(CountingStore {
            inner: InMemoryIndex::new(Metric::L2, 2),
            searches: AtomicUsize::new(0),
        });
        let resolver =
            IdentityResolver::new(store.clone(), DecisionRule::DistanceWithin(0.3)).unwrap();

        let resolution = resolver.resolve(&embedding(vec![1.0, 2.0])).unwrap();
        assert!(resolution.is_new);
        assert_eq!(store.searches.load(Ordering::SeqCst), 0);

        resolver.resolve(&embedding(vec![1.0, 2.0])).unwrap();
        assert_eq!(store.searches.load(Ordering::SeqCst), 1);
    }

    /// Store that always fails, for the fail-safe policy.
    struct FailingStore {
        dimension: usize,
    }

    impl IdentityStore for FailingStore {
        fn metric(&self) -> Metric {
            Metric::L2
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn is_empty(&self) -> IndexResult<bool> {
            Err(IndexError::unavailable("connection refused"))
        }

        fn insert(&self, _record: PersonRecord) -> IndexResult<()> {
            Err(IndexError::unavailable("connection refused"))
        }

        fn search(&self, _embedding: &Embedding) -> IndexResult<Option<SearchHit>> {
            Err(IndexError::unavailable("connection refused"))
        }
    }

    #[test]
    fn store_failure_fails_safe_to_new_and_surfaces_the_fault() {
        let store = Arc::new(FailingStore { dimension: 2 });
        let resolver = IdentityResolver::new(store, DecisionRule::DistanceWithin(0.3)).unwrap();

        let resolution = resolver.resolve(&embedding(vec![1.0, 2.0])).unwrap();
        assert!(resolution.is_new);
        assert!(!resolution.person_id.is_empty());
        assert!(matches!(
            resolution.fault,
            Some(IndexError::Unavailable { .. })
        ));
    }
}
