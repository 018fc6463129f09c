use std::sync::RwLock;

use person_sentry_types::{Embedding, PersonRecord};

use crate::store::{IdentityStore, IndexError, IndexResult, Metric, Placement, SearchHit};

/// Brute-force in-memory vector index. Records are append-only and scanned
/// linearly on search, which is adequate for the store sizes a single
/// consumer accumulates between restarts.
pub struct InMemoryIndex {
    metric: Metric,
    dimension: usize,
    records: RwLock<Vec<PersonRecord>>,
}

impl InMemoryIndex {
    pub fn new(metric: Metric, dimension: usize) -> Self {
        Self {
            metric,
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().expect("index lock poisoned").len()
    }

    fn check_dimension(&self, embedding: &Embedding) -> IndexResult<()> {
        if embedding.dimension() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got: embedding.dimension(),
            });
        }
        Ok(())
    }

    fn nearest(&self, records: &[PersonRecord], embedding: &Embedding) -> Option<SearchHit> {
        let mut best: Option<SearchHit> = None;
        for record in records {
            let score = self
                .metric
                .score(embedding.as_slice(), record.embedding().as_slice());
            let better = match &best {
                Some(hit) => self.metric.is_better(score, hit.score),
                None => true,
            };
            if better {
                best = Some(SearchHit {
                    person_id: record.id().to_string(),
                    score,
                });
            }
        }
        best
    }
}

impl IdentityStore for InMemoryIndex {
    fn metric(&self) -> Metric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_empty(&self) -> IndexResult<bool> {
        Ok(self.records.read().expect("index lock poisoned").is_empty())
    }

    fn insert(&self, record: PersonRecord) -> IndexResult<()> {
        self.check_dimension(record.embedding())?;
        self.records
            .write()
            .expect("index lock poisoned")
            .push(record);
        Ok(())
    }

    fn search(&self, embedding: &Embedding) -> IndexResult<Option<SearchHit>> {
        self.check_dimension(embedding)?;
        let records = self.records.read().expect("index lock poisoned");
        Ok(self.nearest(&records, embedding))
    }

    /// Search and conditional insert under one write lock, so concurrent
    /// callers of this method cannot both conclude "new" for the same
    /// person. Inserts that bypass this method (the resolver's empty-store
    /// bootstrap) are outside that guarantee.
    fn search_then_insert(
        &self,
        candidate: PersonRecord,
        is_match: &dyn Fn(f32) -> bool,
    ) -> IndexResult<Placement> {
        self.check_dimension(candidate.embedding())?;
        let mut records = self.records.write().expect("index lock poisoned");
        if let Some(hit) = self.nearest(&records, candidate.embedding()) {
            if is_match(hit.score) {
                return Ok(Placement::Matched(hit));
            }
        }
        records.push(candidate);
        Ok(Placement::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: &str, values: Vec<f32>) -> PersonRecord {
        PersonRecord::new(
            id.to_string(),
            Embedding::from_vec(values).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn search_on_empty_store_returns_none() {
        let index = InMemoryIndex::new(Metric::L2, 2);
        let probe = Embedding::from_vec(vec![1.0, 0.0]).unwrap();
        assert!(index.is_empty().unwrap());
        assert_eq!(index.search(&probe).unwrap(), None);
    }

    #[test]
    fn inserted_embedding_matches_itself_at_the_identical_extreme() {
        for metric in [Metric::L2, Metric::Cosine] {
            let index = InMemoryIndex::new(metric, 3);
            index.insert(record("p1", vec![0.6, 0.8, 0.0])).unwrap();
            let probe = Embedding::from_vec(vec![0.6, 0.8, 0.0]).unwrap();
            let hit = index.search(&probe).unwrap().unwrap();
            assert_eq!(hit.person_id, "p1");
            assert!((hit.score - metric.identical_score()).abs() < 1e-6);
        }
    }

    #[test]
    fn nearest_neighbor_wins_over_farther_records() {
        let index = InMemoryIndex::new(Metric::L2, 2);
        index.insert(record("far", vec![10.0, 10.0])).unwrap();
        index.insert(record("near", vec![1.0, 1.0])).unwrap();
        let probe = Embedding::from_vec(vec![1.1, 1.0]).unwrap();
        let hit = index.search(&probe).unwrap().unwrap();
        assert_eq!(hit.person_id, "near");
    }

    #[test]
    fn dimension_is_validated_before_any_store_interaction() {
        let index = InMemoryIndex::new(Metric::L2, 4);
        let wrong = Embedding::from_vec(vec![1.0, 2.0]).unwrap();
        assert!(matches!(
            index.search(&wrong),
            Err(IndexError::DimensionMismatch { expected: 4, got: 2 })
        ));
        assert!(index.insert(record("p1", vec![1.0, 2.0])).is_err());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn conditional_insert_matches_instead_of_duplicating() {
        let index = InMemoryIndex::new(Metric::L2, 2);
        index.insert(record("p1", vec![0.0, 0.0])).unwrap();

        let close = record("p2", vec![0.1, 0.0]);
        let placement = index
            .search_then_insert(close, &|score| score <= 0.3)
            .unwrap();
        match placement {
            Placement::Matched(hit) => assert_eq!(hit.person_id, "p1"),
            Placement::Inserted => panic!("expected a match"),
        }
        assert_eq!(index.len(), 1);

        let far = record("p3", vec![5.0, 5.0]);
        let placement = index.search_then_insert(far, &|score| score <= 0.3).unwrap();
        assert_eq!(placement, Placement::Inserted);
        assert_eq!(index.len(), 2);
    }
}
