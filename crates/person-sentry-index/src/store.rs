use thiserror::Error;

use person_sentry_types::{Embedding, PersonRecord};

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding has dimension {got}, the store expects {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("identity store unavailable: {message}")]
    Unavailable { message: String },

    #[error("decision rule {rule} does not pair with the {metric} metric")]
    MismatchedRule { rule: &'static str, metric: &'static str },
}

impl IndexError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Similarity space of the identity store. Each metric has exactly one
/// comparison direction: L2 is a distance (smaller is more similar), cosine
/// is a similarity (larger is more similar).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    L2,
    Cosine,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::Cosine => "cosine",
        }
    }

    /// Score for a pair of equal-length vectors.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
            Metric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a > 0.0 && norm_b > 0.0 {
                    dot / (norm_a * norm_b)
                } else {
                    0.0
                }
            }
        }
    }

    /// True when `candidate` is a closer match than `incumbent`.
    pub fn is_better(&self, candidate: f32, incumbent: f32) -> bool {
        match self {
            Metric::L2 => candidate < incumbent,
            Metric::Cosine => candidate > incumbent,
        }
    }

    /// Score of a vector against itself.
    pub fn identical_score(&self) -> f32 {
        match self {
            Metric::L2 => 0.0,
            Metric::Cosine => 1.0,
        }
    }
}

/// Nearest neighbor returned by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub person_id: String,
    pub score: f32,
}

/// Result of the conditional-insert primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    /// An existing record matched; the candidate was not inserted.
    Matched(SearchHit),
    /// No sufficiently similar record existed; the candidate was inserted.
    Inserted,
}

/// Append-only vector index of person embeddings. No updates, no deletes.
pub trait IdentityStore: Send + Sync {
    fn metric(&self) -> Metric;

    fn dimension(&self) -> usize;

    fn is_empty(&self) -> IndexResult<bool>;

    fn insert(&self, record: PersonRecord) -> IndexResult<()>;

    /// Single nearest neighbor of `embedding`, or `None` on an empty store.
    fn search(&self, embedding: &Embedding) -> IndexResult<Option<SearchHit>>;

    /// Searches for a match and inserts `candidate` only when no stored
    /// embedding satisfies `is_match`. The default implementation performs
    /// the two steps non-atomically, which is the contract remote stores
    /// offer; implementations that can serialize the pair should override
    /// it.
    fn search_then_insert(
        &self,
        candidate: PersonRecord,
        is_match: &dyn Fn(f32) -> bool,
    ) -> IndexResult<Placement> {
        if let Some(hit) = self.search(candidate.embedding())? {
            if is_match(hit.score) {
                return Ok(Placement::Matched(hit));
            }
        }
        self.insert(candidate)?;
        Ok(Placement::Inserted)
    }
}
