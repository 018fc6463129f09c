//! Identity store contract, the in-memory vector index, and the resolver
//! that turns an embedding into a known/new decision.

mod memory;
mod resolver;
mod store;

pub use memory::InMemoryIndex;
pub use resolver::{DecisionRule, IdentityResolver, Resolution};
pub use store::{IdentityStore, IndexError, IndexResult, Metric, Placement, SearchHit};
