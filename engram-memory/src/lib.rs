//! Engram Memory - Working and Long-Term Memory Managers
//!
//! The two memory tiers and the policies between them: session-scoped
//! working memory with eviction and checkpoint promotion, and user-scoped
//! long-term memory with classification, dedup, supersession, composite
//! recall scoring, decay, and the content-security validator that guards
//! every write path.

mod longterm;
mod scoring;
mod security;
mod working;

pub use longterm::{
    ContradictionCandidate, DecayOutcome, LongTermMemoryManager, QualityReport, StoreAction,
    StoreMemoryRequest, StoreOutcome, UpdateMemoryRequest, CONFIRM_DELETE_ALL,
};
pub use scoring::{
    age_days, composite_relevance, jaccard_similarity, rank_recalled, RecalledMemory,
};
pub use security::SecurityValidator;
pub use working::{
    AppendOutcome, AppendRequest, ClearOutcome, SessionOptions, WorkingMemoryManager,
};
