//! Intent weight profiles
//!
//! Each detected intent maps to a fixed vector of weights over working
//! memory and the (category, subtype) slots. Weights sum to approximately
//! 1.0 and drive sub-budget allocation during context assembly.

use crate::{Intent, MemoryCategory, MemorySubtype};

/// One slot of an intent profile: either the working-memory tier or a
/// specific (category, subtype) pair of long-term memory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProfileSlot {
    Working,
    Memory(MemoryCategory, MemorySubtype),
}

impl ProfileSlot {
    /// Human-readable slot label, e.g. "working" or "procedural.workflow".
    pub fn label(&self) -> String {
        match self {
            ProfileSlot::Working => "working".to_string(),
            ProfileSlot::Memory(category, subtype) => {
                format!("{}.{}", category.as_db_str(), subtype.as_db_str())
            }
        }
    }
}

const HOW_TO: &[(ProfileSlot, f32)] = &[
    (ProfileSlot::Working, 0.25),
    (
        ProfileSlot::Memory(MemoryCategory::Procedural, MemorySubtype::Workflow),
        0.25,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Procedural, MemorySubtype::Pattern),
        0.15,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Project),
        0.15,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Entity),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Preference, MemorySubtype::Style),
        0.05,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Decision),
        0.05,
    ),
];

const WHAT_HAPPENED: &[(ProfileSlot, f32)] = &[
    (ProfileSlot::Working, 0.20),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Decision),
        0.30,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Event),
        0.20,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Outcome),
        0.15,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Project),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Conversation),
        0.05,
    ),
];

const WHAT_IS: &[(ProfileSlot, f32)] = &[
    (ProfileSlot::Working, 0.20),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Entity),
        0.30,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Project),
        0.20,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Domain),
        0.15,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Environment),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Decision),
        0.05,
    ),
];

const DEBUG: &[(ProfileSlot, f32)] = &[
    (ProfileSlot::Working, 0.30),
    (
        ProfileSlot::Memory(MemoryCategory::Procedural, MemorySubtype::Debugging),
        0.25,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Outcome),
        0.20,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Environment),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Entity),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Preference, MemorySubtype::Tools),
        0.05,
    ),
];

const GENERAL: &[(ProfileSlot, f32)] = &[
    (ProfileSlot::Working, 0.35),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Project),
        0.15,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Episodic, MemorySubtype::Decision),
        0.15,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::Entity),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Procedural, MemorySubtype::Workflow),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Preference, MemorySubtype::Communication),
        0.10,
    ),
    (
        ProfileSlot::Memory(MemoryCategory::Semantic, MemorySubtype::User),
        0.05,
    ),
];

/// Look up the weight profile for an intent.
pub fn weight_profile(intent: Intent) -> &'static [(ProfileSlot, f32)] {
    match intent {
        Intent::HowTo => HOW_TO,
        Intent::WhatHappened => WHAT_HAPPENED,
        Intent::WhatIs => WHAT_IS,
        Intent::Debug => DEBUG,
        Intent::General => GENERAL,
    }
}

/// The working-memory weight of an intent's profile.
pub fn working_weight(intent: Intent) -> f32 {
    weight_profile(intent)
        .iter()
        .find_map(|(slot, weight)| match slot {
            ProfileSlot::Working => Some(*weight),
            _ => None,
        })
        .unwrap_or(0.0)
}

/// The long-term (category, subtype) slots of an intent's profile, with
/// their weights, in profile order.
pub fn memory_slots(intent: Intent) -> Vec<(MemoryCategory, MemorySubtype, f32)> {
    weight_profile(intent)
        .iter()
        .filter_map(|(slot, weight)| match slot {
            ProfileSlot::Memory(category, subtype) => Some((*category, *subtype, *weight)),
            ProfileSlot::Working => None,
        })
        .collect()
}
