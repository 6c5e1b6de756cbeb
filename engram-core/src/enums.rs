//! Enum types for Engram entities
//!
//! The memory taxonomy (category/subtype) is fixed, compile-time data.
//! Everything that crosses the wire uses snake_case string forms.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when parsing an enum from its database/wire string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub input: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown {} value: '{}'", self.kind, self.input)
    }
}

impl std::error::Error for EnumParseError {}

// ============================================================================
// MEMORY TAXONOMY
// ============================================================================

/// Top-level memory category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Things that happened: events, decisions, conversations, outcomes
    Episodic,
    /// Things that are true: users, projects, environments, domains, entities
    Semantic,
    /// Things that are done: workflows, patterns, tool usage, debugging
    Procedural,
    /// Things the user wants: communication, style, tools, boundaries
    Preference,
}

impl MemoryCategory {
    /// All categories, in taxonomy order.
    pub const ALL: [MemoryCategory; 4] = [
        MemoryCategory::Episodic,
        MemoryCategory::Semantic,
        MemoryCategory::Procedural,
        MemoryCategory::Preference,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemoryCategory::Episodic => "episodic",
            MemoryCategory::Semantic => "semantic",
            MemoryCategory::Procedural => "procedural",
            MemoryCategory::Preference => "preference",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "episodic" => Ok(MemoryCategory::Episodic),
            "semantic" => Ok(MemoryCategory::Semantic),
            "procedural" => Ok(MemoryCategory::Procedural),
            "preference" => Ok(MemoryCategory::Preference),
            _ => Err(EnumParseError {
                kind: "memory category",
                input: s.to_string(),
            }),
        }
    }

    /// The subtypes legal for this category.
    pub fn subtypes(&self) -> &'static [MemorySubtype] {
        match self {
            MemoryCategory::Episodic => &[
                MemorySubtype::Event,
                MemorySubtype::Decision,
                MemorySubtype::Conversation,
                MemorySubtype::Outcome,
            ],
            MemoryCategory::Semantic => &[
                MemorySubtype::User,
                MemorySubtype::Project,
                MemorySubtype::Environment,
                MemorySubtype::Domain,
                MemorySubtype::Entity,
            ],
            MemoryCategory::Procedural => &[
                MemorySubtype::Workflow,
                MemorySubtype::Pattern,
                MemorySubtype::ToolUsage,
                MemorySubtype::Debugging,
            ],
            MemoryCategory::Preference => &[
                MemorySubtype::Communication,
                MemorySubtype::Style,
                MemorySubtype::Tools,
                MemorySubtype::Boundaries,
            ],
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MemoryCategory {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Memory subtype. Each subtype belongs to exactly one category; the
/// (category, subtype) pair is validated with [`is_valid_pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySubtype {
    // episodic
    Event,
    Decision,
    Conversation,
    Outcome,
    // semantic
    User,
    Project,
    Environment,
    Domain,
    Entity,
    // procedural
    Workflow,
    Pattern,
    ToolUsage,
    Debugging,
    // preference
    Communication,
    Style,
    Tools,
    Boundaries,
}

impl MemorySubtype {
    /// The category this subtype belongs to.
    pub fn category(&self) -> MemoryCategory {
        match self {
            MemorySubtype::Event
            | MemorySubtype::Decision
            | MemorySubtype::Conversation
            | MemorySubtype::Outcome => MemoryCategory::Episodic,
            MemorySubtype::User
            | MemorySubtype::Project
            | MemorySubtype::Environment
            | MemorySubtype::Domain
            | MemorySubtype::Entity => MemoryCategory::Semantic,
            MemorySubtype::Workflow
            | MemorySubtype::Pattern
            | MemorySubtype::ToolUsage
            | MemorySubtype::Debugging => MemoryCategory::Procedural,
            MemorySubtype::Communication
            | MemorySubtype::Style
            | MemorySubtype::Tools
            | MemorySubtype::Boundaries => MemoryCategory::Preference,
        }
    }

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MemorySubtype::Event => "event",
            MemorySubtype::Decision => "decision",
            MemorySubtype::Conversation => "conversation",
            MemorySubtype::Outcome => "outcome",
            MemorySubtype::User => "user",
            MemorySubtype::Project => "project",
            MemorySubtype::Environment => "environment",
            MemorySubtype::Domain => "domain",
            MemorySubtype::Entity => "entity",
            MemorySubtype::Workflow => "workflow",
            MemorySubtype::Pattern => "pattern",
            MemorySubtype::ToolUsage => "tool_usage",
            MemorySubtype::Debugging => "debugging",
            MemorySubtype::Communication => "communication",
            MemorySubtype::Style => "style",
            MemorySubtype::Tools => "tools",
            MemorySubtype::Boundaries => "boundaries",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "event" => Ok(MemorySubtype::Event),
            "decision" => Ok(MemorySubtype::Decision),
            "conversation" => Ok(MemorySubtype::Conversation),
            "outcome" => Ok(MemorySubtype::Outcome),
            "user" => Ok(MemorySubtype::User),
            "project" => Ok(MemorySubtype::Project),
            "environment" => Ok(MemorySubtype::Environment),
            "domain" => Ok(MemorySubtype::Domain),
            "entity" => Ok(MemorySubtype::Entity),
            "workflow" => Ok(MemorySubtype::Workflow),
            "pattern" => Ok(MemorySubtype::Pattern),
            "tool_usage" => Ok(MemorySubtype::ToolUsage),
            "debugging" => Ok(MemorySubtype::Debugging),
            "communication" => Ok(MemorySubtype::Communication),
            "style" => Ok(MemorySubtype::Style),
            "tools" => Ok(MemorySubtype::Tools),
            "boundaries" => Ok(MemorySubtype::Boundaries),
            _ => Err(EnumParseError {
                kind: "memory subtype",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MemorySubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for MemorySubtype {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Check whether a (category, subtype) pair is drawn from the fixed taxonomy.
pub fn is_valid_pair(category: MemoryCategory, subtype: MemorySubtype) -> bool {
    subtype.category() == category
}

// ============================================================================
// WORKING MEMORY
// ============================================================================

/// Content type of a working-memory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// A conversation message
    Message,
    /// Task state; favored by eviction priority and always promoted
    TaskState,
    /// Intermediate reasoning the agent wants around
    Scratchpad,
    /// System-injected content; exempt from the security check
    System,
    /// A long-term memory pulled back into the session
    RetrievedMemory,
}

impl ContentType {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContentType::Message => "message",
            ContentType::TaskState => "task_state",
            ContentType::Scratchpad => "scratchpad",
            ContentType::System => "system",
            ContentType::RetrievedMemory => "retrieved_memory",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "message" => Ok(ContentType::Message),
            "task_state" => Ok(ContentType::TaskState),
            "scratchpad" => Ok(ContentType::Scratchpad),
            "system" => Ok(ContentType::System),
            "retrieved_memory" => Ok(ContentType::RetrievedMemory),
            _ => Err(EnumParseError {
                kind: "content type",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ContentType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// RELATIONSHIPS
// ============================================================================

/// Label on a directed memory-relationship edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    RelatedTo,
    PartOf,
    DependsOn,
    Contradicts,
    Updates,
}

impl RelationshipKind {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RelationshipKind::RelatedTo => "related_to",
            RelationshipKind::PartOf => "part_of",
            RelationshipKind::DependsOn => "depends_on",
            RelationshipKind::Contradicts => "contradicts",
            RelationshipKind::Updates => "updates",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "related_to" => Ok(RelationshipKind::RelatedTo),
            "part_of" => Ok(RelationshipKind::PartOf),
            "depends_on" => Ok(RelationshipKind::DependsOn),
            "contradicts" => Ok(RelationshipKind::Contradicts),
            "updates" => Ok(RelationshipKind::Updates),
            _ => Err(EnumParseError {
                kind: "relationship kind",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RelationshipKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// INTENT
// ============================================================================

/// Detected intent of a retrieval query. Drives the weight profile used
/// during context assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    HowTo,
    WhatHappened,
    WhatIs,
    Debug,
    /// Fallback on any ambiguity
    #[default]
    General,
}

impl Intent {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Intent::HowTo => "how_to",
            Intent::WhatHappened => "what_happened",
            Intent::WhatIs => "what_is",
            Intent::Debug => "debug",
            Intent::General => "general",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "how_to" => Ok(Intent::HowTo),
            "what_happened" => Ok(Intent::WhatHappened),
            "what_is" => Ok(Intent::WhatIs),
            "debug" => Ok(Intent::Debug),
            "general" => Ok(Intent::General),
            _ => Err(EnumParseError {
                kind: "intent",
                input: s.to_string(),
            }),
        }
    }

    /// Lenient parse used on model output: tolerates hyphens, case, and
    /// surrounding noise, defaulting to `General`.
    pub fn from_model_output(s: &str) -> Self {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::from_db_str(&normalized).unwrap_or(Intent::General)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Intent {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

// ============================================================================
// MEMORY SOURCE
// ============================================================================

/// How a long-term memory entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Stored directly via a tool call
    #[default]
    Explicit,
    /// Promoted by working-memory eviction
    Promoted,
    /// Promoted by a checkpoint or clear
    Checkpoint,
}

impl SourceType {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            SourceType::Explicit => "explicit",
            SourceType::Promoted => "promoted",
            SourceType::Checkpoint => "checkpoint",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, EnumParseError> {
        match s {
            "explicit" => Ok(SourceType::Explicit),
            "promoted" => Ok(SourceType::Promoted),
            "checkpoint" => Ok(SourceType::Checkpoint),
            _ => Err(EnumParseError {
                kind: "source type",
                input: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// ENTITY TYPE DISCRIMINATOR
// ============================================================================

/// Entity type discriminator for polymorphic references (errors, logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Session,
    WorkingItem,
    Memory,
    Relationship,
    AccessLog,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_pair_validation() {
        assert!(is_valid_pair(MemoryCategory::Episodic, MemorySubtype::Event));
        assert!(is_valid_pair(
            MemoryCategory::Procedural,
            MemorySubtype::ToolUsage
        ));
        assert!(!is_valid_pair(
            MemoryCategory::Episodic,
            MemorySubtype::Workflow
        ));
        assert!(!is_valid_pair(
            MemoryCategory::Preference,
            MemorySubtype::Project
        ));
    }

    #[test]
    fn test_every_subtype_listed_under_its_category() {
        for category in MemoryCategory::ALL {
            for subtype in category.subtypes() {
                assert_eq!(subtype.category(), category);
                assert!(is_valid_pair(category, *subtype));
            }
        }
    }

    #[test]
    fn test_taxonomy_size() {
        let total: usize = MemoryCategory::ALL.iter().map(|c| c.subtypes().len()).sum();
        assert_eq!(total, 17);
    }

    #[test]
    fn test_db_str_round_trip() {
        for category in MemoryCategory::ALL {
            assert_eq!(
                MemoryCategory::from_db_str(category.as_db_str()).unwrap(),
                category
            );
            for subtype in category.subtypes() {
                assert_eq!(
                    MemorySubtype::from_db_str(subtype.as_db_str()).unwrap(),
                    *subtype
                );
            }
        }
    }

    #[test]
    fn test_intent_from_model_output() {
        assert_eq!(Intent::from_model_output("how-to"), Intent::HowTo);
        assert_eq!(Intent::from_model_output(" What_Happened "), Intent::WhatHappened);
        assert_eq!(Intent::from_model_output("debug"), Intent::Debug);
        assert_eq!(Intent::from_model_output("gibberish"), Intent::General);
        assert_eq!(Intent::from_model_output(""), Intent::General);
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&MemorySubtype::ToolUsage).unwrap();
        assert_eq!(json, "\"tool_usage\"");
        let json = serde_json::to_string(&ContentType::TaskState).unwrap();
        assert_eq!(json, "\"task_state\"");
        let json = serde_json::to_string(&RelationshipKind::RelatedTo).unwrap();
        assert_eq!(json, "\"related_to\"");
    }

    #[test]
    fn test_unknown_db_str_rejected() {
        assert!(MemoryCategory::from_db_str("meta").is_err());
        assert!(MemorySubtype::from_db_str("tool-usage").is_err());
        assert!(ContentType::from_db_str("note").is_err());
    }
}
