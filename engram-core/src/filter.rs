//! Recall filter expressions
//!
//! Filters narrow a vector search before similarity ranking. All fields are
//! optional; an empty filter matches every live memory of the user.

use crate::{MemoryCategory, MemorySubtype, Timestamp};
use serde::{Deserialize, Serialize};

/// Filter applied to long-term recall and context retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RecallFilter {
    /// Restrict to these categories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<MemoryCategory>>,
    /// Restrict to these subtypes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtypes: Option<Vec<MemorySubtype>>,
    /// Require at least one of these "type:name" entities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,
    /// Temporal range over event_at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_after: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_before: Option<Timestamp>,
    /// Minimum confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_floor: Option<f32>,
}

impl RecallFilter {
    /// Filter restricted to a single (category, subtype) slot.
    pub fn for_slot(category: MemoryCategory, subtype: MemorySubtype) -> Self {
        Self {
            categories: Some(vec![category]),
            subtypes: Some(vec![subtype]),
            ..Default::default()
        }
    }

    /// Whether this filter constrains anything at all.
    pub fn is_empty(&self) -> bool {
        self.categories.is_none()
            && self.subtypes.is_none()
            && self.entities.is_none()
            && self.event_after.is_none()
            && self.event_before.is_none()
            && self.confidence_floor.is_none()
    }

    /// Evaluate the filter against a memory's fields. Entity comparison is
    /// exact string equality on "type:name" keys.
    pub fn matches(
        &self,
        category: MemoryCategory,
        subtype: MemorySubtype,
        entities: &[String],
        event_at: Option<Timestamp>,
        confidence: f32,
    ) -> bool {
        if let Some(categories) = &self.categories {
            if !categories.contains(&category) {
                return false;
            }
        }
        if let Some(subtypes) = &self.subtypes {
            if !subtypes.contains(&subtype) {
                return false;
            }
        }
        if let Some(wanted) = &self.entities {
            if !wanted.iter().any(|e| entities.contains(e)) {
                return false;
            }
        }
        if let Some(after) = self.event_after {
            match event_at {
                Some(at) if at >= after => {}
                _ => return false,
            }
        }
        if let Some(before) = self.event_before {
            match event_at {
                Some(at) if at <= before => {}
                _ => return false,
            }
        }
        if let Some(floor) = self.confidence_floor {
            if confidence < floor {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = RecallFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(
            MemoryCategory::Episodic,
            MemorySubtype::Event,
            &[],
            None,
            0.0
        ));
    }

    #[test]
    fn test_slot_filter() {
        let filter = RecallFilter::for_slot(MemoryCategory::Procedural, MemorySubtype::Workflow);
        assert!(filter.matches(
            MemoryCategory::Procedural,
            MemorySubtype::Workflow,
            &[],
            None,
            1.0
        ));
        assert!(!filter.matches(
            MemoryCategory::Procedural,
            MemorySubtype::Pattern,
            &[],
            None,
            1.0
        ));
    }

    #[test]
    fn test_entity_filter_requires_overlap() {
        let filter = RecallFilter {
            entities: Some(vec!["technology:postgresql".to_string()]),
            ..Default::default()
        };
        let held = vec![
            "technology:postgresql".to_string(),
            "project:api".to_string(),
        ];
        assert!(filter.matches(
            MemoryCategory::Semantic,
            MemorySubtype::Project,
            &held,
            None,
            1.0
        ));
        assert!(!filter.matches(
            MemoryCategory::Semantic,
            MemorySubtype::Project,
            &["technology:redis".to_string()],
            None,
            1.0
        ));
    }

    #[test]
    fn test_temporal_filter_requires_event_timestamp() {
        let now = Utc::now();
        let filter = RecallFilter {
            event_after: Some(now - Duration::days(1)),
            event_before: Some(now + Duration::days(1)),
            ..Default::default()
        };
        assert!(filter.matches(
            MemoryCategory::Episodic,
            MemorySubtype::Event,
            &[],
            Some(now),
            1.0
        ));
        // Atemporal memories never satisfy a temporal range
        assert!(!filter.matches(
            MemoryCategory::Episodic,
            MemorySubtype::Event,
            &[],
            None,
            1.0
        ));
    }

    #[test]
    fn test_confidence_floor() {
        let filter = RecallFilter {
            confidence_floor: Some(0.8),
            ..Default::default()
        };
        assert!(filter.matches(
            MemoryCategory::Semantic,
            MemorySubtype::Domain,
            &[],
            None,
            0.9
        ));
        assert!(!filter.matches(
            MemoryCategory::Semantic,
            MemorySubtype::Domain,
            &[],
            None,
            0.5
        ));
    }
}
