//! Rule-based segmentation — declarative criteria evaluated over captured
//! sessions to produce named cohorts with conversion counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use pulse_core::types::{DeviceClass, Session, TrafficSource};

/// URL fragments that mark a conversion page.
const CONVERSION_MARKERS: [&str; 2] = ["/thank-you", "/confirmation"];

const DEFAULT_SEGMENT_NAME: &str = "all-visitors";

/// Inclusive numeric range; an absent bound imposes no restriction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeConstraint {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl RangeConstraint {
    pub fn at_least(min: u64) -> Self {
        Self {
            min: Some(min),
            max: None,
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Declarative cohort criteria. Absent fields impose no restriction;
/// present fields combine with AND semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentCriteria {
    #[serde(default)]
    pub device_classes: Option<Vec<DeviceClass>>,
    #[serde(default)]
    pub page_views: Option<RangeConstraint>,
    #[serde(default)]
    pub session_duration_ms: Option<RangeConstraint>,
    #[serde(default)]
    pub interactions: Option<RangeConstraint>,
    /// Every listed URL fragment must have been visited.
    #[serde(default)]
    pub visited_urls: Option<Vec<String>>,
    /// No listed URL fragment may have been visited.
    #[serde(default)]
    pub excluded_urls: Option<Vec<String>>,
    #[serde(default)]
    pub traffic_sources: Option<Vec<TrafficSource>>,
    #[serde(default)]
    pub converted: Option<bool>,
    /// Sum of finalized page-view durations.
    #[serde(default)]
    pub time_on_site_ms: Option<RangeConstraint>,
}

/// A named, reusable segment definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentDefinition {
    pub id: Uuid,
    /// Generated from the criteria when absent.
    pub name: Option<String>,
    pub criteria: SegmentCriteria,
    pub created_at: DateTime<Utc>,
}

/// A computed cohort. `revenue` stays zero — attribution requires a
/// purchase-data join this engine does not own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSegment {
    pub id: Uuid,
    pub name: String,
    pub criteria: SegmentCriteria,
    /// Deduplicated, in first-match order.
    pub user_ids: Vec<String>,
    pub conversions: u64,
    pub revenue: f64,
    pub computed_at: DateTime<Utc>,
}

/// Evaluates criteria over caller-supplied sessions; holds a registry of
/// reusable definitions. Pull-based — never touches live capture.
pub struct SegmentationEngine {
    segments: dashmap::DashMap<Uuid, SegmentDefinition>,
}

impl SegmentationEngine {
    pub fn new() -> Self {
        Self {
            segments: dashmap::DashMap::new(),
        }
    }

    pub fn define(&self, definition: SegmentDefinition) {
        self.segments.insert(definition.id, definition);
    }

    pub fn evaluate_defined(&self, segment_id: &Uuid, sessions: &[Session]) -> Option<UserSegment> {
        let definition = self.segments.get(segment_id)?;
        let mut segment = self.build(definition.criteria.clone(), sessions);
        segment.id = definition.id;
        if let Some(name) = &definition.name {
            segment.name = name.clone();
        }
        Some(segment)
    }

    /// Build a cohort from criteria over the given sessions.
    pub fn build(&self, criteria: SegmentCriteria, sessions: &[Session]) -> UserSegment {
        let matching: Vec<&Session> = sessions
            .iter()
            .filter(|s| matches_criteria(s, &criteria))
            .collect();

        let mut user_ids: Vec<String> = Vec::new();
        for session in &matching {
            if !user_ids.contains(&session.user_id) {
                user_ids.push(session.user_id.clone());
            }
        }

        let conversions = matching.iter().filter(|s| is_converted(s)).count() as u64;

        let segment = UserSegment {
            id: Uuid::new_v4(),
            name: generate_name(&criteria),
            criteria,
            user_ids,
            conversions,
            revenue: 0.0,
            computed_at: Utc::now(),
        };
        debug!(
            name = %segment.name,
            users = segment.user_ids.len(),
            conversions = segment.conversions,
            "segment built"
        );
        segment
    }

    pub fn list(&self) -> Vec<SegmentDefinition> {
        self.segments.iter().map(|s| s.value().clone()).collect()
    }
}

impl Default for SegmentationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// AND over present constraints; absent constraints always pass.
fn matches_criteria(session: &Session, criteria: &SegmentCriteria) -> bool {
    if let Some(devices) = &criteria.device_classes {
        if !devices.contains(&session.device.device_class) {
            return false;
        }
    }
    if let Some(range) = &criteria.page_views {
        if !range.contains(session.page_views.len() as u64) {
            return false;
        }
    }
    if let Some(range) = &criteria.session_duration_ms {
        if !range.contains(session.duration_ms.unwrap_or(0)) {
            return false;
        }
    }
    if let Some(range) = &criteria.interactions {
        if !range.contains(session.interactions.len() as u64) {
            return false;
        }
    }
    if let Some(required) = &criteria.visited_urls {
        if !required.iter().all(|url| session.has_visited(url)) {
            return false;
        }
    }
    if let Some(excluded) = &criteria.excluded_urls {
        if excluded.iter().any(|url| session.has_visited(url)) {
            return false;
        }
    }
    if let Some(sources) = &criteria.traffic_sources {
        if !sources.contains(&session.traffic_source) {
            return false;
        }
    }
    if let Some(converted) = criteria.converted {
        if is_converted(session) != converted {
            return false;
        }
    }
    if let Some(range) = &criteria.time_on_site_ms {
        if !range.contains(session.time_on_site_ms()) {
            return false;
        }
    }
    true
}

fn is_converted(session: &Session) -> bool {
    CONVERSION_MARKERS
        .iter()
        .any(|marker| session.has_visited(marker))
}

/// Deterministic name from the present criteria, in fixed order: device
/// list, minimum page views, converted flag.
fn generate_name(criteria: &SegmentCriteria) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(devices) = &criteria.device_classes {
        if !devices.is_empty() {
            parts.push(
                devices
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
    }
    if let Some(min) = criteria.page_views.as_ref().and_then(|r| r.min) {
        parts.push(format!("{min}+ pages"));
    }
    if let Some(converted) = criteria.converted {
        parts.push(if converted { "converters" } else { "non-converters" }.to_string());
    }

    if parts.is_empty() {
        DEFAULT_SEGMENT_NAME.to_string()
    } else {
        parts.join(" · ")
    }
}
