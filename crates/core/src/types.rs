//! Shared data model — sessions, page views, interaction records, form
//! submissions, and the device/campaign context captured alongside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Coarse device classification derived from the user agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
    Tablet,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceClass::Desktop => write!(f, "desktop"),
            DeviceClass::Mobile => write!(f, "mobile"),
            DeviceClass::Tablet => write!(f, "tablet"),
        }
    }
}

/// Device and browser context, derived once per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_class: DeviceClass,
    pub browser: String,
    pub os: String,
    pub user_agent: String,
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// Geographic context. Only populated when an external geo source supplies
/// it — never resolved by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

/// Campaign attribution parameters parsed from the landing URL query string.
/// Each field is absent when the corresponding parameter is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignParams {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl CampaignParams {
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.medium.is_none()
            && self.campaign.is_none()
            && self.term.is_none()
            && self.content.is_none()
    }
}

/// Traffic source classification derived from referrer and campaign medium.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrafficSource {
    Direct,
    Organic,
    Paid,
    Referral,
}

impl fmt::Display for TrafficSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrafficSource::Direct => write!(f, "direct"),
            TrafficSource::Organic => write!(f, "organic"),
            TrafficSource::Paid => write!(f, "paid"),
            TrafficSource::Referral => write!(f, "referral"),
        }
    }
}

/// Interaction record type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Click,
    Hover,
    Scroll,
    RageClick,
    DeadClick,
    FormField,
}

/// Descriptor of the DOM element an interaction targeted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub text: Option<String>,
}

impl TargetDescriptor {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }
}

/// Viewport-relative coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A single classified interaction. Append-only; the one permitted mutation
/// is the delayed `Click` → `DeadClick` upgrade, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: Uuid,
    pub kind: InteractionKind,
    pub target: TargetDescriptor,
    pub timestamp: DateTime<Utc>,
    pub coords: Option<Point>,
    pub value: Option<String>,
}

impl Interaction {
    pub fn new(
        kind: InteractionKind,
        target: TargetDescriptor,
        timestamp: DateTime<Utc>,
        coords: Option<Point>,
        value: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target,
            timestamp,
            coords,
            value,
        }
    }
}

/// A single page visit within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageView {
    pub url: String,
    pub title: String,
    pub entered_at: DateTime<Utc>,
    /// Finalized on navigation away or page unload; `None` while active.
    pub duration_ms: Option<u64>,
    /// Monotone maximum depth percentage observed for this view.
    pub scroll_depth_percent: u8,
    pub exit_page: bool,
    /// Set only when this is the session's sole page view and its finalized
    /// duration is under the bounce threshold.
    pub bounced: bool,
}

impl PageView {
    pub fn new(url: impl Into<String>, title: impl Into<String>, entered_at: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            entered_at,
            duration_ms: None,
            scroll_depth_percent: 0,
            exit_page: false,
            bounced: false,
        }
    }
}

/// A tracked form field within a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub last_value: Option<String>,
    /// Delay from form tracking start to the field's first focus.
    pub time_to_first_focus_ms: Option<u64>,
    /// Number of value-changing events observed on the field.
    pub corrections: u32,
}

impl FormField {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_value: None,
            time_to_first_focus_ms: None,
            corrections: 0,
        }
    }
}

/// A validation error surfaced on a form field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormError {
    pub field: String,
    pub message: String,
}

/// A tracked form lifecycle — fields, timing, and abandonment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSubmission {
    pub form_id: String,
    pub form_name: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub fields: Vec<FormField>,
    /// Set when the page unloads before a submit fires and at least one
    /// field was touched.
    pub abandoned: bool,
    pub errors: Vec<FormError>,
}

/// A single browsing session — the unit every analysis operates over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    /// Stable across sessions; persisted in durable storage.
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Set exactly once, at session end: `ended_at - started_at`.
    pub duration_ms: Option<u64>,
    pub page_views: Vec<PageView>,
    pub interactions: Vec<Interaction>,
    pub form_submissions: Vec<FormSubmission>,
    pub device: DeviceInfo,
    pub geo: Option<GeoInfo>,
    pub referrer: Option<String>,
    pub campaign: CampaignParams,
    pub traffic_source: TrafficSource,
    pub is_bot: bool,
}

impl Session {
    /// Whether any page view's URL contains the given fragment.
    pub fn has_visited(&self, url_fragment: &str) -> bool {
        self.page_views.iter().any(|pv| pv.url.contains(url_fragment))
    }

    /// Sum of finalized page-view durations.
    pub fn time_on_site_ms(&self) -> u64 {
        self.page_views
            .iter()
            .filter_map(|pv| pv.duration_ms)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: "u-1".into(),
            started_at: now,
            ended_at: None,
            duration_ms: None,
            page_views: vec![
                PageView {
                    duration_ms: Some(12_000),
                    ..PageView::new("https://example.com/products", "Products", now)
                },
                PageView::new("https://example.com/checkout", "Checkout", now),
            ],
            interactions: Vec::new(),
            form_submissions: Vec::new(),
            device: DeviceInfo {
                device_class: DeviceClass::Desktop,
                browser: "Chrome".into(),
                os: "macOS".into(),
                user_agent: "test".into(),
                language: "en-US".into(),
                screen_width: 1920,
                screen_height: 1080,
                viewport_width: 1440,
                viewport_height: 900,
            },
            geo: None,
            referrer: None,
            campaign: CampaignParams::default(),
            traffic_source: TrafficSource::Direct,
            is_bot: false,
        }
    }

    #[test]
    fn test_session_serde_round_trip() {
        let session = sample_session();
        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, session.id);
        assert_eq!(parsed.page_views.len(), 2);
        assert_eq!(parsed.traffic_source, TrafficSource::Direct);
    }

    #[test]
    fn test_has_visited_matches_on_fragment() {
        let session = sample_session();
        assert!(session.has_visited("/checkout"));
        assert!(session.has_visited("example.com"));
        assert!(!session.has_visited("/thank-you"));
    }

    #[test]
    fn test_time_on_site_ignores_unfinalized_views() {
        let session = sample_session();
        assert_eq!(session.time_on_site_ms(), 12_000);
    }

    #[test]
    fn test_interaction_kind_serde_names() {
        let json = serde_json::to_string(&InteractionKind::RageClick).unwrap();
        assert_eq!(json, "\"rage_click\"");
        let json = serde_json::to_string(&InteractionKind::DeadClick).unwrap();
        assert_eq!(json, "\"dead_click\"");
    }
}
