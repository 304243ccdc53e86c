//! Funnel analysis — per-step entry/completion/drop counts, dwell time, and
//! attributed drop reasons across a set of captured sessions.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use pulse_core::types::{InteractionKind, Session};

const REASON_BOUNCED: &str = "Bounced (<30s)";
const REASON_LOW_ENGAGEMENT: &str = "Low engagement";
const REASON_RAGE_CLICKS: &str = "Frustrated (rage clicks)";
const REASON_FORM_ABANDONED: &str = "Form abandoned";
const REASON_UNKNOWN: &str = "Unknown";

/// Scroll depth below which a dropped session counts as low engagement.
const LOW_ENGAGEMENT_DEPTH: u8 = 25;

/// A named, reusable funnel definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelDefinition {
    pub id: Uuid,
    pub name: String,
    /// Ordered step URLs; a session is on a step when any of its page-view
    /// URLs contains the step URL.
    pub step_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An attributed reason for dropping between two steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropReason {
    pub reason: String,
    pub count: u64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelStepReport {
    pub step_url: String,
    pub entered: u64,
    pub completed: u64,
    pub dropped: u64,
    /// Mean finalized duration of the step's page view over the entered
    /// sessions that hold one; sessions without a finalized view for the
    /// step do not contribute to the mean.
    pub avg_duration_ms: f64,
    /// Ranked by count; ties keep attribution-precedence order.
    pub drop_reasons: Vec<DropReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunnelReport {
    pub steps: Vec<FunnelStepReport>,
    /// Last step's completions over first step's entries.
    pub overall_conversion_rate: f64,
    pub computed_at: DateTime<Utc>,
}

/// Computes funnel reports over caller-supplied sessions; holds a registry
/// of reusable definitions. Pull-based — never touches live capture.
pub struct FunnelAnalyzer {
    funnels: dashmap::DashMap<Uuid, FunnelDefinition>,
}

impl FunnelAnalyzer {
    pub fn new() -> Self {
        Self {
            funnels: dashmap::DashMap::new(),
        }
    }

    pub fn define(&self, funnel: FunnelDefinition) -> Result<()> {
        if funnel.step_urls.is_empty() {
            return Err(anyhow!("funnel '{}' has no steps", funnel.name));
        }
        self.funnels.insert(funnel.id, funnel);
        Ok(())
    }

    pub fn analyze_defined(&self, funnel_id: &Uuid, sessions: &[Session]) -> Option<FunnelReport> {
        let funnel = self.funnels.get(funnel_id)?;
        Some(self.analyze_path(&funnel.step_urls, sessions))
    }

    /// Analyze an ordered list of step URLs over the given sessions.
    pub fn analyze_path(&self, step_urls: &[String], sessions: &[Session]) -> FunnelReport {
        let mut steps = Vec::with_capacity(step_urls.len());

        for (i, step_url) in step_urls.iter().enumerate() {
            let entered_sessions: Vec<&Session> = sessions
                .iter()
                .filter(|s| s.has_visited(step_url))
                .collect();
            let entered = entered_sessions.len() as u64;

            let completed = match step_urls.get(i + 1) {
                Some(next_url) => entered_sessions
                    .iter()
                    .filter(|s| s.has_visited(next_url))
                    .count() as u64,
                None => entered,
            };
            let dropped = entered - completed;

            let durations: Vec<u64> = entered_sessions
                .iter()
                .filter_map(|s| step_duration(s, step_url))
                .collect();
            let avg_duration_ms = if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<u64>() as f64 / durations.len() as f64
            };

            let dropped_sessions: Vec<&Session> = entered_sessions
                .iter()
                .copied()
                .filter(|s| match step_urls.get(i + 1) {
                    Some(next_url) => !s.has_visited(next_url),
                    None => false,
                })
                .collect();
            let drop_reasons = attribute_drops(&dropped_sessions, dropped);

            steps.push(FunnelStepReport {
                step_url: step_url.clone(),
                entered,
                completed,
                dropped,
                avg_duration_ms,
                drop_reasons,
            });
        }

        let overall_conversion_rate = match (steps.first(), steps.last()) {
            (Some(first), Some(last)) if first.entered > 0 => {
                last.completed as f64 / first.entered as f64
            }
            _ => 0.0,
        };

        debug!(
            steps = steps.len(),
            sessions = sessions.len(),
            overall_conversion_rate,
            "funnel analyzed"
        );

        FunnelReport {
            steps,
            overall_conversion_rate,
            computed_at: Utc::now(),
        }
    }

    pub fn list(&self) -> Vec<FunnelDefinition> {
        self.funnels.iter().map(|f| f.value().clone()).collect()
    }
}

impl Default for FunnelAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Finalized duration of the session's first page view matching the step.
fn step_duration(session: &Session, step_url: &str) -> Option<u64> {
    session
        .page_views
        .iter()
        .find(|pv| pv.url.contains(step_url))
        .and_then(|pv| pv.duration_ms)
}

/// Fixed-precedence drop attribution, first match wins.
fn classify_drop(session: &Session) -> &'static str {
    let last_view = session.page_views.last();
    if last_view.is_some_and(|pv| pv.bounced) {
        REASON_BOUNCED
    } else if last_view.is_some_and(|pv| pv.scroll_depth_percent < LOW_ENGAGEMENT_DEPTH) {
        REASON_LOW_ENGAGEMENT
    } else if session
        .interactions
        .iter()
        .any(|i| i.kind == InteractionKind::RageClick)
    {
        REASON_RAGE_CLICKS
    } else if session.form_submissions.iter().any(|f| f.abandoned) {
        REASON_FORM_ABANDONED
    } else {
        REASON_UNKNOWN
    }
}

fn attribute_drops(dropped_sessions: &[&Session], total_dropped: u64) -> Vec<DropReason> {
    // Accumulate in precedence order so the later sort is tie-stable
    let ordered = [
        REASON_BOUNCED,
        REASON_LOW_ENGAGEMENT,
        REASON_RAGE_CLICKS,
        REASON_FORM_ABANDONED,
        REASON_UNKNOWN,
    ];
    let mut counts = [0u64; 5];
    for session in dropped_sessions {
        let reason = classify_drop(session);
        let idx = ordered.iter().position(|r| *r == reason).unwrap_or(4);
        counts[idx] += 1;
    }

    let mut reasons: Vec<DropReason> = ordered
        .iter()
        .zip(counts)
        .filter(|(_, count)| *count > 0)
        .map(|(reason, count)| DropReason {
            reason: (*reason).to_string(),
            count,
            percentage: if total_dropped > 0 {
                count as f64 * 100.0 / total_dropped as f64
            } else {
                0.0
            },
        })
        .collect();
    reasons.sort_by(|a, b| b.count.cmp(&a.count));
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::types::{
        CampaignParams, DeviceClass, DeviceInfo, Interaction, PageView, TargetDescriptor,
        TrafficSource,
    };

    fn device() -> DeviceInfo {
        DeviceInfo {
            device_class: DeviceClass::Desktop,
            browser: "Chrome".into(),
            os: "macOS".into(),
            user_agent: "test".into(),
            language: "en".into(),
            screen_width: 1920,
            screen_height: 1080,
            viewport_width: 1440,
            viewport_height: 900,
        }
    }

    fn session_visiting(urls: &[&str]) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4().to_string(),
            started_at: now,
            ended_at: None,
            duration_ms: None,
            page_views: urls
                .iter()
                .map(|url| PageView {
                    duration_ms: Some(20_000),
                    scroll_depth_percent: 60,
                    ..PageView::new(format!("https://example.com{url}"), "Page", now)
                })
                .collect(),
            interactions: Vec::new(),
            form_submissions: Vec::new(),
            device: device(),
            geo: None,
            referrer: None,
            campaign: CampaignParams::default(),
            traffic_source: TrafficSource::Direct,
            is_bot: false,
        }
    }

    fn mark_bounced(session: &mut Session) {
        if let Some(pv) = session.page_views.last_mut() {
            pv.bounced = true;
        }
    }

    fn mark_low_scroll(session: &mut Session) {
        if let Some(pv) = session.page_views.last_mut() {
            pv.scroll_depth_percent = 10;
        }
    }

    fn steps(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_entered_splits_into_completed_and_dropped() {
        let mut sessions = Vec::new();
        for _ in 0..6 {
            sessions.push(session_visiting(&["/a", "/b"]));
        }
        for _ in 0..2 {
            let mut s = session_visiting(&["/a"]);
            mark_bounced(&mut s);
            sessions.push(s);
        }
        for _ in 0..2 {
            let mut s = session_visiting(&["/a"]);
            mark_low_scroll(&mut s);
            sessions.push(s);
        }

        let report = FunnelAnalyzer::new().analyze_path(&steps(&["/a", "/b", "/c"]), &sessions);
        let first = &report.steps[0];
        assert_eq!(first.entered, 10);
        assert_eq!(first.completed, 6);
        assert_eq!(first.dropped, 4);
        assert_eq!(first.entered, first.completed + first.dropped);
        assert!(first.completed <= first.entered);

        let reasons: Vec<(&str, u64, f64)> = first
            .drop_reasons
            .iter()
            .map(|r| (r.reason.as_str(), r.count, r.percentage))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (REASON_BOUNCED, 2, 50.0),
                (REASON_LOW_ENGAGEMENT, 2, 50.0),
            ]
        );
    }

    #[test]
    fn test_last_step_completes_all_entries() {
        let sessions = vec![
            session_visiting(&["/a", "/b"]),
            session_visiting(&["/a", "/b"]),
        ];
        let report = FunnelAnalyzer::new().analyze_path(&steps(&["/a", "/b"]), &sessions);
        let last = &report.steps[1];
        assert_eq!(last.entered, 2);
        assert_eq!(last.completed, 2);
        assert_eq!(last.dropped, 0);
        assert!(last.drop_reasons.is_empty());
    }

    #[test]
    fn test_avg_duration_skips_unfinalized_views() {
        let mut with_duration = session_visiting(&["/a", "/b"]);
        with_duration.page_views[0].duration_ms = Some(30_000);
        let mut without_duration = session_visiting(&["/a"]);
        without_duration.page_views[0].duration_ms = None;
        // Keep it out of the bounce/low-engagement buckets
        without_duration.page_views[0].scroll_depth_percent = 80;

        let report = FunnelAnalyzer::new()
            .analyze_path(&steps(&["/a", "/b"]), &[with_duration, without_duration]);
        // Only the finalized view contributes to the mean
        assert_eq!(report.steps[0].avg_duration_ms, 30_000.0);
    }

    #[test]
    fn test_drop_precedence_rage_over_form() {
        let mut s = session_visiting(&["/a"]);
        s.interactions.push(Interaction::new(
            InteractionKind::RageClick,
            TargetDescriptor::tag("button"),
            Utc::now(),
            None,
            None,
        ));
        s.form_submissions.push(pulse_core::types::FormSubmission {
            form_id: "signup".into(),
            form_name: None,
            started_at: Utc::now(),
            duration_ms: Some(1000),
            fields: Vec::new(),
            abandoned: true,
            errors: Vec::new(),
        });

        let report = FunnelAnalyzer::new().analyze_path(&steps(&["/a", "/b"]), &[s]);
        assert_eq!(report.steps[0].drop_reasons[0].reason, REASON_RAGE_CLICKS);
    }

    #[test]
    fn test_unknown_drop_reason_fallback() {
        let s = session_visiting(&["/a"]);
        let report = FunnelAnalyzer::new().analyze_path(&steps(&["/a", "/b"]), &[s]);
        assert_eq!(report.steps[0].drop_reasons[0].reason, REASON_UNKNOWN);
    }

    #[test]
    fn test_overall_conversion_rate() {
        let sessions = vec![
            session_visiting(&["/a", "/b", "/c"]),
            session_visiting(&["/a", "/b"]),
            session_visiting(&["/a"]),
            session_visiting(&["/a"]),
        ];
        let report = FunnelAnalyzer::new().analyze_path(&steps(&["/a", "/b", "/c"]), &sessions);
        assert_eq!(report.overall_conversion_rate, 0.25);
    }

    #[test]
    fn test_define_rejects_empty_steps() {
        let analyzer = FunnelAnalyzer::new();
        let result = analyzer.define(FunnelDefinition {
            id: Uuid::new_v4(),
            name: "empty".into(),
            step_urls: Vec::new(),
            created_at: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_defined_funnel_round_trip() {
        let analyzer = FunnelAnalyzer::new();
        let id = Uuid::new_v4();
        analyzer
            .define(FunnelDefinition {
                id,
                name: "checkout".into(),
                step_urls: steps(&["/a", "/b"]),
                created_at: Utc::now(),
            })
            .unwrap();

        let sessions = vec![session_visiting(&["/a", "/b"])];
        let report = analyzer.analyze_defined(&id, &sessions).unwrap();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(analyzer.list().len(), 1);
        assert!(analyzer.analyze_defined(&Uuid::new_v4(), &sessions).is_none());
    }
}
