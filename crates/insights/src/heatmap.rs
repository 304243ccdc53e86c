//! Heatmap aggregation — click and attention point clouds plus the
//! scroll-depth distribution for a single page.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_core::ports::EnvironmentInfo;
use pulse_core::types::{InteractionKind, Session, TargetDescriptor};

/// One weighted point in a cloud. No deduplication or clustering — binning
/// is left to the consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapPoint {
    pub x: f64,
    pub y: f64,
    pub weight: u32,
    pub target: TargetDescriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeatmapData {
    pub url: String,
    pub clicks: Vec<HeatmapPoint>,
    pub attention: Vec<HeatmapPoint>,
    /// One finalized depth maximum per contributing session.
    pub scroll_depths: Vec<u8>,
    /// The aggregator's viewport at call time — a normalization reference
    /// for the caller, not a per-point attribute.
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub computed_at: DateTime<Utc>,
}

/// Builds point clouds for a page from captured sessions. Interactions
/// carry no page attribution of their own, so a session contributes its
/// coordinate-bearing clicks and hovers whenever it visited the page — a
/// coarse-grained match accepted by design.
pub struct HeatmapAggregator {
    env: Arc<dyn EnvironmentInfo>,
}

impl HeatmapAggregator {
    pub fn new(env: Arc<dyn EnvironmentInfo>) -> Self {
        Self { env }
    }

    pub fn aggregate(&self, url: &str, sessions: &[Session]) -> HeatmapData {
        let mut clicks = Vec::new();
        let mut attention = Vec::new();
        let mut scroll_depths = Vec::new();

        for session in sessions.iter().filter(|s| s.has_visited(url)) {
            for interaction in &session.interactions {
                let Some(coords) = interaction.coords else {
                    continue;
                };
                let point = HeatmapPoint {
                    x: coords.x,
                    y: coords.y,
                    weight: 1,
                    target: interaction.target.clone(),
                };
                match interaction.kind {
                    InteractionKind::Click => clicks.push(point),
                    InteractionKind::Hover => attention.push(point),
                    _ => {}
                }
            }

            // Depth maximum across repeat views of the page
            let depth = session
                .page_views
                .iter()
                .filter(|pv| pv.url.contains(url))
                .map(|pv| pv.scroll_depth_percent)
                .max();
            if let Some(depth) = depth {
                scroll_depths.push(depth);
            }
        }

        let (viewport_width, viewport_height) = self.env.viewport_size();
        debug!(
            url = url,
            clicks = clicks.len(),
            attention = attention.len(),
            sessions = scroll_depths.len(),
            "heatmap aggregated"
        );

        HeatmapData {
            url: url.to_string(),
            clicks,
            attention,
            scroll_depths,
            viewport_width,
            viewport_height,
            computed_at: Utc::now(),
        }
    }
}
