//! Pull-based analysis over captured sessions — conversion funnels, spatial
//! attention heatmaps, and rule-based user segments.
//!
//! # Modules
//!
//! - [`funnel`] — Step-by-step conversion with attributed drop reasons
//! - [`heatmap`] — Click/attention point clouds and scroll-depth distribution
//! - [`segments`] — Declarative cohort criteria with AND semantics

pub mod funnel;
pub mod heatmap;
pub mod segments;

pub use funnel::{FunnelAnalyzer, FunnelDefinition, FunnelReport};
pub use heatmap::{HeatmapAggregator, HeatmapData};
pub use segments::{SegmentCriteria, SegmentationEngine, UserSegment};
