use serde::Deserialize;

/// Scroll-depth milestones reported once per page view.
pub const SCROLL_MILESTONES: [u8; 5] = [25, 50, 75, 90, 100];

/// Capture thresholds and timings. Every field has a default so hosts can
/// deserialize a partial configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Interval between periodic delivery-buffer flushes.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Quiet time before a hover record is emitted.
    #[serde(default = "default_hover_debounce_ms")]
    pub hover_debounce_ms: u64,
    /// Quiet time before a scroll measurement is applied.
    #[serde(default = "default_scroll_debounce_ms")]
    pub scroll_debounce_ms: u64,
    /// Delay before a click is re-checked for dead-click upgrade.
    #[serde(default = "default_dead_click_delay_ms")]
    pub dead_click_delay_ms: u64,
    /// Maximum delta between consecutive clicks of a rage run.
    #[serde(default = "default_rage_window_ms")]
    pub rage_window_ms: u64,
    /// Maximum per-axis distance between consecutive clicks of a rage run.
    #[serde(default = "default_rage_radius_px")]
    pub rage_radius_px: f64,
    /// Run length at which a rage click is emitted.
    #[serde(default = "default_rage_threshold")]
    pub rage_threshold: u32,
    /// Sole page views shorter than this are counted as bounces.
    #[serde(default = "default_bounce_threshold_ms")]
    pub bounce_threshold_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            hover_debounce_ms: default_hover_debounce_ms(),
            scroll_debounce_ms: default_scroll_debounce_ms(),
            dead_click_delay_ms: default_dead_click_delay_ms(),
            rage_window_ms: default_rage_window_ms(),
            rage_radius_px: default_rage_radius_px(),
            rage_threshold: default_rage_threshold(),
            bounce_threshold_ms: default_bounce_threshold_ms(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_hover_debounce_ms() -> u64 {
    500
}

fn default_scroll_debounce_ms() -> u64 {
    150
}

fn default_dead_click_delay_ms() -> u64 {
    1000
}

fn default_rage_window_ms() -> u64 {
    1000
}

fn default_rage_radius_px() -> f64 {
    50.0
}

fn default_rage_threshold() -> u32 {
    3
}

fn default_bounce_threshold_ms() -> u64 {
    30_000
}
