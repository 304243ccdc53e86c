//! Device and context inspection — device class, browser/OS family,
//! campaign parameters, traffic source, and bot detection, derived once per
//! session from the hosting environment.

use tracing::debug;
use url::Url;

use pulse_core::ports::EnvironmentInfo;
use pulse_core::types::{CampaignParams, DeviceClass, DeviceInfo, TrafficSource};

/// Tablet markers are checked before the generic mobile markers so a tablet
/// user agent is never classified as mobile.
const TABLET_MARKERS: [&str; 3] = ["ipad", "tablet", "kindle"];
const MOBILE_MARKERS: [&str; 4] = ["mobi", "iphone", "ipod", "android"];

/// Known automation markers. Heuristic only — false negatives are expected.
const BOT_MARKERS: [&str; 7] = [
    "bot",
    "crawler",
    "spider",
    "headless",
    "phantomjs",
    "selenium",
    "lighthouse",
];

const SEARCH_ENGINE_HOSTS: [&str; 5] = [
    "google.",
    "bing.",
    "duckduckgo.",
    "yahoo.",
    "baidu.",
];

const PAID_MEDIUMS: [&str; 4] = ["cpc", "ppc", "paid", "display"];

/// Everything the inspector derives for a new session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub device: DeviceInfo,
    pub referrer: Option<String>,
    pub campaign: CampaignParams,
    pub traffic_source: TrafficSource,
    pub is_bot: bool,
}

/// Derive the full session context from the environment. Pure and
/// synchronous; called once per session.
pub fn inspect(env: &dyn EnvironmentInfo) -> SessionContext {
    let user_agent = env.user_agent();
    let referrer = env.referrer().filter(|r| !r.is_empty());
    let campaign = parse_campaign(&env.page_url());
    let traffic_source = derive_traffic_source(referrer.as_deref(), &campaign);
    let (screen_width, screen_height) = env.screen_size();
    let (viewport_width, viewport_height) = env.viewport_size();

    let context = SessionContext {
        device: DeviceInfo {
            device_class: classify_device(&user_agent),
            browser: browser_family(&user_agent).to_string(),
            os: os_family(&user_agent).to_string(),
            user_agent: user_agent.clone(),
            language: env.language(),
            screen_width,
            screen_height,
            viewport_width,
            viewport_height,
        },
        referrer,
        campaign,
        traffic_source,
        is_bot: is_bot(&user_agent),
    };

    debug!(
        device = %context.device.device_class,
        browser = %context.device.browser,
        os = %context.device.os,
        traffic_source = %context.traffic_source,
        is_bot = context.is_bot,
        "session context derived"
    );

    context
}

/// Ordered pattern check: tablet markers first, then mobile, else desktop.
pub fn classify_device(user_agent: &str) -> DeviceClass {
    let ua = user_agent.to_lowercase();
    if TABLET_MARKERS.iter().any(|m| ua.contains(m)) {
        DeviceClass::Tablet
    } else if MOBILE_MARKERS.iter().any(|m| ua.contains(m)) {
        DeviceClass::Mobile
    } else {
        DeviceClass::Desktop
    }
}

/// First-match browser family. Edge and Opera embed "chrome" in their user
/// agents, and Chrome embeds "safari", so the order is fixed.
pub fn browser_family(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    if ua.contains("edg") {
        "Edge"
    } else if ua.contains("opr") || ua.contains("opera") {
        "Opera"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("chrome") {
        "Chrome"
    } else if ua.contains("safari") {
        "Safari"
    } else {
        "Unknown"
    }
}

/// First-match OS family. iOS devices report "like Mac OS X" and Android
/// reports "Linux", so those are checked first.
pub fn os_family(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    if ua.contains("iphone") || ua.contains("ipad") || ua.contains("ipod") {
        "iOS"
    } else if ua.contains("android") {
        "Android"
    } else if ua.contains("windows") {
        "Windows"
    } else if ua.contains("mac os") {
        "macOS"
    } else if ua.contains("linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

/// Case-insensitive substring scan against known automation markers.
pub fn is_bot(user_agent: &str) -> bool {
    let ua = user_agent.to_lowercase();
    BOT_MARKERS.iter().any(|m| ua.contains(m))
}

/// Parse utm_* query parameters from the landing URL. An unparseable URL
/// yields empty params.
pub fn parse_campaign(page_url: &str) -> CampaignParams {
    let Ok(url) = Url::parse(page_url) else {
        return CampaignParams::default();
    };

    let mut params = CampaignParams::default();
    for (key, value) in url.query_pairs() {
        let value = value.into_owned();
        match key.as_ref() {
            "utm_source" => params.source = Some(value),
            "utm_medium" => params.medium = Some(value),
            "utm_campaign" => params.campaign = Some(value),
            "utm_term" => params.term = Some(value),
            "utm_content" => params.content = Some(value),
            _ => {}
        }
    }
    params
}

/// Paid medium wins, then no referrer means direct, then known search
/// engines mean organic, everything else is a referral.
pub fn derive_traffic_source(referrer: Option<&str>, campaign: &CampaignParams) -> TrafficSource {
    if let Some(medium) = &campaign.medium {
        if PAID_MEDIUMS.iter().any(|m| medium.eq_ignore_ascii_case(m)) {
            return TrafficSource::Paid;
        }
    }

    let Some(referrer) = referrer.filter(|r| !r.is_empty()) else {
        return TrafficSource::Direct;
    };

    let host = Url::parse(referrer)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default();
    if SEARCH_ENGINE_HOSTS.iter().any(|s| host.contains(s)) {
        TrafficSource::Organic
    } else {
        TrafficSource::Referral
    }
}
