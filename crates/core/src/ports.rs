//! Capability ports — narrow interfaces over the hosting environment
//! (clock, storage, page context) so the engine can run against in-memory
//! fakes in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::{TelemetryError, TelemetryResult};

/// Time source. Production hosts use [`SystemClock`]; tests advance a
/// [`ManualClock`] instead of waiting on wall-clock timers.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += Duration::milliseconds(ms as i64);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// Key/value storage that survives across sessions. Holds the stable user
/// identifier.
pub trait DurableStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> TelemetryResult<()>;
}

/// Key/value storage scoped to the current tab lifetime. Holds the
/// serialized live session for same-tab reload recovery.
pub trait EphemeralStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> TelemetryResult<()>;
    fn remove(&self, key: &str);
}

/// In-memory store backing both storage ports; the default test fake.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> TelemetryResult<()> {
        self.entries
            .lock()
            .expect("store mutex poisoned")
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl EphemeralStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        DurableStore::get(self, key)
    }

    fn set(&self, key: &str, value: &str) -> TelemetryResult<()> {
        DurableStore::set(self, key, value)
    }

    fn remove(&self, key: &str) {
        self.entries.lock().expect("store mutex poisoned").remove(key);
    }
}

/// Store whose writes always fail; exercises the recoverable-silent path.
pub struct RejectingStore;

impl DurableStore for RejectingStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, key: &str, _value: &str) -> TelemetryResult<()> {
        Err(TelemetryError::Storage(format!("write rejected: {key}")))
    }
}

impl EphemeralStore for RejectingStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, key: &str, _value: &str) -> TelemetryResult<()> {
        Err(TelemetryError::Storage(format!("write rejected: {key}")))
    }

    fn remove(&self, _key: &str) {}
}

/// Read-only view of the hosting page — user agent, page URL, referrer, and
/// screen geometry. The only window the engine has on the environment.
pub trait EnvironmentInfo: Send + Sync {
    fn user_agent(&self) -> String;
    fn language(&self) -> String;
    fn page_url(&self) -> String;
    fn page_title(&self) -> String;
    fn referrer(&self) -> Option<String>;
    fn screen_size(&self) -> (u32, u32);
    fn viewport_size(&self) -> (u32, u32);
}

/// Fixed environment snapshot; used by tests and by hosts that capture the
/// environment once at startup.
#[derive(Debug, Clone)]
pub struct StaticEnvironment {
    pub user_agent: String,
    pub language: String,
    pub page_url: String,
    pub page_title: String,
    pub referrer: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for StaticEnvironment {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) Chrome/120.0".into(),
            language: "en-US".into(),
            page_url: "https://example.com/".into(),
            page_title: "Example".into(),
            referrer: None,
            screen_width: 1920,
            screen_height: 1080,
            viewport_width: 1440,
            viewport_height: 900,
        }
    }
}

impl EnvironmentInfo for StaticEnvironment {
    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn language(&self) -> String {
        self.language.clone()
    }

    fn page_url(&self) -> String {
        self.page_url.clone()
    }

    fn page_title(&self) -> String {
        self.page_title.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.referrer.clone()
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }

    fn viewport_size(&self) -> (u32, u32) {
        (self.viewport_width, self.viewport_height)
    }
}

/// Convenience: shared system clock.
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Convenience: shared manual clock for tests.
pub fn manual_clock(start: DateTime<Utc>) -> Arc<ManualClock> {
    Arc::new(ManualClock::starting_at(start))
}
