//! Live behavior capture — session lifecycle, device/context inspection,
//! interaction classification, and buffered delivery for one page session.
//!
//! # Modules
//!
//! - [`session`] — Session store: creation, reload recovery, idempotent end
//! - [`context`] — Device class, browser/OS family, campaign params, bot flag
//! - [`classifier`] — Debounced/thresholded interaction classification
//! - [`buffer`] — FIFO delivery buffer with periodic and exit flushes
//! - [`timers`] — Deterministic timer queue driving all delayed work
//! - [`engine`] — The per-page context object wiring it all together

pub mod buffer;
pub mod classifier;
pub mod context;
pub mod engine;
pub mod session;
pub mod timers;

pub use buffer::DeliveryBuffer;
pub use classifier::InteractionClassifier;
pub use engine::CaptureEngine;
pub use session::SessionStore;
pub use timers::{TimerKind, TimerQueue};
