//! Rule evaluation.
//!
//! [`Engine`] consumes normalized events, tracks per-address error rates
//! in a sliding-window [`Store`], and emits [`Decision`]s when a rule's
//! threshold is exceeded.

mod engine;
mod store;

use crate::parser::Event;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use engine::Engine;
pub use store::{Store, DEFAULT_MAX_ERRORS_PER_IP, DEFAULT_MAX_IPS};

/// The outcome of evaluating an event against one rule.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Offending source address.
    pub ip: String,
    /// Rule that fired.
    pub rule_id: String,
    /// Whether a violation was detected.
    pub violation: bool,
    /// Human-readable reason.
    pub reason: String,
    /// Whether the address should be banned.
    pub ban: bool,
    /// How long the ban should last.
    pub ban_for: Duration,
    /// The event that tripped the rule.
    pub event: Event,
    /// Evaluation time.
    pub timestamp: DateTime<Utc>,
}
