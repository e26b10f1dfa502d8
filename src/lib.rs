//! foxhole-fw - log-driven intrusion response for HTTP-facing servers.
//!
//! The daemon tails a webserver access log, normalizes each line into an
//! [`parser::Event`], evaluates events against configured rate-limit rules,
//! and installs bounded-duration drop rules for offending addresses through
//! a pluggable firewall backend.
//!
//! Dataflow is a linear pipeline of tasks joined by bounded channels:
//!
//! ```text
//! Tailer -> Parser -> Rule Engine -> Ban Manager -> Backend
//!                          ^
//!                     Config Store (atomic snapshot; hot-reloaded)
//! ```

pub mod config;
pub mod firewall;
pub mod logtail;
pub mod parser;
pub mod pipeline;
pub mod rules;
