//! # encounter-server
//!
//! Host process library for the encounter tracker.
//!
//! Supplies the collaborators `encounter-core` consumes through traits (a
//! tokio-driven alarm and a logging notifier) plus the HTTP API and state
//! management.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod alarm;
pub mod api;
pub mod logging;
pub mod state;
