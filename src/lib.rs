//! ctsync - Verified Certificate Transparency log-list updater
//!
//! Keeps an on-device copy of CT log lists current, authentic and
//! crash-consistent across independently versioned compatibility channels.

pub mod engine;
