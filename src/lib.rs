//! joyna-rs: a child-friendly voice companion.
//!
//! The server relays chat to a hosted Gemini model behind a fixed persona,
//! keeps a bounded session transcript, and writes parent-facing session
//! summaries to a history log. The voice client drives host speech engines.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod history;
pub mod speech;
pub mod summary;
pub mod transcript;
pub mod voice;
