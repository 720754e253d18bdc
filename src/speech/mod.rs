//! Speech front-end: host recognition and synthesis engines.
//!
//! Components:
//! - `output`: sentence chunking and strictly sequential chunk playback
//! - `input`: restart-on-completion listening loop with watchdog
//! - `engines`: console recognition and HTTP (Code Speaker API) synthesis

pub mod engines;
pub mod input;
pub mod output;
