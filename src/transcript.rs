//! Conversation transcript: ordered (input, response) exchanges.
//!
//! The transcript is owned by a [`Session`] handle that is passed to every
//! operation that reads or writes it. Trimming is a pure function returning
//! a new bounded transcript.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// One (user input, model response) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub user_input: String,
    pub response: String,
}

impl Exchange {
    pub fn new(user_input: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            response: response.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    exchanges: Vec<Exchange>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_exchanges(exchanges: Vec<Exchange>) -> Self {
        Self { exchanges }
    }

    pub fn exchanges(&self) -> &[Exchange] {
        &self.exchanges
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn push(&mut self, exchange: Exchange) {
        self.exchanges.push(exchange);
    }

    /// Keep only the most recent `max` exchanges, preserving their order.
    pub fn trimmed(&self, max: usize) -> Transcript {
        let skip = self.exchanges.len().saturating_sub(max);
        Transcript {
            exchanges: self.exchanges[skip..].to_vec(),
        }
    }

    /// JSON array of exchanges, as sent to the summary prompts.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.exchanges).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Shared handle to one conversation's transcript.
///
/// The lock is only held for snapshot and record, never across a network
/// call, so overlapping requests are not serialized.
#[derive(Debug, Clone)]
pub struct Session {
    transcript: Arc<Mutex<Transcript>>,
    max_exchanges: usize,
}

impl Session {
    pub fn new(max_exchanges: usize) -> Self {
        Self {
            transcript: Arc::new(Mutex::new(Transcript::new())),
            max_exchanges,
        }
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    pub fn snapshot(&self) -> Transcript {
        self.transcript.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.transcript.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an exchange, then trim to the session bound.
    pub fn record(&self, exchange: Exchange) {
        let mut transcript = self.transcript.lock().unwrap();
        transcript.push(exchange);
        if transcript.len() > self.max_exchanges {
            *transcript = transcript.trimmed(self.max_exchanges);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Transcript {
        Transcript::from_exchanges(
            (0..n)
                .map(|i| Exchange::new(format!("q{i}"), format!("a{i}")))
                .collect(),
        )
    }

    #[test]
    fn trimming_drops_oldest_and_keeps_order() {
        let trimmed = numbered(7).trimmed(3);
        let inputs: Vec<&str> = trimmed
            .exchanges()
            .iter()
            .map(|e| e.user_input.as_str())
            .collect();
        assert_eq!(inputs, ["q4", "q5", "q6"]);
    }

    #[test]
    fn trimming_below_bound_is_identity() {
        let transcript = numbered(2);
        assert_eq!(transcript.trimmed(50), transcript);
        assert!(numbered(4).trimmed(0).is_empty());
    }

    #[test]
    fn session_never_exceeds_bound() {
        let session = Session::new(5);
        for i in 0..12 {
            session.record(Exchange::new(format!("q{i}"), format!("a{i}")));
            assert!(session.len() <= 5);
        }
        let snapshot = session.snapshot();
        assert_eq!(snapshot.exchanges()[0].user_input, "q7");
        assert_eq!(snapshot.exchanges()[4].response, "a11");
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let json = numbered(1).to_json();
        assert_eq!(json, r#"[{"userInput":"q0","response":"a0"}]"#);
    }
}
