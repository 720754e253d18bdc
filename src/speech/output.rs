//! Speech output pipeline.
//!
//! Splits a reply into sentence chunks and plays them one at a time on a
//! host synthesis engine. A chunk is only submitted after the previous
//! chunk's completion, and a new `speak` preempts the one in progress.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SpeechError;

/// A host text-to-speech engine.
#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    /// False when the host has no usable engine; speaking is then skipped.
    fn is_available(&self) -> bool {
        true
    }

    /// Drop whatever the engine is currently saying.
    async fn cancel(&self);

    /// Speak one chunk, resolving when the engine reports it finished.
    async fn speak(&self, chunk: &str) -> Result<(), SpeechError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeakOutcome {
    pub chunks_total: usize,
    pub chunks_spoken: usize,
    pub cancelled: bool,
}

/// Split text after `.`, `?` or `!` when followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '?' | '!') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let end = i + c.len_utf8();
                    let s = text[start..end].trim();
                    if !s.is_empty() {
                        sentences.push(s);
                    }
                    start = end;
                }
            }
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

pub struct SpeechOutput {
    engine: Arc<dyn SynthesisEngine>,
    current: Mutex<CancellationToken>,
}

impl SpeechOutput {
    pub fn new(engine: Arc<dyn SynthesisEngine>) -> Self {
        Self {
            engine,
            current: Mutex::new(CancellationToken::new()),
        }
    }

    /// Speak `text` chunk by chunk. A synthesis error aborts the remaining
    /// chunks; an unavailable engine is a silent no-op.
    pub async fn speak(&self, text: &str) -> Result<SpeakOutcome, SpeechError> {
        let chunks = split_sentences(text);
        let mut outcome = SpeakOutcome {
            chunks_total: chunks.len(),
            chunks_spoken: 0,
            cancelled: false,
        };

        if !self.engine.is_available() {
            debug!("No synthesis engine available, skipping speech");
            return Ok(outcome);
        }

        let token = self.preempt();
        self.engine.cancel().await;

        for (i, chunk) in chunks.iter().enumerate() {
            if token.is_cancelled() {
                outcome.cancelled = true;
                break;
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!("Speech cancelled during chunk {}/{}", i + 1, chunks.len());
                    outcome.cancelled = true;
                    break;
                }
                result = self.engine.speak(chunk) => {
                    if let Err(e) = result {
                        warn!("Synthesis failed on chunk {}/{}: {e}", i + 1, chunks.len());
                        return Err(e);
                    }
                }
            }

            outcome.chunks_spoken += 1;
            debug!("Spoke chunk {}/{}", i + 1, chunks.len());
        }

        Ok(outcome)
    }

    /// Stop the sequence in progress, if any.
    pub async fn cancel(&self) {
        self.current.lock().unwrap().cancel();
        self.engine.cancel().await;
    }

    /// Cancel the previous sequence and install a fresh token for a new one.
    fn preempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().unwrap();
        current.cancel();
        *current = token.clone();
        token
    }
}
