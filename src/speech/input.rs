//! Speech input loop.
//!
//! Keeps a host recognition engine listening until a finalized utterance
//! arrives, restarting it whenever it ends on its own or errors out.
//!
//! LISTENING → (final result) → caller responds → LISTENING ...
//! LISTENING → (stop_listening) → STOPPED

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SpeechError;

/// One recognized segment as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSegment {
    pub transcript: String,
    pub is_final: bool,
}

impl RecognitionSegment {
    pub fn finalized(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
        }
    }
}

/// Events a recognition engine pushes to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Result(Vec<RecognitionSegment>),
    End,
    Error(String),
}

/// A host speech-recognition engine in continuous, final-results-only mode.
/// Engines report through the event channel handed to them at construction.
/// Stopping a running engine is followed by one `End` event.
pub trait RecognitionEngine: Send {
    fn start(&mut self) -> Result<(), SpeechError>;
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Listening,
    Stopped,
}

impl std::fmt::Display for ListenState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Listening => write!(f, "LISTENING"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListenTimings {
    /// Delay before restarting after an engine error.
    pub restart_delay: Duration,
    /// Force a restart if no finalized result arrives within this window.
    pub watchdog: Duration,
}

impl Default for ListenTimings {
    fn default() -> Self {
        Self {
            restart_delay: Duration::from_secs(1),
            watchdog: Duration::from_secs(30),
        }
    }
}

/// Stops a [`SpeechInputLoop`] from outside; no restarts happen afterwards.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn stop_listening(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct SpeechInputLoop<E> {
    engine: E,
    events: mpsc::Receiver<RecognitionEvent>,
    cancel: CancellationToken,
    timings: ListenTimings,
    state: ListenState,
}

impl<E: RecognitionEngine> SpeechInputLoop<E> {
    pub fn new(
        engine: E,
        events: mpsc::Receiver<RecognitionEvent>,
        timings: ListenTimings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            events,
            cancel,
            timings,
            state: ListenState::Stopped,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    /// Listen until a finalized utterance arrives and return it, with the
    /// engine stopped. Call again after responding to keep listening.
    /// Returns `None` once the loop has been stopped.
    pub async fn next_utterance(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            self.state = ListenState::Stopped;
            return None;
        }

        // Events from the previous cycle (e.g. the `end` after our own stop).
        while self.events.try_recv().is_ok() {}

        self.state = ListenState::Listening;
        info!("State: {}", self.state);

        let cancel = self.cancel.clone();
        let mut retry_at = self.start_engine();
        let mut watchdog_at = Instant::now() + self.timings.watchdog;
        // `End` events owed by our own watchdog stops.
        let mut own_ends = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.engine.stop();
                    self.state = ListenState::Stopped;
                    info!("State: LISTENING → {}", self.state);
                    return None;
                }
                event = self.events.recv() => match event {
                    Some(RecognitionEvent::Result(segments)) => {
                        let text = finalized_text(&segments);
                        if !text.is_empty() {
                            self.engine.stop();
                            debug!("Finalized utterance: '{text}'");
                            return Some(text);
                        }
                    }
                    Some(RecognitionEvent::End) => {
                        if own_ends > 0 {
                            own_ends -= 1;
                        } else if retry_at.is_none() {
                            debug!("Recognition ended while listening, restarting");
                            retry_at = self.start_engine();
                        }
                    }
                    Some(RecognitionEvent::Error(e)) => {
                        warn!("Speech recognition error: {e}");
                        retry_at = Some(Instant::now() + self.timings.restart_delay);
                    }
                    None => {
                        warn!("Recognition event channel closed");
                        self.engine.stop();
                        self.state = ListenState::Stopped;
                        return None;
                    }
                },
                _ = sleep_until(watchdog_at) => {
                    info!(
                        "No utterance in {}s, restarting recognition",
                        self.timings.watchdog.as_secs()
                    );
                    if retry_at.is_none() {
                        own_ends += 1;
                    }
                    self.engine.stop();
                    retry_at = self.start_engine();
                    watchdog_at = Instant::now() + self.timings.watchdog;
                }
                _ = sleep_until_some(retry_at) => {
                    retry_at = self.start_engine();
                }
            }
        }
    }

    /// Start the engine; on failure return when to try again.
    fn start_engine(&mut self) -> Option<Instant> {
        match self.engine.start() {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to start recognition: {e}");
                Some(Instant::now() + self.timings.restart_delay)
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Trimmed finalized segments joined by single spaces.
fn finalized_text(segments: &[RecognitionSegment]) -> String {
    segments
        .iter()
        .filter(|s| s.is_final)
        .map(|s| s.transcript.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingEngine {
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        fail_first_start: bool,
        events: Option<mpsc::Sender<RecognitionEvent>>,
    }

    impl RecognitionEngine for CountingEngine {
        fn start(&mut self) -> Result<(), SpeechError> {
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_first_start && n == 0 {
                return Err(SpeechError::Recognition("mic busy".into()));
            }
            Ok(())
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(events) = &self.events {
                let _ = events.try_send(RecognitionEvent::End);
            }
        }
    }

    type Looped = (
        CountingEngine,
        mpsc::Sender<RecognitionEvent>,
        SpeechInputLoop<CountingEngine>,
    );

    fn looped(mut engine: CountingEngine) -> Looped {
        let (tx, rx) = mpsc::channel(16);
        engine.events = Some(tx.clone());
        let lp = SpeechInputLoop::new(
            engine.clone(),
            rx,
            ListenTimings::default(),
            CancellationToken::new(),
        );
        (engine, tx, lp)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn final_result(text: &str) -> RecognitionEvent {
        RecognitionEvent::Result(vec![RecognitionSegment::finalized(text)])
    }

    #[tokio::test]
    async fn final_result_stops_engine_and_yields_text() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let task = tokio::spawn(async move {
            let text = lp.next_utterance().await;
            (lp, text)
        });
        settle().await;

        tx.send(RecognitionEvent::Result(vec![
            RecognitionSegment::finalized("  hello "),
            RecognitionSegment {
                transcript: "interim".into(),
                is_final: false,
            },
            RecognitionSegment::finalized("robot"),
        ]))
        .await
        .unwrap();

        let (lp, text) = task.await.unwrap();
        assert_eq!(text.as_deref(), Some("hello robot"));
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
        assert_eq!(lp.state(), ListenState::Listening);
    }

    #[tokio::test]
    async fn blank_results_keep_listening() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;

        tx.send(final_result("   ")).await.unwrap();
        settle().await;
        assert_eq!(engine.stops.load(Ordering::SeqCst), 0);

        tx.send(final_result("ok")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn end_event_while_listening_restarts_engine() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);

        tx.send(RecognitionEvent::End).await.unwrap();
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);

        tx.send(final_result("done")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn error_restarts_after_one_second() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;

        tx.send(RecognitionEvent::Error("network".into())).await.unwrap();
        settle().await;
        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);

        tx.send(final_result("again")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("again"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_is_retried_after_delay() {
        let (engine, tx, mut lp) = looped(CountingEngine {
            fail_first_start: true,
            ..Default::default()
        });
        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);

        tx.send(final_result("hi")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_forces_stop_and_restart() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 3);

        tx.send(final_result("finally")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("finally"));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_restart_does_not_start_twice_on_its_own_end() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        // The stop queued an `End`; it must not trigger another start.
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
        assert_eq!(engine.starts.load(Ordering::SeqCst), 2);

        // A later, genuine end still restarts.
        tx.send(RecognitionEvent::End).await.unwrap();
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 3);

        tx.send(final_result("ok")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn no_restarts_after_stop_listening() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        let stop = lp.stop_handle();
        let task = tokio::spawn(async move {
            let text = lp.next_utterance().await;
            (lp, text)
        });
        settle().await;

        stop.stop_listening();
        let (mut lp, text) = task.await.unwrap();
        assert_eq!(text, None);
        assert_eq!(lp.state(), ListenState::Stopped);
        assert_eq!(engine.stops.load(Ordering::SeqCst), 1);

        tx.send(RecognitionEvent::End).await.unwrap();
        tx.send(RecognitionEvent::Error("late".into())).await.unwrap();
        tx.send(final_result("ignored")).await.unwrap();

        assert_eq!(lp.next_utterance().await, None);
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn stale_events_are_discarded_on_reentry() {
        let (engine, tx, mut lp) = looped(CountingEngine::default());
        tx.send(final_result("stale")).await.unwrap();
        tx.send(RecognitionEvent::End).await.unwrap();

        let task = tokio::spawn(async move { lp.next_utterance().await });
        settle().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);

        tx.send(final_result("fresh")).await.unwrap();
        assert_eq!(task.await.unwrap().as_deref(), Some("fresh"));
    }
}
