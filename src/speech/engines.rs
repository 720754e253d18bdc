//! Concrete host engines for the voice client.
//!
//! - [`ConsoleRecognizer`]: typed lines stand in for finalized utterances.
//!   Lines typed while the recognizer is stopped wait until it restarts.
//! - [`HttpSynthesizer`]: drives a Code-Speaker-compatible TTS API
//!   (`POST /speak`, `GET /status`, `POST /cancel`), treating the server's
//!   `speaking` flag going false as the chunk's completion event.
//! - [`NoSynthesizer`]: stands in when no TTS is configured.

use std::io::BufRead;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::input::{RecognitionEngine, RecognitionEvent, RecognitionSegment};
use super::output::SynthesisEngine;
use crate::error::SpeechError;

// --- Console recognition ---

#[derive(Debug, Clone, Copy, Default)]
struct ListenFlag {
    active: bool,
    /// Incremented on every start.
    generation: u64,
}

pub struct ConsoleRecognizer {
    flag: watch::Sender<ListenFlag>,
    events: mpsc::Sender<RecognitionEvent>,
}

type Line = std::io::Result<String>;

impl ConsoleRecognizer {
    /// Recognizer over the process's stdin. End of input cancels `on_eof`.
    pub fn stdin(events: mpsc::Sender<RecognitionEvent>, on_eof: CancellationToken) -> Self {
        Self::from_blocking_reader(std::io::BufReader::new(std::io::stdin()), events, on_eof)
    }

    /// Lines are read on a dedicated thread, so a read that never returns
    /// does not hold up runtime shutdown.
    pub fn from_blocking_reader<R>(
        reader: R,
        events: mpsc::Sender<RecognitionEvent>,
        on_eof: CancellationToken,
    ) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (line_tx, line_rx) = mpsc::channel::<Line>(16);
        std::thread::spawn(move || {
            for line in reader.lines() {
                if line_tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self::from_lines(line_rx, events, on_eof)
    }

    pub fn from_reader<R>(
        reader: R,
        events: mpsc::Sender<RecognitionEvent>,
        on_eof: CancellationToken,
    ) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (line_tx, line_rx) = mpsc::channel::<Line>(16);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => Ok(line),
                    Ok(None) => return,
                    Err(e) => Err(e),
                };
                if line_tx.send(line).await.is_err() {
                    return;
                }
            }
        });
        Self::from_lines(line_rx, events, on_eof)
    }

    fn from_lines(
        lines: mpsc::Receiver<Line>,
        events: mpsc::Sender<RecognitionEvent>,
        on_eof: CancellationToken,
    ) -> Self {
        let (flag, flag_rx) = watch::channel(ListenFlag::default());
        tokio::spawn(forward_lines(lines, flag_rx, events.clone(), on_eof));
        Self { flag, events }
    }
}

async fn forward_lines(
    mut lines: mpsc::Receiver<Line>,
    mut flag: watch::Receiver<ListenFlag>,
    events: mpsc::Sender<RecognitionEvent>,
    on_eof: CancellationToken,
) {
    let mut last_sent: Option<u64> = None;

    loop {
        match lines.recv().await {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                // One utterance per listen cycle.
                let fresh = |f: &ListenFlag| f.active && last_sent.map_or(true, |g| f.generation > g);
                let generation = match flag.wait_for(fresh).await {
                    Ok(f) => f.generation,
                    Err(_) => return,
                };
                let event = RecognitionEvent::Result(vec![RecognitionSegment::finalized(line)]);
                if events.send(event).await.is_err() {
                    return;
                }
                last_sent = Some(generation);
            }
            None => {
                // Let the last utterance be answered before closing: wait
                // for the listen cycle that follows it.
                let needed = last_sent.map_or(1, |g| g + 1);
                let _ = flag.wait_for(|f| f.generation >= needed).await;
                info!("Console input closed");
                on_eof.cancel();
                return;
            }
            Some(Err(e)) => {
                let _ = events.send(RecognitionEvent::Error(e.to_string())).await;
            }
        }
    }
}

impl RecognitionEngine for ConsoleRecognizer {
    fn start(&mut self) -> Result<(), SpeechError> {
        self.flag.send_modify(|f| {
            f.active = true;
            f.generation += 1;
        });
        debug!("Console recognizer listening");
        Ok(())
    }

    fn stop(&mut self) {
        let mut was_active = false;
        self.flag.send_modify(|f| {
            was_active = f.active;
            f.active = false;
        });
        if was_active {
            let _ = self.events.try_send(RecognitionEvent::End);
        }
    }
}

// --- HTTP synthesis ---

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
    summarize: bool,
    event_type: &'a str,
    start_reminder: bool,
}

#[derive(Deserialize)]
struct SpeakResponse {
    status: String,
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    speaking: bool,
    #[serde(default)]
    model_loaded: Option<bool>,
}

pub struct HttpSynthesizer {
    client: Client,
    base_url: String,
    available: bool,
    poll_interval: Duration,
    /// How long to wait for the server to report `speaking` after a request.
    start_grace: Duration,
}

impl HttpSynthesizer {
    /// Probe the TTS API; an unreachable server or unloaded model makes the
    /// synthesizer unavailable.
    pub async fn connect(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");
        let base_url = base_url.trim_end_matches('/').to_string();

        let available = match client.get(format!("{base_url}/status")).send().await {
            Ok(resp) => match resp.json::<StatusResponse>().await {
                Ok(status) => status.model_loaded.unwrap_or(true),
                Err(e) => {
                    warn!("Unexpected TTS status response: {e}");
                    false
                }
            },
            Err(e) => {
                warn!("TTS API not reachable at {base_url}: {e}");
                false
            }
        };

        if available {
            info!("Speech synthesis via {base_url}");
        } else {
            info!("Speech synthesis unavailable, replies will be text only");
        }

        Self {
            client,
            base_url,
            available,
            poll_interval: Duration::from_millis(50),
            start_grace: Duration::from_secs(2),
        }
    }

    async fn is_speaking(&self) -> Result<bool, SpeechError> {
        let status: StatusResponse = self
            .client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("status request failed: {e}")))?
            .json()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("bad status response: {e}")))?;
        Ok(status.speaking)
    }
}

#[async_trait]
impl SynthesisEngine for HttpSynthesizer {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn cancel(&self) {
        if let Err(e) = self
            .client
            .post(format!("{}/cancel", self.base_url))
            .send()
            .await
        {
            debug!("TTS cancel failed: {e}");
        }
    }

    async fn speak(&self, chunk: &str) -> Result<(), SpeechError> {
        let resp: SpeakResponse = self
            .client
            .post(format!("{}/speak", self.base_url))
            .json(&SpeakRequest {
                text: chunk,
                summarize: false,
                event_type: "joyna",
                start_reminder: false,
            })
            .send()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("speak request failed: {e}")))?
            .json()
            .await
            .map_err(|e| SpeechError::Synthesis(format!("bad speak response: {e}")))?;

        if resp.status == "error" {
            return Err(SpeechError::Synthesis(
                resp.error.unwrap_or_else(|| "unknown TTS error".into()),
            ));
        }

        // The server speaks in the background: wait for it to start, then
        // for it to finish.
        let deadline = Instant::now() + self.start_grace;
        while !self.is_speaking().await? {
            if Instant::now() >= deadline {
                debug!("TTS never reported speaking, assuming chunk finished");
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        while self.is_speaking().await? {
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }
}

/// Engine used when speech output is disabled.
pub struct NoSynthesizer;

#[async_trait]
impl SynthesisEngine for NoSynthesizer {
    fn is_available(&self) -> bool {
        false
    }

    async fn cancel(&self) {}

    async fn speak(&self, _chunk: &str) -> Result<(), SpeechError> {
        Ok(())
    }
}
