//! joyna-voice: terminal voice client for the Joyna chat server.
//!
//! Typed lines play the part of recognized speech; replies are printed and
//! spoken through a Code-Speaker-compatible TTS API when one is reachable.
//! Ctrl-C or end of input ends the session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use joyna_rs::config::Config;
use joyna_rs::speech::engines::{ConsoleRecognizer, HttpSynthesizer, NoSynthesizer};
use joyna_rs::speech::input::{ListenTimings, SpeechInputLoop};
use joyna_rs::speech::output::{SpeechOutput, SynthesisEngine};
use joyna_rs::voice::{run_conversation, ChatClient};

#[derive(Parser, Debug)]
#[command(name = "joyna-voice", about = "Voice loop client for the Joyna companion")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chat server base URL
    #[arg(long)]
    server: Option<String>,

    /// TTS API base URL
    #[arg(long)]
    tts: Option<String>,

    /// Print replies without speaking them
    #[arg(long)]
    no_tts: bool,

    /// Save a session summary to the history log on exit
    #[arg(long)]
    save_on_exit: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr so the conversation stays readable on stdout.
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config.as_deref()).voice;
    if let Some(server) = args.server {
        config.server_url = server;
    }
    if let Some(tts) = args.tts {
        config.tts_url = tts;
    }
    if args.no_tts {
        config.tts_enabled = false;
    }
    config.save_on_exit |= args.save_on_exit;

    let synth: Arc<dyn SynthesisEngine> = if config.tts_enabled {
        Arc::new(HttpSynthesizer::connect(&config.tts_url).await)
    } else {
        Arc::new(NoSynthesizer)
    };
    let speaker = Arc::new(SpeechOutput::new(synth));

    let token = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(32);
    let recognizer = ConsoleRecognizer::stdin(events_tx, token.clone());
    let timings = ListenTimings {
        restart_delay: Duration::from_millis(config.restart_delay_ms),
        watchdog: Duration::from_secs(config.watchdog_secs),
    };
    let mut listener = SpeechInputLoop::new(recognizer, events_rx, timings, token);

    let stop = listener.stop_handle();
    let interrupt_speaker = speaker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Interrupted");
        stop.stop_listening();
        interrupt_speaker.cancel().await;

        // A second Ctrl-C skips the exit work (e.g. saving history).
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    let chat = ChatClient::new(&config.server_url);
    println!("Joyna: {}", joyna_rs::gateway::PERSONA_OPENING);

    run_conversation(&mut listener, &chat, &speaker, |_, reply| {
        println!("Joyna: {reply}");
    })
    .await;

    if config.save_on_exit {
        match chat.append_history().await {
            Ok(true) => println!("Session saved to history."),
            Ok(false) => warn!("Server did not save the session"),
            Err(e) => warn!("Failed to save session: {e}"),
        }
    }

    Ok(())
}
