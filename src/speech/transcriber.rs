//! ElevenLabs realtime speech-to-text with transparent reconnect

use super::{backoff_delay, connect_ws, SpeechError, TranscriptEvent, WsStream};
use crate::config::SpeechConfig;
use crate::runtime::TranscriptSource;
use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Attempts for the first connection before `connect` gives up
const INITIAL_CONNECT_ATTEMPTS: u32 = 3;

/// Microphone chunks held while the provider connection is down
const AUDIO_BACKLOG_CHUNKS: usize = 256;

const FAILED_MESSAGE: &str = "Speech recognition is unavailable. Please restart the session.";

/// Bounded queue of microphone audio for the provider connection.
///
/// When the backlog is full new chunks are dropped; one warning per outage.
struct AudioQueue {
    sender: mpsc::Sender<Vec<u8>>,
    dropping: AtomicBool,
}

impl AudioQueue {
    fn new(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let queue = Self {
            sender,
            dropping: AtomicBool::new(false),
        };
        (queue, receiver)
    }

    fn push(&self, chunk: Vec<u8>) -> Result<(), SpeechError> {
        match self.sender.try_send(chunk) {
            Ok(()) => {
                if self.dropping.swap(false, Ordering::Relaxed) {
                    tracing::info!("STT audio backlog draining, accepting microphone audio again");
                }
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                if !self.dropping.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        capacity = self.sender.max_capacity(),
                        "STT audio backlog full, dropping microphone audio"
                    );
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(SpeechError::Closed),
        }
    }
}

pub struct ElevenLabsTranscriber {
    url: String,
    api_key: String,
    sample_rate: u32,
    events: mpsc::UnboundedSender<TranscriptEvent>,
    audio: Mutex<Option<AudioQueue>>,
    shutdown: CancellationToken,
}

impl ElevenLabsTranscriber {
    pub fn new(config: &SpeechConfig, api_key: String, events: mpsc::UnboundedSender<TranscriptEvent>) -> Self {
        let url = format!(
            "wss://api.elevenlabs.io/v1/speech-to-text/realtime?model_id={}&audio_format=pcm_{}&commit_strategy=vad",
            config.stt_model, config.sample_rate
        );
        Self {
            url,
            api_key,
            sample_rate: config.sample_rate,
            events,
            audio: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }
}

/// What one provider message means for the session
#[derive(Debug, PartialEq, Eq)]
enum ProviderMessage {
    Transcript(TranscriptEvent),
    /// Provider ended the session (time limit); reconnect
    Expired(String),
    /// Reconnecting will not help
    Fatal(String),
    Ignored,
}

fn parse_message(text: &str) -> ProviderMessage {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return ProviderMessage::Ignored;
    };
    let transcript = || {
        value
            .get("text")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    };
    let detail = || {
        value
            .get("error")
            .or_else(|| value.get("message"))
            .map_or_else(String::new, Value::to_string)
    };

    match value.get("message_type").and_then(Value::as_str) {
        Some("partial_transcript") => transcript()
            .map_or(ProviderMessage::Ignored, |t| {
                ProviderMessage::Transcript(TranscriptEvent::Partial(t))
            }),
        Some("committed_transcript" | "committed_transcript_with_timestamps") => transcript()
            .map_or(ProviderMessage::Ignored, |t| {
                ProviderMessage::Transcript(TranscriptEvent::Committed(t))
            }),
        Some("session_time_limit_exceeded" | "commit_throttled") => ProviderMessage::Expired(detail()),
        Some("auth_error" | "quota_exceeded" | "unaccepted_terms") => ProviderMessage::Fatal(detail()),
        Some(kind) if kind.contains("error") => ProviderMessage::Expired(detail()),
        _ => ProviderMessage::Ignored,
    }
}

/// Why a connection stopped pumping
enum PumpExit {
    /// Session closed or caller went away
    Stop,
    /// Connection lost; reconnect
    Lost(String),
}

async fn pump(
    stream: &mut WsStream,
    audio: &mut mpsc::Receiver<Vec<u8>>,
    events: &mpsc::UnboundedSender<TranscriptEvent>,
    shutdown: &CancellationToken,
    sample_rate: u32,
) -> PumpExit {
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                let _ = stream.close(None).await;
                return PumpExit::Stop;
            }
            chunk = audio.recv() => {
                let Some(chunk) = chunk else {
                    let _ = stream.close(None).await;
                    return PumpExit::Stop;
                };
                let payload = json!({
                    "message_type": "input_audio_chunk",
                    "audio_base_64": base64::engine::general_purpose::STANDARD.encode(&chunk),
                    "commit": false,
                    "sample_rate": sample_rate,
                });
                if let Err(e) = stream.send(Message::Text(payload.to_string())).await {
                    return PumpExit::Lost(format!("send failed: {e}"));
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_message(&text) {
                    ProviderMessage::Transcript(event) => {
                        if events.send(event).is_err() {
                            return PumpExit::Stop;
                        }
                    }
                    ProviderMessage::Expired(detail) => return PumpExit::Lost(detail),
                    ProviderMessage::Fatal(detail) => {
                        tracing::error!(error = %detail, "STT provider rejected the session");
                        let _ = events.send(TranscriptEvent::Failed(FAILED_MESSAGE.to_string()));
                        return PumpExit::Stop;
                    }
                    ProviderMessage::Ignored => {}
                },
                Some(Ok(Message::Close(frame))) => {
                    return PumpExit::Lost(format!("closed by provider: {frame:?}"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                None => return PumpExit::Lost("stream ended".to_string()),
            }
        }
    }
}

/// Keep one provider connection alive for the lifetime of the session.
///
/// Audio sent while reconnecting stays queued, up to the backlog limit, and
/// is delivered afterwards.
async fn supervise(
    mut stream: WsStream,
    mut audio: mpsc::Receiver<Vec<u8>>,
    events: mpsc::UnboundedSender<TranscriptEvent>,
    shutdown: CancellationToken,
    url: String,
    api_key: String,
    sample_rate: u32,
) {
    loop {
        match pump(&mut stream, &mut audio, &events, &shutdown, sample_rate).await {
            PumpExit::Stop => return,
            PumpExit::Lost(reason) => {
                tracing::warn!(reason = %reason, "STT connection lost, reconnecting");
            }
        }

        let mut attempt = 0;
        stream = loop {
            tokio::select! {
                () = shutdown.cancelled() => return,
                () = tokio::time::sleep(backoff_delay(attempt)) => {}
            }
            match connect_ws(&url, &api_key).await {
                Ok(stream) => {
                    tracing::info!(attempt, "STT reconnected");
                    break stream;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "STT reconnect failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        };
    }
}

#[async_trait]
impl TranscriptSource for ElevenLabsTranscriber {
    async fn connect(&self) -> Result<(), SpeechError> {
        let mut last_error = SpeechError::Closed;
        for attempt in 0..INITIAL_CONNECT_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }
            match connect_ws(&self.url, &self.api_key).await {
                Ok(stream) => {
                    let (queue, audio_rx) = AudioQueue::new(AUDIO_BACKLOG_CHUNKS);
                    *self.audio.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue);
                    tokio::spawn(supervise(
                        stream,
                        audio_rx,
                        self.events.clone(),
                        self.shutdown.clone(),
                        self.url.clone(),
                        self.api_key.clone(),
                        self.sample_rate,
                    ));
                    tracing::debug!("STT connected");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "STT connect failed");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn send_audio(&self, audio: Vec<u8>) -> Result<(), SpeechError> {
        let guard = self.audio.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().ok_or(SpeechError::NotOpen)?.push(audio)
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.audio
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
