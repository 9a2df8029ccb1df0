//! Streaming speech providers
//!
//! Speech-to-text and text-to-speech both run over long-lived provider
//! WebSockets. Events flow back to the session through channels handed to
//! the adapters at construction.

mod error;
mod sentence;
mod synthesizer;
mod transcriber;

pub use error::SpeechError;
pub use sentence::SentenceStreamer;
pub use synthesizer::ElevenLabsSynthesizer;
pub use transcriber::ElevenLabsTranscriber;

use crate::state_machine::CycleId;
use rand::Rng;
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Transcript updates from the speech-to-text provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Interim hypothesis; the user is speaking
    Partial(String),
    /// Final text for a finished utterance
    Committed(String),
    /// The provider refused the session for good; no more transcripts will arrive
    Failed(String),
}

/// Output of the synthesizer, tagged with the cycle whose text produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisEvent {
    Audio { cycle: CycleId, audio: Vec<u8> },
    Done { cycle: CycleId },
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_MAX: Duration = Duration::from_secs(8);

/// Delay before reconnect attempt `attempt` (0-based).
///
/// Exponential from 250ms, capped at 8s, plus 0-25% random jitter (still capped).
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_MAX);
    let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.25));
    (base + jitter).min(BACKOFF_MAX)
}

/// Open a provider WebSocket authenticated with an `xi-api-key` header
async fn connect_ws(url: &str, api_key: &str) -> Result<WsStream, SpeechError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| SpeechError::Connect(format!("Invalid URL {url}: {e}")))?;
    let key = HeaderValue::from_str(api_key)
        .map_err(|e| SpeechError::Connect(format!("Invalid API key header: {e}")))?;
    request.headers_mut().insert("xi-api-key", key);

    let (stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| SpeechError::Connect(e.to_string()))?;
    Ok(stream)
}
