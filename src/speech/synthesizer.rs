//! ElevenLabs streaming text-to-speech (stream-input WebSocket)

use super::{connect_ws, SpeechError, SynthesisEvent};
use crate::config::SpeechConfig;
use crate::runtime::SpeechSynthesizer;
use crate::state_machine::CycleId;
use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// One provider connection, bound to one cycle
struct ActiveStream {
    cycle: CycleId,
    /// `None` once end-of-stream was sent; audio may still be arriving
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    cancel: CancellationToken,
}

pub struct ElevenLabsSynthesizer {
    url: String,
    api_key: String,
    events: mpsc::UnboundedSender<SynthesisEvent>,
    active: Mutex<Option<ActiveStream>>,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: &SpeechConfig, api_key: String, events: mpsc::UnboundedSender<SynthesisEvent>) -> Self {
        let url = format!(
            "wss://api.elevenlabs.io/v1/text-to-speech/{}/stream-input?model_id={}&output_format=pcm_{}",
            config.voice_id, config.tts_model, config.sample_rate
        );
        Self {
            url,
            api_key,
            events,
            active: Mutex::new(None),
        }
    }

    fn send(&self, payload: &Value) -> Result<(), SpeechError> {
        let guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let outgoing = guard
            .as_ref()
            .and_then(|stream| stream.outgoing.as_ref())
            .ok_or(SpeechError::NotOpen)?;
        outgoing
            .send(Message::Text(payload.to_string()))
            .map_err(|_| SpeechError::Closed)
    }
}

/// The provider expects every text chunk to end with a space
fn spaced(text: &str) -> String {
    if text.ends_with(char::is_whitespace) {
        text.to_string()
    } else {
        format!("{text} ")
    }
}

/// What one provider frame means for the stream
#[derive(Debug, PartialEq, Eq)]
enum ProviderFrame {
    Audio(Vec<u8>),
    Final,
    Error(String),
    Ignored,
}

fn parse_frame(text: &str) -> ProviderFrame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return ProviderFrame::Error(format!("Unparseable frame: {text}"));
    };
    if let Some(audio) = value.get("audio").and_then(Value::as_str) {
        return match base64::engine::general_purpose::STANDARD.decode(audio) {
            Ok(bytes) if !bytes.is_empty() => ProviderFrame::Audio(bytes),
            Ok(_) => ProviderFrame::Ignored,
            Err(e) => ProviderFrame::Error(format!("Invalid audio payload: {e}")),
        };
    }
    if value.get("isFinal").and_then(Value::as_bool) == Some(true) {
        return ProviderFrame::Final;
    }
    if let Some(message) = ["error", "message"]
        .iter()
        .find_map(|key| value.get(*key).filter(|v| !v.is_null()))
    {
        return ProviderFrame::Error(message.to_string());
    }
    ProviderFrame::Ignored
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn open(&self, cycle: CycleId) -> Result<(), SpeechError> {
        // A connection is never shared across cycles
        self.interrupt();

        let stream = connect_ws(&self.url, &self.api_key).await?;
        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let cancel = CancellationToken::new();

        // Writer: drains queued frames until end-of-stream or interrupt
        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = writer_cancel.cancelled() => {
                        let _ = sink.close().await;
                        break;
                    }
                    frame = outgoing_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!(cycle = %cycle, error = %e, "TTS write failed");
                            break;
                        }
                    }
                }
            }
        });

        // Reader: forwards audio until the provider reports the final chunk
        let reader_cancel = cancel.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    () = reader_cancel.cancelled() => return,
                    frame = source.next() => frame,
                };
                match frame {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        ProviderFrame::Audio(audio) => {
                            if reader_cancel.is_cancelled() {
                                return;
                            }
                            let _ = events.send(SynthesisEvent::Audio { cycle, audio });
                        }
                        ProviderFrame::Final => break,
                        ProviderFrame::Error(message) => {
                            tracing::warn!(cycle = %cycle, error = %message, "TTS provider error");
                            break;
                        }
                        ProviderFrame::Ignored => {}
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(cycle = %cycle, error = %e, "TTS stream error");
                        break;
                    }
                }
            }
            // Done is reported even after provider errors so the session can settle
            if !reader_cancel.is_cancelled() {
                let _ = events.send(SynthesisEvent::Done { cycle });
            }
        });

        let _ = outgoing.send(Message::Text(json!({ "text": " " }).to_string()));
        let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = guard.replace(ActiveStream {
            cycle,
            outgoing: Some(outgoing),
            cancel,
        }) {
            previous.cancel.cancel();
        }
        tracing::debug!(cycle = %cycle, "TTS stream opened");
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), SpeechError> {
        self.send(&json!({ "text": spaced(text) }))
    }

    async fn send_chunk(&self, text: &str) -> Result<(), SpeechError> {
        self.send(&json!({ "text": spaced(text), "try_trigger_generation": true }))
    }

    async fn flush(&self) -> Result<(), SpeechError> {
        self.send(&json!({ "text": " ", "flush": true }))
    }

    async fn close_stream(&self) -> Result<(), SpeechError> {
        let mut guard = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = guard.as_mut().ok_or(SpeechError::NotOpen)?;
        let outgoing = stream.outgoing.take().ok_or(SpeechError::NotOpen)?;
        outgoing
            .send(Message::Text(json!({ "text": "" }).to_string()))
            .map_err(|_| SpeechError::Closed)
    }

    fn interrupt(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(stream) = previous {
            tracing::debug!(cycle = %stream.cycle, "TTS stream interrupted");
            stream.cancel.cancel();
        }
    }
}
