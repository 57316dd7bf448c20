//! OpenAI realtime connector.
//!
//! Speaks the realtime WebSocket dialect: JSON events both ways, audio
//! carried base64-encoded inside `input_audio_buffer.append` and
//! `response.audio.delta`. A translator task owns the socket and maps
//! between wire events and [`Frame`]s, so the rest of the gateway never
//! sees the dialect.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::BackendConnector;
use crate::config::BackendConfig;
use crate::error::SessionError;
use crate::relay::{channel_duplex, ControlFrame, Duplex, Frame, TranscriptRole};

const TRANSLATOR_CAPACITY: usize = 64;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },
    #[serde(rename = "input_audio_buffer.append")]
    AudioAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    AudioCommit,
    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Serialize)]
struct SessionSettings {
    modalities: Vec<&'static str>,
    instructions: String,
    voice: String,
    input_audio_format: &'static str,
    output_audio_format: &'static str,
    input_audio_transcription: TranscriptionSettings,
    turn_detection: TurnDetectionSettings,
}

#[derive(Serialize)]
struct TranscriptionSettings {
    model: &'static str,
}

#[derive(Serialize)]
struct TurnDetectionSettings {
    #[serde(rename = "type")]
    kind: &'static str,
    threshold: f32,
    prefix_padding_ms: u32,
    silence_duration_ms: u32,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { transcript: String },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone { transcript: String },
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { error: WireError },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

pub struct OpenAiConnector {
    config: BackendConfig,
}

impl OpenAiConnector {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    fn session_settings(&self, prompt: &str) -> SessionSettings {
        SessionSettings {
            modalities: vec!["text", "audio"],
            instructions: prompt.to_string(),
            voice: self.config.voice.clone(),
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
            input_audio_transcription: TranscriptionSettings { model: "whisper-1" },
            turn_detection: TurnDetectionSettings {
                kind: "server_vad",
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
            },
        }
    }

    async fn try_connect(
        &self,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        String,
    > {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| format!("bad backend url: {e}"))?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            format!("Bearer {}", self.config.api_key)
                .parse()
                .map_err(|_| "api key is not a valid header value".to_string())?,
        );
        headers.insert("OpenAI-Beta", "realtime=v1".parse().expect("static header"));

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| e.to_string())?;
        Ok(stream)
    }
}

#[async_trait]
impl BackendConnector for OpenAiConnector {
    async fn open(&self, prompt: &str) -> Result<Duplex, SessionError> {
        let attempts = self.config.connect_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.try_connect().await {
                Ok(mut ws) => {
                    info!(attempt, "backend connection established");

                    let update = ClientEvent::SessionUpdate {
                        session: self.session_settings(prompt),
                    };
                    let json = serde_json::to_string(&update)
                        .map_err(|e| SessionError::Transport(e.to_string()))?;
                    ws.send(Message::Text(json)).await.map_err(|e| {
                        SessionError::BackendUnavailable {
                            attempts: attempt,
                            message: format!("session setup failed: {e}"),
                        }
                    })?;

                    let (near, far) = channel_duplex(TRANSLATOR_CAPACITY);
                    tokio::spawn(translate(ws, far));
                    return Ok(near);
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "backend connect failed");
                    last_error = e;
                    if attempt < attempts {
                        tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
                    }
                }
            }
        }

        Err(SessionError::BackendUnavailable {
            attempts,
            message: last_error,
        })
    }
}

/// Owns the socket for the life of one conversation. Ends when either
/// the relay side or the wire closes; dropping the duplex end is what
/// tells the bridge the backend went away.
async fn translate(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    relay: Duplex,
) {
    let (mut ws_sink, mut ws_stream) = ws.split();
    let Duplex {
        source: mut relay_source,
        sink: mut relay_sink,
    } = relay;

    loop {
        tokio::select! {
            frame = relay_source.recv() => {
                let frame = match frame {
                    Ok(Some(f)) => f,
                    Ok(None) | Err(_) => break,
                };
                let events = match outbound_events(frame) {
                    Some(events) => events,
                    None => continue,
                };
                let mut failed = false;
                for event in events {
                    let json = match serde_json::to_string(&event) {
                        Ok(j) => j,
                        Err(e) => {
                            warn!(error = %e, "unencodable backend event dropped");
                            continue;
                        }
                    };
                    if let Err(e) = ws_sink.send(Message::Text(json)).await {
                        warn!(error = %e, "backend send failed");
                        failed = true;
                        break;
                    }
                }
                if failed {
                    break;
                }
            }

            message = ws_stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let event = match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(e) => e,
                            Err(e) => {
                                debug!(error = %e, "unparsed backend event ignored");
                                continue;
                            }
                        };
                        let Some(frame) = inbound_frame(event) else { continue };
                        if relay_sink.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("backend closed the conversation");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "backend socket error");
                        break;
                    }
                }
            }
        }
    }

    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Map one relay frame to the wire events it produces, if any.
fn outbound_events(frame: Frame) -> Option<Vec<ClientEvent>> {
    match frame {
        Frame::Audio(data) => Some(vec![ClientEvent::AudioAppend {
            audio: BASE64.encode(&data),
        }]),
        // Device finished a turn: commit the buffer and ask for a response.
        Frame::Control(ControlFrame::AudioEnd) => {
            Some(vec![ClientEvent::AudioCommit, ClientEvent::ResponseCreate])
        }
        // Everything else is device-side plumbing the backend never sees.
        Frame::Text(_) | Frame::Control(_) => None,
    }
}

/// Map one wire event to the relay frame it produces, if any.
fn inbound_frame(event: ServerEvent) -> Option<Frame> {
    match event {
        ServerEvent::AudioDelta { delta } => match BASE64.decode(delta.as_bytes()) {
            Ok(audio) => Some(Frame::Audio(Bytes::from(audio))),
            Err(e) => {
                warn!(error = %e, "undecodable audio delta dropped");
                None
            }
        },
        ServerEvent::InputTranscriptionCompleted { transcript } => {
            Some(Frame::Control(ControlFrame::Transcript {
                role: TranscriptRole::Device,
                text: transcript,
            }))
        }
        ServerEvent::AudioTranscriptDone { transcript } => {
            Some(Frame::Control(ControlFrame::Transcript {
                role: TranscriptRole::Assistant,
                text: transcript,
            }))
        }
        ServerEvent::ResponseDone => Some(Frame::Control(ControlFrame::AudioEnd)),
        ServerEvent::Error { error } => Some(Frame::Control(ControlFrame::Error {
            code: error.code.unwrap_or_else(|| "backend_error".into()),
            message: error.message,
        })),
        ServerEvent::SessionCreated | ServerEvent::Other => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_frames_become_base64_appends() {
        let events = outbound_events(Frame::Audio(Bytes::from_static(&[1, 2, 3]))).unwrap();
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], BASE64.encode([1u8, 2, 3]));
    }

    #[test]
    fn audio_end_commits_and_requests_a_response() {
        let events = outbound_events(Frame::Control(ControlFrame::AudioEnd)).unwrap();
        let kinds: Vec<_> = events
            .iter()
            .map(|e| serde_json::to_value(e).unwrap()["type"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(kinds, vec!["input_audio_buffer.commit", "response.create"]);
    }

    #[test]
    fn audio_deltas_are_decoded() {
        let event: ServerEvent = serde_json::from_str(&format!(
            r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
            BASE64.encode(b"pcm")
        ))
        .unwrap();
        assert_eq!(
            inbound_frame(event),
            Some(Frame::Audio(Bytes::from_static(b"pcm")))
        );
    }

    #[test]
    fn transcription_events_carry_roles() {
        let device: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#,
        )
        .unwrap();
        assert_eq!(
            inbound_frame(device),
            Some(Frame::Control(ControlFrame::Transcript {
                role: TranscriptRole::Device,
                text: "hello".into(),
            }))
        );

        let assistant: ServerEvent = serde_json::from_str(
            r#"{"type":"response.audio_transcript.done","transcript":"once upon a time"}"#,
        )
        .unwrap();
        assert_eq!(
            inbound_frame(assistant),
            Some(Frame::Control(ControlFrame::Transcript {
                role: TranscriptRole::Assistant,
                text: "once upon a time".into(),
            }))
        );
    }

    #[test]
    fn unknown_server_events_are_ignored() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(inbound_frame(event).is_none());
    }

    #[test]
    fn session_settings_use_server_vad() {
        let connector = OpenAiConnector::new(BackendConfig {
            url: "wss://example.test/v1/realtime".into(),
            api_key: "sk-test".into(),
            voice: "ballad".into(),
            connect_retries: 3,
        });
        let json = serde_json::to_value(ClientEvent::SessionUpdate {
            session: connector.session_settings("Tell a story."),
        })
        .unwrap();

        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "ballad");
        assert_eq!(json["session"]["instructions"], "Tell a story.");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["input_audio_transcription"]["model"], "whisper-1");
    }
}
