//! WebSocket client for the live speech model
//!
//! Implements the bidirectional generate-content protocol: a `setup`
//! message opens the session, microphone audio flows out as
//! `realtimeInput` media chunks, and synthesized speech comes back as
//! `serverContent` parts carrying inline base64 PCM, optionally with an
//! interruption flag when the user talks over the model.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::transport::{ClientMessage, ServerEvent, SessionSetup, Transport, TransportConnection};

/// Default endpoint of the bidirectional generate-content service
pub const DEFAULT_ENDPOINT: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// WebSocket transport to the hosted speech model
pub struct LiveTransport {
    endpoint: String,
    api_key: String,
}

impl LiveTransport {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

impl Transport for LiveTransport {
    fn open(&self, setup: SessionSetup) -> BoxFuture<'static, Result<TransportConnection, TransportError>> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        Box::pin(async move { open_session(url, setup).await })
    }
}

async fn open_session(url: String, setup: SessionSetup) -> Result<TransportConnection, TransportError> {
    let (ws, _) = connect_async(&url)
        .await
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
    let (mut write, mut read) = ws.split();

    let setup_msg = SetupMessage::from(&setup);
    let json = serde_json::to_string(&setup_msg)
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
    write
        .send(Message::Text(json))
        .await
        .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

    // The server acknowledges the configuration before any audio flows
    wait_for_setup_ack(&mut read).await?;
    tracing::info!("Live session opened with model {}", setup.model);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match message {
                ClientMessage::Audio(chunk) => {
                    let input = RealtimeInputMessage {
                        realtime_input: RealtimeInput {
                            media_chunks: vec![MediaChunk {
                                mime_type: chunk.mime_type,
                                data: chunk.data,
                            }],
                        },
                    };
                    let json = match serde_json::to_string(&input) {
                        Ok(j) => j,
                        Err(e) => {
                            tracing::warn!("Failed to serialize audio chunk: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        tracing::warn!("{}", TransportError::SendFailed(e.to_string()));
                        break;
                    }
                }
                ClientMessage::Close => {
                    // Close errors are tolerated; the session is over either way
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => dispatch_server_message(text.as_bytes(), &event_tx),
                Ok(Message::Binary(bytes)) => dispatch_server_message(&bytes, &event_tx),
                Ok(Message::Close(_)) => {
                    let _ = event_tx.send(ServerEvent::Error(TransportError::ClosedByPeer));
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = event_tx.send(ServerEvent::Error(TransportError::Runtime(e.to_string())));
                    return;
                }
            }
        }
        let _ = event_tx.send(ServerEvent::Error(TransportError::ClosedByPeer));
    });

    Ok(TransportConnection {
        outbound: out_tx,
        inbound: event_rx,
    })
}

async fn wait_for_setup_ack<S>(read: &mut S) -> Result<(), TransportError>
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        let frame = frame.map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        let bytes = match &frame {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(bytes) => bytes.as_slice(),
            Message::Close(_) => {
                return Err(TransportError::OpenFailed(
                    "session closed during setup".to_string(),
                ))
            }
            _ => continue,
        };
        if let Ok(message) = serde_json::from_slice::<ServerMessage>(bytes) {
            if message.setup_complete.is_some() {
                return Ok(());
            }
        }
    }
    Err(TransportError::OpenFailed(
        "stream ended during setup".to_string(),
    ))
}

fn dispatch_server_message(bytes: &[u8], events: &mpsc::UnboundedSender<ServerEvent>) {
    let message: ServerMessage = match serde_json::from_slice(bytes) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!("Ignoring unparseable server message: {}", e);
            return;
        }
    };

    let Some(content) = message.server_content else {
        return;
    };

    // Audio parts may be mixed with text or other data
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(inline) = part.inline_data {
                let _ = events.send(ServerEvent::Audio { data: inline.data });
            }
        }
    }
    if content.interrupted.unwrap_or(false) {
        let _ = events.send(ServerEvent::Interrupted);
    }
    if content.turn_complete.unwrap_or(false) {
        let _ = events.send(ServerEvent::TurnComplete);
    }
}

// ---- wire format -----------------------------------------------------------

#[derive(Serialize)]
struct SetupMessage {
    setup: Setup,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup {
    model: String,
    generation_config: GenerationConfig,
    system_instruction: Content,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
    speech_config: SpeechConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig {
    voice_config: VoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig {
    prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig {
    voice_name: String,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<TextPart>,
}

#[derive(Serialize)]
struct TextPart {
    text: String,
}

impl From<&SessionSetup> for SetupMessage {
    fn from(setup: &SessionSetup) -> Self {
        SetupMessage {
            setup: Setup {
                model: setup.model.clone(),
                generation_config: GenerationConfig {
                    // The session is audio-only in both directions
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: setup.voice.clone(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: setup.system_instruction.clone(),
                    }],
                },
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage {
    realtime_input: RealtimeInput,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput {
    media_chunks: Vec<MediaChunk>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaChunk {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    #[serde(default)]
    setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    server_content: Option<ServerContent>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    #[serde(default)]
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: Option<bool>,
    #[serde(default)]
    turn_complete: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
}
