//! Transport to the remote speech model
//!
//! The session controller talks to the model through the [`Transport`]
//! trait: one `open` yields a pair of channels, outbound for encoded
//! microphone chunks and inbound for server events. The production
//! implementation in [`live`] speaks the model's WebSocket protocol;
//! tests substitute an in-memory transport.

pub mod live;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::codec::WireChunk;
use crate::error::TransportError;

pub use live::LiveTransport;

/// Fixed configuration sent when the session opens
#[derive(Debug, Clone)]
pub struct SessionSetup {
    /// Model identifier, e.g. `models/gemini-2.5-flash-native-audio-preview-09-2025`
    pub model: String,
    /// Named synthesized voice preset
    pub voice: String,
    /// Persona and behavioral constraints for the assistant
    pub system_instruction: String,
}

/// Message from the client to the model
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// One encoded microphone frame
    Audio(WireChunk),
    /// Close the session; no further messages follow
    Close,
}

/// Event from the model to the client
#[derive(Debug)]
pub enum ServerEvent {
    /// One audio part of an inbound message, as a base64 PCM payload
    Audio { data: String },
    /// Previously sent model speech should be discarded
    Interrupted,
    /// The model finished its turn
    TurnComplete,
    /// The session ended: [`TransportError::ClosedByPeer`] for a clean
    /// remote close, [`TransportError::Runtime`] for a failure
    Error(TransportError),
}

/// An established session: outbound sink plus inbound event stream.
///
/// Dropping the outbound sender (or sending [`ClientMessage::Close`])
/// ends the session; teardown past that point is fire-and-forget.
pub struct TransportConnection {
    pub outbound: UnboundedSender<ClientMessage>,
    pub inbound: UnboundedReceiver<ServerEvent>,
}

/// Factory for live sessions
pub trait Transport: Send + Sync {
    fn open(&self, setup: SessionSetup) -> BoxFuture<'static, Result<TransportConnection, TransportError>>;
}
