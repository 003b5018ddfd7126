//! WebSocket Message Envelope
//!
//! Defines the envelope exchanged between clients and the relay, the intent
//! an inbound envelope carries, and the frame codec used by sessions.
//!
//! Wire shape: `{"type": <int>, "roomID": <string>, "message": <string>}`.

use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request to open a fresh room and join it
pub const TYPE_CREATE_ROOM: i64 = 1;
/// Acknowledgment: joined a room
pub const TYPE_JOINED: i64 = 2;
/// Request to leave the current room
pub const TYPE_LEAVE_ROOM: i64 = 3;
/// Acknowledgment: left a room
pub const TYPE_LEFT: i64 = 4;
/// Message for the caller's current room
pub const TYPE_ROOM_SEND: i64 = 5;
/// Relayed room message
pub const TYPE_ROOM_MESSAGE: i64 = 6;
/// Explicit join of a named room
pub const TYPE_JOIN_ROOM: i64 = 7;
/// Quick-join: let the hub pick a room
pub const TYPE_QUICK_JOIN: i64 = 9;
/// Rejection: caller cannot be placed in a room
pub const TYPE_UNAVAILABLE: i64 = 10;

/// The unit exchanged over the wire and between sessions and the hub.
///
/// `kind` alone decides which other fields are meaningful; unused fields are
/// carried along untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Integer discriminant (see the `TYPE_*` constants)
    #[serde(rename = "type", default)]
    pub kind: i64,
    /// Room identifier, empty for global scope
    #[serde(rename = "roomID", alias = "roomId", default)]
    pub room_id: String,
    /// Free-form text content
    #[serde(default)]
    pub message: String,
}

impl Envelope {
    /// Create an envelope from its parts
    pub fn new(kind: i64, room_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            room_id: room_id.into(),
            message: message.into(),
        }
    }

    /// Join acknowledgment echoing the room id
    pub fn joined(room_id: impl Into<String>) -> Self {
        Self::new(TYPE_JOINED, room_id, "joined room successfully")
    }

    /// Leave acknowledgment echoing the vacated room id
    pub fn left(room_id: impl Into<String>) -> Self {
        Self::new(TYPE_LEFT, room_id, "leave room successfully")
    }

    /// Message relayed to the members of a room
    pub fn room_message(room_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(TYPE_ROOM_MESSAGE, room_id, text)
    }

    /// Rejection for a quick-join the caller is not eligible for
    pub fn unavailable() -> Self {
        Self::new(TYPE_UNAVAILABLE, "", "you are not available for room")
    }

    /// Classify an inbound envelope
    pub fn intent(&self) -> Intent {
        match self.kind {
            TYPE_CREATE_ROOM => Intent::CreateRoom,
            TYPE_LEAVE_ROOM => Intent::LeaveRoom,
            TYPE_ROOM_SEND => Intent::RoomMessage,
            TYPE_JOIN_ROOM => Intent::JoinRoom,
            TYPE_QUICK_JOIN => Intent::QuickJoin,
            _ => Intent::Broadcast,
        }
    }
}

/// What an inbound envelope asks the relay to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Relay the envelope unchanged to every session
    Broadcast,
    /// Open a fresh room and join it
    CreateRoom,
    /// Join the room named by `room_id`
    JoinRoom,
    /// Leave the current room
    LeaveRoom,
    /// Send `message` to the current room
    RoomMessage,
    /// Join a room picked by the hub
    QuickJoin,
}

/// Frame codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Invalid envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame carries no envelope")]
    NotData,
}

/// Decode one envelope from a data frame.
///
/// Text and binary frames are both accepted. Control frames yield
/// [`CodecError::NotData`]; callers handle those before decoding.
pub fn decode(frame: &Message, max_size: usize) -> Result<Envelope, CodecError> {
    let bytes: &[u8] = match frame {
        Message::Text(text) => text.as_bytes(),
        Message::Binary(data) => data.as_slice(),
        _ => return Err(CodecError::NotData),
    };

    if bytes.len() > max_size {
        return Err(CodecError::TooLarge {
            size: bytes.len(),
            limit: max_size,
        });
    }

    Ok(serde_json::from_slice(bytes)?)
}

/// Encode one envelope into a text frame
pub fn encode(envelope: &Envelope) -> Result<Message, CodecError> {
    Ok(Message::Text(serde_json::to_string(envelope)?))
}
