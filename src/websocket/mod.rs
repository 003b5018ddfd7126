//! WebSocket Relay Core
//!
//! Relays envelopes between connected clients, globally or inside rooms.
//!
//! ## Architecture
//!
//! - **Hub**: Single command loop owning the session registry and room memberships
//! - **Session**: Per-connection read and write pumps
//! - **Handler**: Handles the WebSocket upgrade and opens a session
//! - **Messages**: Defines the wire envelope and its codec
//!
//! ## Protocol
//!
//! Clients connect to `/ws` and exchange `{type, roomID, message}` envelopes:
//! - `1` create a room and join it, answered by `2` (joined)
//! - `7` join the room named by `roomID`, answered by `2`
//! - `9` quick-join a room picked by the server, answered by `2` or `10`
//! - `3` leave the current room, answered by `4` (left)
//! - `5` send `message` to the current room, relayed to members as `6`
//! - anything else is relayed unchanged to every connected client
//!
//! ## Example
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8080/ws');
//!
//! ws.onopen = () => {
//!   ws.send(JSON.stringify({type: 9}));
//! };
//!
//! ws.onmessage = (event) => {
//!   const msg = JSON.parse(event.data);
//!   if (msg.type === 2) {
//!     ws.send(JSON.stringify({type: 5, message: 'hello room'}));
//!   }
//! };
//! ```

mod handler;
mod hub;
mod messages;
mod session;

pub use handler::websocket_handler;
pub use hub::{Hub, HubConfig, HubError, HubHandle, HubStats, RoomId, SessionHandle, SessionId};
pub use messages::{decode, encode, CodecError, Envelope, Intent};
pub use session::{open, SessionConfig, SessionError};
