//! WebSocket Connection Hub
//!
//! Owns the registry of live sessions and room memberships. All mutations run
//! inside a single command loop ([`Hub::run`]); sessions talk to it through a
//! cloneable [`HubHandle`] and never touch the registry directly.

use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use super::messages::Envelope;

/// Identifier of a room
pub type RoomId = String;

/// Opaque identity of a session, unique for the lifetime of its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Allocate a fresh session id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Configuration for the hub
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the command channel feeding the loop
    pub command_buffer: usize,
    /// Quick-join pairs sessions into rooms of at most this many members
    pub quick_join_room_size: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_buffer: 256,
            quick_join_room_size: 2,
        }
    }
}

/// The hub's non-owning view of a session: the senders it delivers through.
///
/// Dropping the handle closes the session's outbound queue.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    /// Outbound envelope queue, drained by the session's writer
    pub outbound: mpsc::Sender<Envelope>,
    /// Join acknowledgments carrying the assigned room id
    pub join_ack: mpsc::Sender<RoomId>,
    /// Leave acknowledgments carrying the vacated room id
    pub leave_ack: mpsc::Sender<RoomId>,
}

/// Snapshot of the registry
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// All registered sessions
    pub sessions: HashSet<SessionId>,
    /// Room id → members
    pub rooms: HashMap<RoomId, HashSet<SessionId>>,
}

impl HubStats {
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room the session currently belongs to, if any
    pub fn room_of(&self, id: SessionId) -> Option<&str> {
        self.rooms
            .iter()
            .find(|(_, members)| members.contains(&id))
            .map(|(room, _)| room.as_str())
    }
}

/// Errors that can occur talking to the hub
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Hub is not running")]
    Closed,
}

/// Commands processed by the hub loop, one at a time
#[derive(Debug)]
enum Command {
    Register(SessionHandle),
    Unregister(SessionId),
    Broadcast(Envelope),
    CreateRoom(SessionId),
    JoinRoom { session: SessionId, room: RoomId },
    QuickJoin(SessionId),
    LeaveRoom(SessionId),
    RoomBroadcast { session: SessionId, envelope: Envelope },
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable sender side of the hub
#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
}

impl HubHandle {
    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Add a session to the registry
    pub async fn register(&self, handle: SessionHandle) -> Result<(), HubError> {
        self.send(Command::Register(handle)).await
    }

    /// Remove a session and close its outbound queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: SessionId) -> Result<(), HubError> {
        self.send(Command::Unregister(id)).await
    }

    /// Deliver an envelope to every registered session
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(Command::Broadcast(envelope)).await
    }

    /// Open a fresh room and move the session into it
    pub async fn create_room(&self, id: SessionId) -> Result<(), HubError> {
        self.send(Command::CreateRoom(id)).await
    }

    /// Move the session into the named room
    pub async fn join_room(&self, id: SessionId, room: RoomId) -> Result<(), HubError> {
        self.send(Command::JoinRoom { session: id, room }).await
    }

    /// Place a room-less session into a room picked by the hub
    pub async fn quick_join(&self, id: SessionId) -> Result<(), HubError> {
        self.send(Command::QuickJoin(id)).await
    }

    /// Take the session out of its current room
    pub async fn leave_room(&self, id: SessionId) -> Result<(), HubError> {
        self.send(Command::LeaveRoom(id)).await
    }

    /// Deliver an envelope to every member of the session's room
    pub async fn room_broadcast(&self, id: SessionId, envelope: Envelope) -> Result<(), HubError> {
        self.send(Command::RoomBroadcast {
            session: id,
            envelope,
        })
        .await
    }

    /// Snapshot the registry
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

/// The single-owner command loop
pub struct Hub {
    commands: mpsc::Receiver<Command>,
    registry: Registry,
}

impl Hub {
    /// Create a hub and the handle used to reach it
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let hub = Self {
            commands: rx,
            registry: Registry::new(config.quick_join_room_size),
        };
        (hub, HubHandle { commands: tx })
    }

    /// Create a hub and run it on the current runtime
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (hub, handle) = Self::new(config);
        tokio::spawn(hub.run());
        handle
    }

    /// Process commands until every handle has been dropped
    pub async fn run(mut self) {
        tracing::info!("Hub started");
        while let Some(command) = self.commands.recv().await {
            self.registry.apply(command);
        }
        tracing::info!(
            sessions = self.registry.sessions.len(),
            "Hub stopped"
        );
    }
}

struct Member {
    handle: SessionHandle,
    room: Option<RoomId>,
}

struct Room {
    members: HashSet<SessionId>,
    /// Creation order, used to pair quick-joins into the oldest open room
    opened: u64,
    /// Opened by quick-join; only these rooms take quick-join strangers
    pairing: bool,
}

/// Sessions and rooms. Only ever mutated from the hub loop.
struct Registry {
    sessions: HashMap<SessionId, Member>,
    rooms: HashMap<RoomId, Room>,
    next_room_seq: u64,
    quick_join_room_size: usize,
}

impl Registry {
    fn new(quick_join_room_size: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            next_room_seq: 0,
            quick_join_room_size: quick_join_room_size.max(1),
        }
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Register(handle) => self.register(handle),
            Command::Unregister(id) => self.unregister(id),
            Command::Broadcast(envelope) => {
                let recipients: Vec<SessionId> = self.sessions.keys().copied().collect();
                self.deliver(recipients, &envelope);
            }
            Command::CreateRoom(id) => {
                let room = Uuid::new_v4().to_string();
                self.join(id, room, false);
            }
            Command::JoinRoom { session, room } => {
                if room.is_empty() {
                    tracing::debug!(session_id = %session, "Join without room id ignored");
                    return;
                }
                self.join(session, room, false);
            }
            Command::QuickJoin(id) => self.quick_join(id),
            Command::LeaveRoom(id) => self.leave(id),
            Command::RoomBroadcast { session, envelope } => self.room_broadcast(session, envelope),
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn register(&mut self, handle: SessionHandle) {
        let id = handle.id;
        self.sessions.insert(id, Member { handle, room: None });
        tracing::info!(
            session_id = %id,
            sessions = self.sessions.len(),
            "Session registered"
        );
    }

    fn unregister(&mut self, id: SessionId) {
        let Some(member) = self.sessions.remove(&id) else {
            return;
        };
        if let Some(room) = member.room {
            self.remove_from_room(id, &room);
        }
        // Dropping `member.handle` here closes the outbound queue.
        tracing::info!(
            session_id = %id,
            sessions = self.sessions.len(),
            "Session unregistered"
        );
    }

    /// Move the session into `room`, opening it if needed. `pairing` marks a
    /// room opened here as available to later quick-joins.
    fn join(&mut self, id: SessionId, room: RoomId, pairing: bool) {
        let Some(member) = self.sessions.get_mut(&id) else {
            return;
        };
        if let Some(previous) = member.room.replace(room.clone()) {
            if previous != room {
                self.remove_from_room(id, &previous);
            }
        }

        let next_seq = &mut self.next_room_seq;
        self.rooms
            .entry(room.clone())
            .or_insert_with(|| {
                let opened = *next_seq;
                *next_seq += 1;
                Room {
                    members: HashSet::new(),
                    opened,
                    pairing,
                }
            })
            .members
            .insert(id);

        tracing::debug!(session_id = %id, room_id = %room, "Joined room");

        let acked = self
            .sessions
            .get(&id)
            .is_some_and(|member| member.handle.join_ack.try_send(room).is_ok());
        if !acked {
            self.evict(id);
        }
    }

    fn quick_join(&mut self, id: SessionId) {
        let Some(member) = self.sessions.get(&id) else {
            return;
        };
        if member.room.is_some() {
            // The session's view was stale; answer like the local check would.
            if member.handle.outbound.try_send(Envelope::unavailable()).is_err() {
                self.evict(id);
            }
            return;
        }

        let room = self
            .rooms
            .iter()
            .filter(|(_, room)| room.pairing && room.members.len() < self.quick_join_room_size)
            .min_by_key(|(_, room)| room.opened)
            .map(|(room_id, _)| room_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.join(id, room, true);
    }

    fn leave(&mut self, id: SessionId) {
        let Some(member) = self.sessions.get_mut(&id) else {
            return;
        };
        let Some(room) = member.room.take() else {
            tracing::debug!(session_id = %id, "Leave without a room ignored");
            return;
        };
        let acked = member.handle.leave_ack.try_send(room.clone()).is_ok();
        self.remove_from_room(id, &room);

        tracing::debug!(session_id = %id, room_id = %room, "Left room");

        if !acked {
            self.evict(id);
        }
    }

    fn room_broadcast(&mut self, id: SessionId, mut envelope: Envelope) {
        let Some(room) = self.sessions.get(&id).and_then(|m| m.room.clone()) else {
            tracing::debug!(session_id = %id, "Room message without a room ignored");
            return;
        };
        let recipients: Vec<SessionId> = self
            .rooms
            .get(&room)
            .map(|r| r.members.iter().copied().collect())
            .unwrap_or_default();
        envelope.room_id = room;
        self.deliver(recipients, &envelope);
    }

    /// Enqueue without waiting; recipients whose queue is full or closed are evicted.
    fn deliver(&mut self, recipients: Vec<SessionId>, envelope: &Envelope) {
        let mut stalled = Vec::new();
        for id in recipients {
            if let Some(member) = self.sessions.get(&id) {
                if member.handle.outbound.try_send(envelope.clone()).is_err() {
                    stalled.push(id);
                }
            }
        }
        for id in stalled {
            self.evict(id);
        }
    }

    fn evict(&mut self, id: SessionId) {
        tracing::warn!(session_id = %id, "Evicting stalled session");
        self.unregister(id);
    }

    fn remove_from_room(&mut self, id: SessionId, room: &str) {
        if let Some(entry) = self.rooms.get_mut(room) {
            entry.members.remove(&id);
            if entry.members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            sessions: self.sessions.keys().copied().collect(),
            rooms: self
                .rooms
                .iter()
                .map(|(id, room)| (id.clone(), room.members.clone()))
                .collect(),
        }
    }
}
