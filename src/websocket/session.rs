//! WebSocket Connection Session
//!
//! One session per client. The connection is split into two tasks:
//!
//! - the **read pump** decodes envelopes and forwards intents to the hub,
//!   enforcing the idle deadline (reset on every pong);
//! - the **write pump** drains the outbound queue, writes join/leave
//!   acknowledgments and sends periodic pings.
//!
//! Each pump owns its half of the stream exclusively. The write pump publishes
//! the current room through a `watch` channel; the read pump only looks.

use axum::extract::ws::{close_code, CloseFrame, Message};
use futures_util::{pin_mut, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};

use super::hub::{HubError, HubHandle, RoomId, SessionHandle, SessionId};
use super::messages::{self, CodecError, Envelope, Intent};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Join and leave acknowledgments are rare; a tiny buffer is enough.
const ACK_BUFFER: usize = 8;

/// Per-connection timing and sizing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed to write a frame to the peer
    pub write_wait: Duration,
    /// Time allowed between pongs before the peer is presumed dead
    pub pong_wait: Duration,
    /// Ping period, must be shorter than `pong_wait`
    pub ping_period: Duration,
    /// Largest accepted inbound message in bytes
    pub max_message_size: usize,
    /// Capacity of the outbound queue
    pub send_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
            send_buffer: 1024,
        }
    }
}

/// Reasons a pump stops
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("No pong within {0:?}")]
    IdleTimeout(Duration),

    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("Hub unavailable: {0}")]
    HubUnavailable(#[from] HubError),
}

/// Register a new session with the hub and start both pumps.
///
/// `sink` and `stream` are the two halves of one connection. Returns once the
/// session is registered; the pumps keep running in the background until one
/// side fails or the hub closes the outbound queue.
pub async fn open<S, R, E>(
    hub: &HubHandle,
    config: &SessionConfig,
    sink: S,
    stream: R,
) -> Result<SessionId, HubError>
where
    S: Sink<Message> + Send + 'static,
    S::Error: Into<BoxError> + Send,
    R: Stream<Item = Result<Message, E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let id = SessionId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.send_buffer.max(1));
    let (join_tx, join_rx) = mpsc::channel(ACK_BUFFER);
    let (leave_tx, leave_rx) = mpsc::channel(ACK_BUFFER);
    let (room_tx, room_rx) = watch::channel(None);
    let (closed_tx, closed_rx) = oneshot::channel();

    let reader = ReadPump {
        id,
        hub: hub.clone(),
        config: config.clone(),
        outbound: outbound_tx.downgrade(),
        room: room_rx,
        closed: closed_rx,
    };
    let writer = WritePump {
        id,
        config: config.clone(),
        outbound: outbound_rx,
        join_ack: join_rx,
        leave_ack: leave_rx,
        room: room_tx,
        _closed: closed_tx,
    };

    hub.register(SessionHandle {
        id,
        outbound: outbound_tx,
        join_ack: join_tx,
        leave_ack: leave_tx,
    })
    .await?;

    tokio::spawn(async move {
        if let Err(e) = writer.run(sink).await {
            tracing::debug!(session_id = %id, error = %e, "Write pump stopped");
        }
    });
    tokio::spawn(reader.run(stream));

    Ok(id)
}

struct ReadPump {
    id: SessionId,
    hub: HubHandle,
    config: SessionConfig,
    /// Weak so that the hub dropping its sender is what closes the queue
    outbound: mpsc::WeakSender<Envelope>,
    room: watch::Receiver<Option<RoomId>>,
    /// Resolves when the write pump has gone away
    closed: oneshot::Receiver<()>,
}

impl ReadPump {
    async fn run<R, E>(mut self, stream: R)
    where
        R: Stream<Item = Result<Message, E>>,
        E: Into<BoxError>,
    {
        match self.pump(stream).await {
            Ok(()) => tracing::debug!(session_id = %self.id, "Client disconnected"),
            Err(e @ SessionError::HubUnavailable(_)) => {
                tracing::warn!(session_id = %self.id, error = %e, "Read pump stopped")
            }
            // Timeouts, resets and bad frames are ordinary disconnects.
            Err(e) => tracing::debug!(session_id = %self.id, error = %e, "Read pump stopped"),
        }

        if self.hub.unregister(self.id).await.is_err() {
            tracing::debug!(session_id = %self.id, "Hub gone before unregister");
        }
    }

    async fn pump<R, E>(&mut self, stream: R) -> Result<(), SessionError>
    where
        R: Stream<Item = Result<Message, E>>,
        E: Into<BoxError>,
    {
        pin_mut!(stream);
        let mut deadline = Instant::now() + self.config.pong_wait;

        loop {
            let frame = tokio::select! {
                _ = &mut self.closed => return Ok(()),
                next = time::timeout_at(deadline, stream.next()) => match next {
                    Err(_) => return Err(SessionError::IdleTimeout(self.config.pong_wait)),
                    Ok(None) => return Ok(()),
                    Ok(Some(Err(e))) => return Err(SessionError::Transport(e.into())),
                    Ok(Some(Ok(frame))) => frame,
                },
            };

            match frame {
                Message::Pong(_) => deadline = Instant::now() + self.config.pong_wait,
                // Pings are answered by the transport
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    if let Some(CloseFrame { code, reason }) = &frame {
                        if !is_expected_close(*code) {
                            tracing::warn!(
                                session_id = %self.id,
                                code = *code,
                                reason = %reason,
                                "Unexpected close"
                            );
                        }
                    }
                    return Ok(());
                }
                data => {
                    let envelope = messages::decode(&data, self.config.max_message_size)?;
                    self.dispatch(envelope).await?;
                }
            }
        }
    }

    async fn dispatch(&self, envelope: Envelope) -> Result<(), SessionError> {
        match envelope.intent() {
            Intent::Broadcast => self.hub.broadcast(envelope).await?,
            Intent::CreateRoom => self.hub.create_room(self.id).await?,
            Intent::LeaveRoom => self.hub.leave_room(self.id).await?,
            Intent::JoinRoom => self.hub.join_room(self.id, envelope.room_id).await?,
            Intent::RoomMessage => {
                let room = self.room.borrow().clone().unwrap_or_default();
                let relayed = Envelope::room_message(room, envelope.message);
                self.hub.room_broadcast(self.id, relayed).await?;
            }
            Intent::QuickJoin => {
                let in_room = self.room.borrow().is_some();
                if in_room {
                    self.enqueue(Envelope::unavailable());
                } else {
                    self.hub.quick_join(self.id).await?;
                }
            }
        }
        Ok(())
    }

    /// Put an envelope on this session's own outbound queue without waiting.
    ///
    /// The reader never blocks on its own queue: a full queue means the writer
    /// is already behind, and the reply is dropped.
    fn enqueue(&self, envelope: Envelope) {
        let Some(outbound) = self.outbound.upgrade() else {
            return;
        };
        match outbound.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(envelope)) => tracing::warn!(
                session_id = %self.id,
                kind = envelope.kind,
                "Outbound queue full, reply dropped"
            ),
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Close codes sent by clients that went away normally
fn is_expected_close(code: u16) -> bool {
    matches!(
        code,
        close_code::NORMAL | close_code::AWAY | close_code::ABNORMAL
    )
}

struct WritePump {
    id: SessionId,
    config: SessionConfig,
    outbound: mpsc::Receiver<Envelope>,
    join_ack: mpsc::Receiver<RoomId>,
    leave_ack: mpsc::Receiver<RoomId>,
    room: watch::Sender<Option<RoomId>>,
    /// Dropped when the pump exits, which stops the read pump
    _closed: oneshot::Sender<()>,
}

impl WritePump {
    async fn run<S>(mut self, sink: S) -> Result<(), SessionError>
    where
        S: Sink<Message>,
        S::Error: Into<BoxError>,
    {
        pin_mut!(sink);
        let period = self.config.ping_period;
        let mut ping = time::interval_at(Instant::now() + period, period);
        let mut join_open = true;
        let mut leave_open = true;

        loop {
            tokio::select! {
                biased;

                room = self.join_ack.recv(), if join_open => match room {
                    Some(room) if !room.is_empty() => {
                        self.room.send_replace(Some(room.clone()));
                        self.write_envelope(&mut sink, &Envelope::joined(room)).await?;
                    }
                    Some(_) => {}
                    None => join_open = false,
                },
                room = self.leave_ack.recv(), if leave_open => match room {
                    Some(room) if !room.is_empty() => {
                        self.room.send_replace(None);
                        self.write_envelope(&mut sink, &Envelope::left(room)).await?;
                    }
                    Some(_) => {}
                    None => leave_open = false,
                },
                envelope = self.outbound.recv() => match envelope {
                    Some(envelope) => {
                        self.write_envelope(&mut sink, &envelope).await?;

                        // Flush whatever queued up behind it, each once and in order.
                        for _ in 0..self.outbound.len() {
                            match self.outbound.try_recv() {
                                Ok(next) => self.write_envelope(&mut sink, &next).await?,
                                Err(_) => break,
                            }
                        }
                    }
                    None => {
                        // The hub closed the queue.
                        let _ = self.write(&mut sink, Message::Close(None)).await;
                        tracing::debug!(session_id = %self.id, "Outbound queue closed");
                        return Ok(());
                    }
                },
                _ = ping.tick() => {
                    self.write(&mut sink, Message::Ping(Vec::new())).await?;
                }
            }
        }
    }

    async fn write_envelope<S>(
        &self,
        sink: &mut Pin<&mut S>,
        envelope: &Envelope,
    ) -> Result<(), SessionError>
    where
        S: Sink<Message>,
        S::Error: Into<BoxError>,
    {
        let frame = messages::encode(envelope)?;
        self.write(sink, frame).await
    }

    async fn write<S>(&self, sink: &mut Pin<&mut S>, frame: Message) -> Result<(), SessionError>
    where
        S: Sink<Message>,
        S::Error: Into<BoxError>,
    {
        match time::timeout(self.config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SessionError::Transport(e.into())),
            Err(_) => Err(SessionError::WriteTimeout(self.config.write_wait)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::hub::{Hub, HubConfig};
    use crate::websocket::messages::{
        TYPE_JOINED, TYPE_LEFT, TYPE_ROOM_MESSAGE, TYPE_UNAVAILABLE,
    };
    use futures_util::{sink, stream};
    use std::io;

    type Inbound = Result<Message, io::Error>;

    /// The client's end of an in-memory connection
    struct Peer {
        to_server: mpsc::UnboundedSender<Inbound>,
        from_server: mpsc::UnboundedReceiver<Message>,
    }

    impl Peer {
        fn send(&self, envelope: Envelope) {
            let text = serde_json::to_string(&envelope).unwrap();
            self.to_server.send(Ok(Message::Text(text))).unwrap();
        }

        fn send_frame(&self, frame: Message) {
            self.to_server.send(Ok(frame)).unwrap();
        }

        /// Next frame of any kind
        async fn frame(&mut self) -> Option<Message> {
            time::timeout(Duration::from_secs(120), self.from_server.recv())
                .await
                .expect("timed out waiting for frame")
        }

        /// Next envelope, skipping pings
        async fn envelope(&mut self) -> Envelope {
            loop {
                match self.frame().await {
                    Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                    Some(Message::Ping(_)) => continue,
                    other => panic!("Expected envelope, got {:?}", other),
                }
            }
        }

        async fn assert_silent(&mut self) {
            let next = time::timeout(Duration::from_millis(100), self.from_server.recv()).await;
            assert!(next.is_err(), "unexpected frame: {:?}", next);
        }
    }

    fn transport() -> (
        impl Sink<Message, Error = io::Error> + Send + 'static,
        impl Stream<Item = Inbound> + Send + 'static,
        Peer,
    ) {
        let (to_server, mut inbound) = mpsc::unbounded_channel::<Inbound>();
        let (outbound, from_server) = mpsc::unbounded_channel::<Message>();

        let stream = stream::poll_fn(move |cx| inbound.poll_recv(cx));
        let sink = sink::unfold(outbound, |tx, frame: Message| async move {
            tx.send(frame)
                .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
            Ok::<_, io::Error>(tx)
        });

        (
            sink,
            stream,
            Peer {
                to_server,
                from_server,
            },
        )
    }

    async fn connect(hub: &HubHandle, config: &SessionConfig) -> (SessionId, Peer) {
        let (sink, stream, peer) = transport();
        let id = open(hub, config, sink, stream).await.unwrap();
        (id, peer)
    }

    async fn wait_for_sessions(hub: &HubHandle, count: usize) {
        for _ in 0..200 {
            if hub.stats().await.unwrap().session_count() == count {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never reached {}", count);
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.ping_period, Duration::from_secs(54));
        assert!(config.ping_period < config.pong_wait);
        assert_eq!(config.max_message_size, 512);
        assert_eq!(config.send_buffer, 1024);
    }

    #[tokio::test]
    async fn test_quick_join_then_rejection() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (id, mut peer) = connect(&hub, &config).await;

        peer.send(Envelope::new(9, "", ""));
        let joined = peer.envelope().await;
        assert_eq!(joined.kind, TYPE_JOINED);
        assert!(!joined.room_id.is_empty());
        assert_eq!(
            hub.stats().await.unwrap().room_of(id),
            Some(joined.room_id.as_str())
        );

        peer.send(Envelope::new(9, "", ""));
        let rejected = peer.envelope().await;
        assert_eq!(rejected.kind, TYPE_UNAVAILABLE);
        assert_eq!(rejected.message, "you are not available for room");
        assert_eq!(
            hub.stats().await.unwrap().room_of(id),
            Some(joined.room_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_join_leave_round_trip() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (id, mut peer) = connect(&hub, &config).await;

        peer.send(Envelope::new(7, "X", ""));
        let joined = peer.envelope().await;
        assert_eq!((joined.kind, joined.room_id.as_str()), (TYPE_JOINED, "X"));
        assert_eq!(hub.stats().await.unwrap().room_of(id), Some("X"));

        peer.send(Envelope::new(3, "", ""));
        let left = peer.envelope().await;
        assert_eq!((left.kind, left.room_id.as_str()), (TYPE_LEFT, "X"));
        assert_eq!(left.message, "leave room successfully");
        assert!(hub.stats().await.unwrap().room_of(id).is_none());
    }

    #[tokio::test]
    async fn test_create_room_assigns_id() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (id, mut peer) = connect(&hub, &config).await;

        peer.send(Envelope::new(1, "", ""));
        let joined = peer.envelope().await;
        assert_eq!(joined.kind, TYPE_JOINED);
        assert!(!joined.room_id.is_empty());
        assert_eq!(
            hub.stats().await.unwrap().room_of(id),
            Some(joined.room_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_room_messages_stay_in_room() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (_, mut alice) = connect(&hub, &config).await;
        let (_, mut bob) = connect(&hub, &config).await;
        let (_, mut carol) = connect(&hub, &config).await;

        for peer in [&mut alice, &mut bob] {
            peer.send(Envelope::new(7, "X", ""));
            assert_eq!(peer.envelope().await.kind, TYPE_JOINED);
        }

        alice.send(Envelope::new(5, "", "psst"));
        for peer in [&mut alice, &mut bob] {
            let relayed = peer.envelope().await;
            assert_eq!(relayed, Envelope::new(TYPE_ROOM_MESSAGE, "X", "psst"));
        }
        carol.assert_silent().await;
    }

    #[tokio::test]
    async fn test_global_broadcast_reaches_everyone() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (_, mut alice) = connect(&hub, &config).await;
        let (_, mut bob) = connect(&hub, &config).await;

        let shout = Envelope::new(0, "", "hello all");
        bob.send(shout.clone());

        assert_eq!(alice.envelope().await, shout);
        assert_eq!(bob.envelope().await, shout);
    }

    #[tokio::test]
    async fn test_client_close_unregisters() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (id, mut peer) = connect(&hub, &config).await;
        peer.send(Envelope::new(7, "X", ""));
        assert_eq!(peer.envelope().await.kind, TYPE_JOINED);

        peer.send_frame(Message::Close(None));

        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
        wait_for_sessions(&hub, 0).await;
        let stats = hub.stats().await.unwrap();
        assert!(stats.room_of(id).is_none());
        assert_eq!(stats.room_count(), 0);
    }

    #[test]
    fn test_expected_close_codes() {
        for code in [close_code::NORMAL, close_code::AWAY, close_code::ABNORMAL] {
            assert!(is_expected_close(code));
        }
        for code in [close_code::PROTOCOL, close_code::POLICY, close_code::ERROR, 4000] {
            assert!(!is_expected_close(code));
        }
    }

    #[tokio::test]
    async fn test_close_with_error_code_unregisters() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (_, mut peer) = connect(&hub, &config).await;
        wait_for_sessions(&hub, 1).await;

        peer.send_frame(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "bye".into(),
        })));

        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_local_rejection_dropped_when_queue_full() {
        let hub = Hub::spawn(HubConfig::default());
        let (outbound_tx, mut outbound_rx) = mpsc::channel(1);
        let (_room_tx, room_rx) = watch::channel(Some("X".to_string()));
        let (_closed_tx, closed_rx) = oneshot::channel();
        let reader = ReadPump {
            id: SessionId::new(),
            hub,
            config: SessionConfig::default(),
            outbound: outbound_tx.downgrade(),
            room: room_rx,
            closed: closed_rx,
        };

        outbound_tx
            .try_send(Envelope::new(0, "", "backlog"))
            .unwrap();
        reader.dispatch(Envelope::new(9, "", "")).await.unwrap();

        assert_eq!(outbound_rx.try_recv().unwrap().message, "backlog");
        assert!(outbound_rx.try_recv().is_err());

        // Once the queue has room the rejection goes through.
        reader.dispatch(Envelope::new(9, "", "")).await.unwrap();
        assert_eq!(outbound_rx.try_recv().unwrap().kind, TYPE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_malformed_frame_terminates_session() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (_, mut peer) = connect(&hub, &config).await;

        peer.send_frame(Message::Text("{not json".into()));

        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_oversized_frame_terminates_session() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig {
            max_message_size: 32,
            ..SessionConfig::default()
        };
        let (_, mut peer) = connect(&hub, &config).await;

        peer.send(Envelope::new(0, "", "x".repeat(64)));

        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_write_failure_tears_session_down() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (_, peer) = connect(&hub, &config).await;
        let Peer {
            to_server,
            from_server,
        } = peer;
        drop(from_server);

        let text = serde_json::to_string(&Envelope::new(9, "", "")).unwrap();
        to_server.send(Ok(Message::Text(text))).unwrap();

        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_times_out() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let started = Instant::now();
        let (_, mut peer) = connect(&hub, &config).await;

        assert!(matches!(peer.frame().await, Some(Message::Ping(_))));
        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
        assert!(started.elapsed() >= config.pong_wait);
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_extends_deadline() {
        let hub = Hub::spawn(HubConfig::default());
        let config = SessionConfig::default();
        let (_, mut peer) = connect(&hub, &config).await;

        assert!(matches!(peer.frame().await, Some(Message::Ping(_))));
        peer.send_frame(Message::Pong(Vec::new()));

        // Past the first deadline, still registered.
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hub.stats().await.unwrap().session_count(), 1);

        // No pong for the next ping: the session is dropped.
        assert!(matches!(peer.frame().await, Some(Message::Ping(_))));
        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
        wait_for_sessions(&hub, 0).await;
    }

    #[tokio::test]
    async fn test_write_pump_flushes_each_queued_envelope_once() {
        let (outbound_tx, outbound_rx) = mpsc::channel(8);
        let (_join_tx, join_rx) = mpsc::channel(ACK_BUFFER);
        let (_leave_tx, leave_rx) = mpsc::channel(ACK_BUFFER);
        let (room_tx, _room_rx) = watch::channel(None);
        let (closed_tx, _closed_rx) = oneshot::channel();
        let writer = WritePump {
            id: SessionId::new(),
            config: SessionConfig::default(),
            outbound: outbound_rx,
            join_ack: join_rx,
            leave_ack: leave_rx,
            room: room_tx,
            _closed: closed_tx,
        };

        for text in ["one", "two", "three"] {
            outbound_tx.try_send(Envelope::new(0, "", text)).unwrap();
        }
        drop(outbound_tx);

        let (sink, _stream, mut peer) = transport();
        writer.run(sink).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(peer.envelope().await.message);
        }
        assert_eq!(received, ["one", "two", "three"]);
        assert!(matches!(peer.frame().await, Some(Message::Close(None))));
    }
}
