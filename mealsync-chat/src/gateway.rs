//! Realtime fan-out of persisted messages.
//!
//! One task owns every connection, room and admin-subscriber map; the rest
//! of the process talks to it through a [`GatewayHandle`]. State here is
//! ephemeral: a restart loses all joins and clients re-join and re-fetch
//! history from the store.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::protocol::{events, MessagePayload};

/// Identifies one live client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(pub Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Server -> client events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Delivered to connections joined to the message's room.
    ReceiveMessage(MessagePayload),
    /// Delivered to admin subscribers, whatever room they have open.
    NewMessageNotification(MessagePayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => events::RECEIVE_MESSAGE,
            ServerEvent::NewMessageNotification(_) => events::NEW_MESSAGE_NOTIFICATION,
        }
    }

    pub fn payload(&self) -> &MessagePayload {
        match self {
            ServerEvent::ReceiveMessage(p) | ServerEvent::NewMessageNotification(p) => p,
        }
    }
}

/// A registered connection and the stream of events addressed to it.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// How many connections a publish reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub room: usize,
    pub admin: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub rooms: usize,
    pub admins: usize,
}

enum Command {
    Connect {
        reply: oneshot::Sender<Connection>,
    },
    Disconnect(ConnectionId),
    Join {
        conn: ConnectionId,
        room_id: String,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Leave {
        conn: ConnectionId,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    SubscribeAdmin {
        conn: ConnectionId,
        reply: oneshot::Sender<ChatResult<()>>,
    },
    Publish {
        payload: MessagePayload,
        reply: oneshot::Sender<Delivery>,
    },
    Stats(oneshot::Sender<GatewayStats>),
    Shutdown,
}

struct Presence {
    tx: mpsc::UnboundedSender<ServerEvent>,
    room: Option<String>,
    admin: bool,
}

/// Gateway state. Only ever touched from the actor task.
#[derive(Default)]
struct Gateway {
    connections: HashMap<ConnectionId, Presence>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
    admins: HashSet<ConnectionId>,
}

impl Gateway {
    fn connect(&mut self) -> Connection {
        let (tx, events) = mpsc::unbounded_channel();
        let id = ConnectionId(Uuid::new_v4());
        self.connections.insert(id, Presence { tx, room: None, admin: false });
        tracing::debug!(conn = %id, "gateway connection registered");
        Connection { id, events }
    }

    fn disconnect(&mut self, id: ConnectionId) {
        self.leave_room(id);
        self.admins.remove(&id);
        if self.connections.remove(&id).is_some() {
            tracing::debug!(conn = %id, "gateway connection dropped");
        }
    }

    fn presence(&mut self, id: ConnectionId) -> ChatResult<&mut Presence> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| ChatError::Transport(format!("connection {id} is not registered")))
    }

    fn leave_room(&mut self, id: ConnectionId) {
        let Some(previous) = self.connections.get_mut(&id).and_then(|p| p.room.take()) else {
            return;
        };
        if let Some(members) = self.rooms.get_mut(&previous) {
            members.remove(&id);
            if members.is_empty() {
                self.rooms.remove(&previous);
            }
        }
    }

    fn join(&mut self, id: ConnectionId, room_id: String) -> ChatResult<()> {
        if self.presence(id)?.room.as_deref() == Some(room_id.as_str()) {
            return Ok(());
        }
        self.leave_room(id);
        self.presence(id)?.room = Some(room_id.clone());
        tracing::debug!(conn = %id, room_id = %room_id, "joined room");
        self.rooms.entry(room_id).or_default().insert(id);
        Ok(())
    }

    fn subscribe_admin(&mut self, id: ConnectionId) -> ChatResult<()> {
        self.presence(id)?.admin = true;
        self.admins.insert(id);
        tracing::debug!(conn = %id, "subscribed to admin broadcast");
        Ok(())
    }

    fn publish(&mut self, payload: MessagePayload) -> Delivery {
        let mut delivery = Delivery::default();
        let mut dead = Vec::new();

        let members = self.rooms.get(&payload.room_id).into_iter().flatten();
        for id in members {
            match self.connections.get(id) {
                Some(p) if p.tx.send(ServerEvent::ReceiveMessage(payload.clone())).is_ok() => {
                    delivery.room += 1;
                }
                _ => dead.push(*id),
            }
        }

        for id in &self.admins {
            match self.connections.get(id) {
                Some(p) if p.tx.send(ServerEvent::NewMessageNotification(payload.clone())).is_ok() => {
                    delivery.admin += 1;
                }
                _ => dead.push(*id),
            }
        }

        for id in dead {
            self.disconnect(id);
        }

        tracing::debug!(
            room_id = %payload.room_id,
            message_id = %payload.message_id,
            room = delivery.room,
            admin = delivery.admin,
            "message relayed"
        );
        delivery
    }

    fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
            admins: self.admins.len(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!("realtime gateway started");
        while let Some(command) = commands.recv().await {
            match command {
                Command::Connect { reply } => {
                    let _ = reply.send(self.connect());
                }
                Command::Disconnect(id) => self.disconnect(id),
                Command::Join { conn, room_id, reply } => {
                    let _ = reply.send(self.join(conn, room_id));
                }
                Command::Leave { conn, reply } => {
                    let result = self.presence(conn).map(|_| ());
                    self.leave_room(conn);
                    let _ = reply.send(result);
                }
                Command::SubscribeAdmin { conn, reply } => {
                    let _ = reply.send(self.subscribe_admin(conn));
                }
                Command::Publish { payload, reply } => {
                    let _ = reply.send(self.publish(payload));
                }
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown => break,
            }
        }
        tracing::info!(connections = self.connections.len(), "realtime gateway stopped");
    }
}

/// Cheap-to-clone handle to the gateway task.
#[derive(Clone)]
pub struct GatewayHandle {
    commands: mpsc::UnboundedSender<Command>,
}

fn gateway_gone() -> ChatError {
    ChatError::Transport("realtime gateway is not running".into())
}

impl GatewayHandle {
    /// Start the gateway task on the current runtime.
    pub fn spawn() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(Gateway::default().run(rx));
        Self { commands }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> ChatResult<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).map_err(|_| gateway_gone())?;
        rx.await.map_err(|_| gateway_gone())
    }

    pub async fn connect(&self) -> ChatResult<Connection> {
        self.request(|reply| Command::Connect { reply }).await
    }

    /// Forget a connection. Its event stream ends once queued events are drained.
    pub fn disconnect(&self, conn: ConnectionId) {
        let _ = self.commands.send(Command::Disconnect(conn));
    }

    /// Join `room_id`, leaving whatever room the connection was in.
    pub async fn join(&self, conn: ConnectionId, room_id: impl Into<String>) -> ChatResult<()> {
        let room_id = room_id.into();
        self.request(|reply| Command::Join { conn, room_id, reply }).await?
    }

    pub async fn leave(&self, conn: ConnectionId) -> ChatResult<()> {
        self.request(|reply| Command::Leave { conn, reply }).await?
    }

    pub async fn subscribe_admin(&self, conn: ConnectionId) -> ChatResult<()> {
        self.request(|reply| Command::SubscribeAdmin { conn, reply }).await?
    }

    /// Relay a persisted message to its room and to admin subscribers.
    pub async fn publish(&self, payload: MessagePayload) -> ChatResult<Delivery> {
        self.request(|reply| Command::Publish { payload, reply }).await
    }

    pub async fn stats(&self) -> ChatResult<GatewayStats> {
        self.request(Command::Stats).await
    }

    /// Stop the task. Every connection's event stream ends.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageKind, Sender};
    use chrono::Utc;
    use std::time::Duration;

    fn payload(room_id: &str, content: &str) -> MessagePayload {
        MessagePayload {
            message_id: Uuid::now_v7(),
            room_id: room_id.into(),
            sender: Sender::Customer,
            content: Some(content.into()),
            attachment: None,
            kind: MessageKind::Text,
            time: Utc::now(),
            product_id: None,
            product_name: None,
            user_name: None,
            email: None,
            nonce: None,
        }
    }

    async fn nothing_pending(conn: &mut Connection) -> bool {
        tokio::time::timeout(Duration::from_millis(50), conn.events.recv())
            .await
            .is_err()
    }

    #[tokio::test]
    async fn fan_out_reaches_room_and_admins() {
        let gw = GatewayHandle::spawn();
        let mut members = Vec::new();
        for _ in 0..3 {
            let c = gw.connect().await.unwrap();
            gw.join(c.id, "R").await.unwrap();
            members.push(c);
        }
        let mut admin = gw.connect().await.unwrap();
        gw.subscribe_admin(admin.id).await.unwrap();
        let mut outsider = gw.connect().await.unwrap();
        gw.join(outsider.id, "other").await.unwrap();

        let delivery = gw.publish(payload("R", "hello")).await.unwrap();
        assert_eq!(delivery, Delivery { room: 3, admin: 1 });

        for c in &mut members {
            let evt = c.events.recv().await.unwrap();
            assert_eq!(evt.name(), "receiveMessage");
            assert_eq!(evt.payload().content.as_deref(), Some("hello"));
        }
        let evt = admin.events.recv().await.unwrap();
        assert!(matches!(evt, ServerEvent::NewMessageNotification(_)));
        assert!(nothing_pending(&mut admin).await);
        assert!(nothing_pending(&mut outsider).await);
    }

    #[tokio::test]
    async fn admin_in_room_gets_both_events() {
        let gw = GatewayHandle::spawn();
        let mut owner = gw.connect().await.unwrap();
        gw.subscribe_admin(owner.id).await.unwrap();
        gw.join(owner.id, "R").await.unwrap();

        gw.publish(payload("R", "hi")).await.unwrap();
        let names: Vec<_> = vec![
            owner.events.recv().await.unwrap().name(),
            owner.events.recv().await.unwrap().name(),
        ];
        assert_eq!(names, ["receiveMessage", "newMessageNotification"]);
    }

    #[tokio::test]
    async fn joining_a_room_leaves_the_previous_one() {
        let gw = GatewayHandle::spawn();
        let mut c = gw.connect().await.unwrap();
        gw.join(c.id, "A").await.unwrap();
        gw.join(c.id, "B").await.unwrap();

        assert_eq!(gw.publish(payload("A", "x")).await.unwrap().room, 0);
        assert_eq!(gw.publish(payload("B", "y")).await.unwrap().room, 1);
        assert_eq!(c.events.recv().await.unwrap().payload().content.as_deref(), Some("y"));

        let stats = gw.stats().await.unwrap();
        assert_eq!(stats.rooms, 1);
    }

    #[tokio::test]
    async fn relay_preserves_publish_order() {
        let gw = GatewayHandle::spawn();
        let mut c = gw.connect().await.unwrap();
        gw.join(c.id, "R").await.unwrap();
        for i in 0..20 {
            gw.publish(payload("R", &format!("m{i}"))).await.unwrap();
        }
        for i in 0..20 {
            let evt = c.events.recv().await.unwrap();
            assert_eq!(evt.payload().content.as_deref(), Some(format!("m{i}").as_str()));
        }
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let gw = GatewayHandle::spawn();
        let c = gw.connect().await.unwrap();
        gw.join(c.id, "R").await.unwrap();
        gw.subscribe_admin(c.id).await.unwrap();
        drop(c.events);

        assert_eq!(gw.publish(payload("R", "x")).await.unwrap(), Delivery::default());
        assert_eq!(gw.stats().await.unwrap(), GatewayStats::default());
    }

    #[tokio::test]
    async fn disconnect_ends_event_stream() {
        let gw = GatewayHandle::spawn();
        let mut c = gw.connect().await.unwrap();
        gw.join(c.id, "R").await.unwrap();
        gw.disconnect(c.id);
        assert!(c.events.recv().await.is_none());
        assert!(matches!(gw.join(c.id, "R").await, Err(ChatError::Transport(_))));
    }

    #[tokio::test]
    async fn calls_fail_after_shutdown() {
        let gw = GatewayHandle::spawn();
        let mut c = gw.connect().await.unwrap();
        gw.shutdown();
        assert!(c.events.recv().await.is_none());
        assert!(matches!(gw.connect().await, Err(ChatError::Transport(_))));
    }
}
