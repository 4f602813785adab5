use std::sync::Arc;

use socketioxide::extract::{AckSender, Data, SocketRef};

use crate::gateway::{Connection, ConnectionId};
use crate::protocol::{events, ErrorPayload, MessagePayload, SendAck, SendMessagePayload};
use crate::service::SendRequest;
use crate::AppState;

fn connection_id(socket: &SocketRef) -> Option<ConnectionId> {
    socket.extensions.get::<ConnectionId>()
}

fn emit_error(socket: &SocketRef, code: &str, message: impl Into<String>) {
    let _ = socket.emit(
        events::ERROR,
        &ErrorPayload {
            code: code.into(),
            message: message.into(),
        },
    );
}

pub async fn on_connect(socket: SocketRef, state: Arc<AppState>) {
    let Connection { id, events: mut relay } = match state.service.gateway().connect().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, sid = %socket.id, "gateway refused connection");
            emit_error(&socket, "TRANSPORT", "realtime gateway unavailable");
            socket.disconnect().ok();
            return;
        }
    };

    socket.extensions.insert(id);
    tracing::info!(conn = %id, sid = %socket.id, "chat socket connected");

    // Forward gateway events in the order the gateway produced them
    let forward = socket.clone();
    tokio::spawn(async move {
        while let Some(event) = relay.recv().await {
            if let Err(e) = forward.emit(event.name(), event.payload()) {
                tracing::debug!(error = %e, sid = %forward.id, "socket emit failed, stopping forwarder");
                break;
            }
        }
    });

    socket.on(events::JOIN_ROOM, {
        let state = state.clone();
        move |socket: SocketRef, Data::<String>(room_id)| {
            let state = state.clone();
            async move { on_join_room(socket, room_id, &state).await; }
        }
    });

    socket.on(events::LEAVE_ROOM, {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_leave_room(socket, &state).await; }
        }
    });

    socket.on(events::JOIN_ADMIN_ROOM, {
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move { on_join_admin(socket, &state).await; }
        }
    });

    socket.on(events::SEND_MESSAGE, {
        let state = state.clone();
        move |socket: SocketRef, Data::<SendMessagePayload>(payload), ack: AckSender| {
            let state = state.clone();
            async move { on_send_message(socket, payload, ack, &state).await; }
        }
    });

    socket.on_disconnect({
        let state = state.clone();
        move |socket: SocketRef| {
            let state = state.clone();
            async move {
                if let Some(id) = connection_id(&socket) {
                    state.service.gateway().disconnect(id);
                    tracing::info!(conn = %id, sid = %socket.id, "chat socket disconnected");
                }
            }
        }
    });
}

async fn on_join_room(socket: SocketRef, room_id: String, state: &Arc<AppState>) {
    let Some(id) = connection_id(&socket) else { return };

    let room_id = room_id.trim().to_string();
    if room_id.is_empty() {
        emit_error(&socket, "VALIDATION", "joinRoom needs a room id");
        return;
    }

    if let Err(e) = state.service.gateway().join(id, room_id.as_str()).await {
        tracing::warn!(conn = %id, room_id = %room_id, error = %e, "joinRoom failed");
        emit_error(&socket, "TRANSPORT", "could not join room");
    }
}

async fn on_leave_room(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = connection_id(&socket) else { return };
    if let Err(e) = state.service.gateway().leave(id).await {
        tracing::warn!(conn = %id, error = %e, "leaveRoom failed");
    }
}

async fn on_join_admin(socket: SocketRef, state: &Arc<AppState>) {
    let Some(id) = connection_id(&socket) else { return };
    if let Err(e) = state.service.gateway().subscribe_admin(id).await {
        tracing::warn!(conn = %id, error = %e, "joinAdminRoom failed");
        emit_error(&socket, "TRANSPORT", "could not subscribe to notifications");
    }
}

/// The sender receives its own message through the room relay, never from the ack alone.
async fn on_send_message(
    socket: SocketRef,
    payload: SendMessagePayload,
    ack: AckSender,
    state: &Arc<AppState>,
) {
    let request = SendRequest::from(payload);
    let context = request.context.clone();

    match state.service.send(request).await {
        Ok(message) => {
            let _ = ack.send(&SendAck::accepted(MessagePayload::new(&message, context.as_ref())));
        }
        Err(e) => {
            let reply = SendAck::rejected(&e);
            if let Some(err) = &reply.error {
                let _ = socket.emit(events::ERROR, err);
            }
            let _ = ack.send(&reply);
        }
    }
}
