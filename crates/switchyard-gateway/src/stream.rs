use crate::middleware::bearer_token;
use crate::server::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use switchyard_stream::{AttachError, HubFrame, StreamingHub, Subscription};
use tracing::info;

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
}

/// `GET <prefix>/{channel_id}`: attach to a job or workflow channel, then
/// upgrade. The attach happens before the upgrade so a rejected client gets
/// a plain HTTP error and no channel is created.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    Path(channel_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let token = bearer_token(&headers).or(query.token);
    let subscription = match state.hub.attach(&channel_id, token.as_deref()) {
        Ok(sub) => sub,
        Err(e) => {
            let (status, kind) = match e {
                AttachError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
                AttachError::ChannelFull { .. } => (StatusCode::TOO_MANY_REQUESTS, "channel_full"),
            };
            return (status, Json(json!({ "error": kind, "message": e.to_string() })))
                .into_response();
        }
    };

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| pump(socket, hub, subscription))
}

/// Forward hub frames to the socket and pong answers back to the hub until
/// either side goes away.
async fn pump(socket: WebSocket, hub: Arc<StreamingHub>, subscription: Subscription) {
    let Subscription {
        id,
        channel_id,
        mut frames,
    } = subscription;
    let (mut sender, mut receiver) = socket.split();
    info!(channel = %channel_id, subscriber = %id, "Stream connected");

    let welcome = json!({
        "type": "connected",
        "channelId": channel_id,
        "subscriberId": id,
    });
    if sender
        .send(Message::Text(welcome.to_string().into()))
        .await
        .is_err()
    {
        hub.detach(&channel_id, id);
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let msg = match frame {
                HubFrame::Event(event) => Message::Text(event.to_json().into()),
                HubFrame::Ping => Message::Ping(Vec::new().into()),
                HubFrame::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = {
        let hub = Arc::clone(&hub);
        let channel_id = channel_id.clone();
        tokio::spawn(async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Pong(_) => hub.acknowledge(&channel_id, id),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        })
    };

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.detach(&channel_id, id);
    info!(channel = %channel_id, subscriber = %id, "Stream disconnected");
}
