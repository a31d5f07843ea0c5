//! Live tail of an item over websocket
//!
//! Each line is sent as a JSON text frame `{number, value}`. The socket is
//! closed when the client leaves, when the subscriber falls too far behind,
//! or on server shutdown.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use logcdn_core::models::ItemId;
use logcdn_core::service::LineSubscription;

use super::{item::resolve_item, AppError, AppResult, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub offset: i64,
}

pub async fn stream_handler(
    State(state): State<AppState>,
    Path((item_type, api_ref_hash)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    if query.offset < 0 {
        return Err(AppError::bad_request("offset must not be negative"));
    }
    let item = resolve_item(&state, &item_type, &api_ref_hash).await?;

    // Registered before the upgrade completes so no line is missed
    let subscription = state
        .hub
        .subscribe(item.id.clone(), query.offset, Some(state.shutdown.child_token()));

    Ok(ws.on_upgrade(move |socket| serve_subscription(socket, item.id, subscription)))
}

async fn serve_subscription(socket: WebSocket, item_id: ItemId, mut subscription: LineSubscription) {
    info!(item_id = %item_id, "Live stream opened");
    let (mut sender, mut receiver) = socket.split();

    let close = loop {
        tokio::select! {
            next = subscription.next() => match next {
                Some(Ok(line)) => {
                    let payload = match serde_json::to_string(&line) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(item_id = %item_id, error = %e, "Failed to encode line");
                            break Some((close_code::ERROR, "encoding failure"));
                        }
                    };
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break None;
                    }
                }
                Some(Err(e)) => {
                    warn!(item_id = %item_id, error = %e, "Closing lagging live stream");
                    break Some((close_code::AGAIN, "subscriber too slow"));
                }
                // Server shutdown
                None => break Some((close_code::AWAY, "server shutting down")),
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break None,
                Some(Ok(_)) => {}
            },
        }
    };

    if let Some((code, reason)) = close {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        if let Err(e) = sender.send(Message::Close(Some(frame))).await {
            debug!(item_id = %item_id, error = %e, "Failed to send close frame");
        }
    }

    info!(item_id = %item_id, "Live stream closed");
}
