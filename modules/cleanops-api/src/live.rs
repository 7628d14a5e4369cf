//! WebSocket transport for dashboard subscriptions.
//!
//! Each connection owns one hub subscription. Outbound frames are the JSON
//! encoding of [`LiveMessage`](cleanops_live::LiveMessage); inbound text
//! frames of the form `{"ack": <version>}` acknowledge what the client has
//! applied. Eviction closes the socket with a policy-violation frame.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use cleanops_live::{LiveError, LiveMessage, Subscription};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::AppState;

#[derive(Deserialize)]
pub struct LiveQuery {
    from_version: Option<u64>,
}

#[derive(Deserialize)]
struct ClientAck {
    ack: u64,
}

/// The acknowledged version in a client text frame, if it is an ack.
fn parse_ack(text: &str) -> Option<u64> {
    serde_json::from_str::<ClientAck>(text).ok().map(|frame| frame.ack)
}

fn encode(message: &LiveMessage) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(message)?.into()))
}

fn eviction_frame(err: &LiveError) -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::POLICY,
        reason: err.to_string().into(),
    }))
}

pub async fn dashboard_live(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<LiveQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_subscriber(socket, state, params.from_version))
}

async fn serve_subscriber(socket: WebSocket, state: Arc<AppState>, from_version: Option<u64>) {
    let subscription = state.hub.subscribe(from_version);
    info!(subscriber = subscription.id(), ?from_version, "Live subscriber connected");

    let (sink, incoming) = socket.split();
    pump(state, subscription, sink, incoming).await;
}

/// Moves hub messages out to `sink` and client acks in from `incoming` until
/// either side ends or the subscriber is evicted.
async fn pump<S, R, E>(state: Arc<AppState>, subscription: Subscription, mut sink: S, mut incoming: R)
where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let subscriber_id = subscription.id().to_string();
    let mut outgoing = Box::pin(subscription.into_stream());

    loop {
        tokio::select! {
            next = outgoing.next() => match next {
                Some(Ok(message)) => {
                    let frame = match encode(&message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Failed to encode live message");
                            break;
                        }
                    };
                    if sink.send(frame).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    info!(subscriber = subscriber_id.as_str(), error = %e, "Closing evicted subscriber");
                    let _ = sink.send(eviction_frame(&e)).await;
                    break;
                }
                None => break,
            },
            frame = incoming.next() => match frame {
                Some(Ok(Message::Text(text))) => match parse_ack(text.as_str()) {
                    Some(version) => state.hub.ack(&subscriber_id, version),
                    None => debug!(subscriber = subscriber_id.as_str(), "Ignoring unrecognised client frame"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(subscriber = subscriber_id.as_str(), "Live subscriber disconnected");
}
