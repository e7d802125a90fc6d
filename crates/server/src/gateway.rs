//! Minimal WebSocket host for the relay: one session task per connection,
//! JSON text frames in both directions.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use relay_core::{CompletionProvider, CompletionRequest, RelayError};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::{Inbound, Outbound, Relay};

const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Events a client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(alias = "request-completion")]
    RequestCompletion(CompletionRequest),
}

pub fn decode_client_event(text: &str) -> Result<Inbound, RelayError> {
    if text.len() > MAX_FRAME_BYTES {
        return Err(RelayError::MalformedChunk(format!(
            "frame too large: {} bytes (max {})",
            text.len(),
            MAX_FRAME_BYTES
        )));
    }
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::RequestCompletion(req)) => Ok(Inbound::Request(req)),
        Err(e) => Err(RelayError::MalformedChunk(e.to_string())),
    }
}

pub fn router<P: CompletionProvider>(relay: Relay<P>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade::<P>))
        .route("/health", get(|| async { "ok" }))
        .with_state(relay)
}

async fn ws_upgrade<P: CompletionProvider>(
    ws: WebSocketUpgrade,
    State(relay): State<Relay<P>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, relay))
}

async fn handle_socket<P: CompletionProvider>(socket: WebSocket, relay: Relay<P>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(target: "server::gateway", "connection open conn={}", conn_id);

    let (mut sink, mut source) = socket.split();
    let (in_tx, in_rx) = mpsc::channel::<Inbound>(16);
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(64);

    let session = {
        let conn_id = conn_id.clone();
        tokio::spawn(async move { relay.run_session(&conn_id, in_rx, out_tx).await })
    };

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => match decode_client_event(&text) {
                    Ok(ev) => {
                        if in_tx.send(ev).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(target: "server::gateway", "undecodable frame conn={}: {}", conn_id, e);
                        if send_event(&mut sink, &Outbound::rejected(&e)).await.is_err() {
                            let _ = in_tx.send(Inbound::Disconnect).await;
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    let _ = in_tx.send(Inbound::Disconnect).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = in_tx.send(Inbound::TransportError(e.to_string())).await;
                    break;
                }
            },
            ev = out_rx.recv() => match ev {
                Some(ev) => {
                    if send_event(&mut sink, &ev).await.is_err() {
                        let _ = in_tx.send(Inbound::Disconnect).await;
                        break;
                    }
                }
                None => break,
            },
        }
    }

    // Closing both channels ends the session even if it is waiting for
    // outbound room.
    drop(in_tx);
    drop(out_rx);
    if let Err(e) = session.await {
        warn!(target: "server::gateway", "session task failed conn={}: {}", conn_id, e);
    }
    info!(target: "server::gateway", "connection closed conn={}", conn_id);
}

async fn send_event<S>(sink: &mut S, ev: &Outbound) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let text = serde_json::to_string(ev).map_err(|_| ())?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
