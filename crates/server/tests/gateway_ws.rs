mod common;

use common::{endless_upstream, relay_for, sse_response, upstream, HELLO_BODY};
use futures::{SinkExt, StreamExt};
use providers::OpenAiCompatClient;
use serde_json::{json, Value};
use server::{gateway, Relay};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const HELLO_FRAME: &str = r#"{"event":"request_completion","provider":"deepseek",
    "systemPrompt":"You are helpful.","conversation":[{"role":"user","content":"Hi"}]}"#;

async fn serve(relay: Relay<OpenAiCompatClient>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, gateway::router(relay)).await });
    format!("ws://{}/ws", addr)
}

async fn connect(url: &str) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

async fn next_event(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("gateway went silent")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn hello_scenario_over_websocket() {
    let (base, upstream) = upstream(sse_response(HELLO_BODY)).await;
    let mut ws = connect(&serve(relay_for(&base)).await).await;

    send_text(&mut ws, HELLO_FRAME).await;
    assert_eq!(next_event(&mut ws).await, json!({"event": "fragment", "text": "Hel"}));
    assert_eq!(next_event(&mut ws).await, json!({"event": "fragment", "text": "lo"}));
    assert_eq!(next_event(&mut ws).await, json!({"event": "completion_end"}));

    let sent: Value = serde_json::from_str(&upstream.await.unwrap()).unwrap();
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["content"], "Hi");
    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn bad_frame_is_rejected_and_connection_stays_usable() {
    let mut ws = connect(&serve(relay_for("http://127.0.0.1:9")).await).await;

    send_text(&mut ws, "not json").await;
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["event"], "completion_rejected");
    assert_eq!(ev["error"], "malformed_chunk");

    send_text(
        &mut ws,
        r#"{"event":"request_completion","provider":"deepinfra","systemPrompt":"s"}"#,
    )
    .await;
    let ev = next_event(&mut ws).await;
    assert_eq!(ev["event"], "completion_error");
    assert_eq!(ev["error"], "provider_unavailable");
}

#[tokio::test]
async fn stalled_client_dropping_socket_releases_upstream() {
    let (base, upstream) = endless_upstream().await;
    let mut ws = connect(&serve(relay_for(&base)).await).await;

    send_text(&mut ws, HELLO_FRAME).await;
    assert_eq!(next_event(&mut ws).await, json!({"event": "fragment", "text": "tick"}));
    // Stop reading so fragments pile up on the server side, then go away.
    tokio::time::sleep(Duration::from_millis(500)).await;
    drop(ws);

    tokio::time::timeout(Duration::from_secs(5), upstream)
        .await
        .expect("upstream still streaming after the client left")
        .unwrap();
}

#[tokio::test]
async fn close_frame_mid_stream_releases_upstream() {
    let (base, upstream) = endless_upstream().await;
    let mut ws = connect(&serve(relay_for(&base)).await).await;

    send_text(&mut ws, HELLO_FRAME).await;
    assert_eq!(next_event(&mut ws).await["event"], "fragment");
    ws.close(None).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), upstream)
        .await
        .expect("upstream still streaming after close")
        .unwrap();
}
