//! Raw HTTP/1.1 upstreams and relay wiring shared by the integration tests.
#![allow(dead_code)]

use providers::{OpenAiCompatClient, ProviderRegistry, RelayConfig};
use server::Relay;
use std::{sync::Arc, time::Duration};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

pub const HELLO_BODY: &str = concat!(
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
);

pub fn sse_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

/// Reads one request (head plus `content-length` body) and returns it raw.
async fn read_request(sock: &mut TcpStream) -> Vec<u8> {
    let mut req = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = sock.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        req.extend_from_slice(&tmp[..n]);
        let text = String::from_utf8_lossy(&req).to_string();
        if let Some(head_end) = text.find("\r\n\r\n") {
            let len = text[..head_end]
                .lines()
                .find_map(|l| {
                    l.to_ascii_lowercase()
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap())
                })
                .unwrap_or(0);
            if req.len() >= head_end + 4 + len {
                break;
            }
        }
    }
    req
}

/// Serves a single canned HTTP response to the first connection and returns
/// the request body it received.
pub async fn upstream(response: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let req = read_request(&mut sock).await;
        sock.write_all(response.as_bytes()).await.unwrap();
        sock.shutdown().await.ok();
        let text = String::from_utf8_lossy(&req).to_string();
        text.split_once("\r\n\r\n").map(|(_, b)| b.to_string()).unwrap_or_default()
    });
    (format!("http://{}", addr), handle)
}

/// Streams `tick` fragments until the relay hangs up. The handle finishes
/// once a write fails, i.e. once the upstream request was released.
pub async fn endless_upstream() -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        read_request(&mut sock).await;
        sock.write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        let event = b"data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"tick\"}}]}\n\n";
        while sock.write_all(event).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });
    (format!("http://{}", addr), handle)
}

/// A relay with only DeepSeek configured, pointed at `base_url`.
pub fn relay_for(base_url: &str) -> Relay<OpenAiCompatClient> {
    let base = base_url.to_string();
    let cfg = RelayConfig::from_sources(
        move |k| match k {
            "DEEPSEEK_API_KEY" => Some("sk-e2e".to_string()),
            "DEEPSEEK_BASE_URL" => Some(base.clone()),
            _ => None,
        },
        None,
    );
    Relay::new(Arc::new(ProviderRegistry::from_config(&cfg)))
}
