mod common;

use common::{relay_for, sse_response, upstream, HELLO_BODY};
use relay_core::{CompletionRequest, ErrorKind, Message, ParamOverrides, ProviderId};
use server::{Inbound, Outbound, Relay, SessionState};
use std::time::Duration;
use tokio::sync::mpsc;

fn hello_request(provider: ProviderId) -> CompletionRequest {
    CompletionRequest {
        provider,
        system_prompt: "You are helpful.".into(),
        conversation: vec![Message::user("Hi")],
        parameters: ParamOverrides::default(),
        model: None,
    }
}

async fn run(relay: Relay<providers::OpenAiCompatClient>, req: CompletionRequest) -> Vec<Outbound> {
    let (in_tx, in_rx) = mpsc::channel(4);
    let (out_tx, mut out_rx) = mpsc::channel(16);
    let session = tokio::spawn(async move { relay.run_session("e2e", in_rx, out_tx).await });
    in_tx.send(Inbound::Request(req)).await.unwrap();

    let mut seen = Vec::new();
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(5), out_rx.recv())
            .await
            .expect("relay went silent")
            .expect("session ended early");
        let terminal = ev.is_terminal();
        seen.push(ev);
        if terminal {
            break;
        }
    }
    in_tx.send(Inbound::Disconnect).await.unwrap();
    assert_eq!(session.await.unwrap(), SessionState::Closed);
    assert!(out_rx.recv().await.is_none());
    seen
}

#[tokio::test]
async fn hello_scenario_streams_two_fragments_then_ends() {
    let (base, upstream) = upstream(sse_response(HELLO_BODY)).await;

    let events = run(relay_for(&base), hello_request(ProviderId::DeepSeek)).await;
    assert_eq!(
        events,
        vec![
            Outbound::Fragment { text: "Hel".into() },
            Outbound::Fragment { text: "lo".into() },
            Outbound::CompletionEnd,
        ]
    );

    let sent: serde_json::Value = serde_json::from_str(&upstream.await.unwrap()).unwrap();
    assert_eq!(sent["model"], "deepseek-chat");
    assert_eq!(sent["stream"], true);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][0]["content"], "You are helpful.");
    assert_eq!(sent["messages"][1]["content"], "Hi");
    assert_eq!(sent["max_tokens"], 512);
    assert_eq!(sent["stop"], "\n");
}

#[tokio::test]
async fn rejected_upstream_yields_single_error_event() {
    let response =
        "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 4\r\nconnection: close\r\n\r\nbusy"
            .to_string();
    let (base, _upstream) = upstream(response).await;

    let events = run(relay_for(&base), hello_request(ProviderId::DeepSeek)).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        Outbound::CompletionError { error, message } => {
            assert_eq!(*error, ErrorKind::ProviderUnavailable);
            assert!(message.contains("503"), "{}", message);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn unconfigured_provider_is_reported_not_silent() {
    let (base, _upstream) = upstream(String::new()).await;
    let events = run(relay_for(&base), hello_request(ProviderId::DeepInfra)).await;
    match &events[..] {
        [Outbound::CompletionError { error, message }] => {
            assert_eq!(*error, ErrorKind::ProviderUnavailable);
            assert!(message.contains("deepinfra credential not configured"));
        }
        other => panic!("unexpected {:?}", other),
    }
}
