use crate::config::ProviderConfig;
use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use relay_core::{
    CompletionParams, CompletionProvider, Message, ProviderId, RawChunk, RawStream, RelayError,
};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Adapter for one OpenAI-compatible chat-completions provider.
#[derive(Clone, Debug)]
pub struct OpenAiCompatClient {
    http: Client,
    cfg: ProviderConfig,
}

impl OpenAiCompatClient {
    pub fn new(cfg: ProviderConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("{} credential not configured", cfg.id))?;
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", api_key))?,
        );
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(8)
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.cfg
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.cfg.base_url.trim_end_matches('/'))
    }

    fn request_body(
        system_prompt: &str,
        conversation: &[Message],
        params: &CompletionParams,
        model: &str,
    ) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = std::iter::once(Message::system(system_prompt))
            .chain(conversation.iter().cloned())
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "top_p": params.top_p,
            "max_tokens": params.max_tokens,
            "stop": params.stop,
            "temperature": params.temperature,
        })
    }
}

impl CompletionProvider for OpenAiCompatClient {
    fn id(&self) -> ProviderId {
        self.cfg.id
    }

    fn default_model(&self) -> &str {
        &self.cfg.model
    }

    fn default_params(&self) -> &CompletionParams {
        &self.cfg.defaults
    }

    async fn start_stream(
        &self,
        system_prompt: &str,
        conversation: &[Message],
        params: &CompletionParams,
        model: Option<&str>,
    ) -> Result<RawStream, RelayError> {
        let url = self.endpoint();
        let model = model.unwrap_or(&self.cfg.model);
        info!(target: "providers::openai", "start chat stream provider={} model={} url={}", self.cfg.id, model, url);
        let body = Self::request_body(system_prompt, conversation, params, model);
        let resp = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target: "providers::openai", "chat stream non-200 provider={} status={} body={:?}", self.cfg.id, status, body);
            return Err(map_status_err(status, body));
        }
        Ok(Box::pin(sse_chunks(
            resp.bytes_stream(),
            self.cfg.stream_idle_timeout,
        )))
    }
}

/// Decodes an SSE byte stream into raw chunks. Ends on `[DONE]`, on EOF, or
/// after the first fatal error.
pub(crate) fn sse_chunks<B>(
    body: B,
    idle: Option<Duration>,
) -> impl Stream<Item = Result<RawChunk, RelayError>> + Send + 'static
where
    B: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buf = BytesMut::new();
        'outer: loop {
            let next = match idle {
                Some(d) => match tokio::time::timeout(d, body.next()).await {
                    Ok(n) => n,
                    Err(_) => {
                        warn!(target: "providers::openai", "stream idle for {:?}", d);
                        yield Err(RelayError::StreamInterrupted("idle timeout".into()));
                        break 'outer;
                    }
                },
                None => body.next().await,
            };
            match next {
                Some(Ok(b)) => {
                    buf.extend_from_slice(&b);
                    while let Some((pos, sep)) = find_event_boundary(&buf) {
                        let ev = buf.split_to(pos).freeze();
                        buf.advance(sep);
                        match parse_sse_event(&ev) {
                            Ok(Some(SseEvent::Chunk(c))) => yield Ok(c),
                            Ok(Some(SseEvent::Done)) => break 'outer,
                            Ok(None) => {}
                            Err(e @ RelayError::MalformedChunk(_)) => yield Err(e),
                            Err(e) => { yield Err(e); break 'outer; }
                        }
                    }
                }
                Some(Err(e)) => {
                    yield Err(map_body_err(e));
                    break 'outer;
                }
                None => {
                    // Some servers close without a trailing blank line. A
                    // leftover that does not parse is a cut-off event.
                    if !buf.is_empty() {
                        match parse_sse_event(&buf) {
                            Ok(Some(SseEvent::Chunk(c))) => yield Ok(c),
                            Ok(_) => {}
                            Err(e) => yield Err(e.into_interrupted()),
                        }
                    }
                    break 'outer;
                }
            }
        }
        debug!(target: "providers::openai", "chat stream closed");
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Chunk(RawChunk),
    Done,
}

fn map_reqwest_err(e: reqwest::Error) -> RelayError {
    if e.is_timeout() {
        RelayError::ProviderUnavailable(format!("timeout: {}", e))
    } else if e.is_request() || e.is_connect() {
        RelayError::ProviderUnavailable(format!("network: {}", e))
    } else {
        RelayError::ProviderUnavailable(e.to_string())
    }
}

fn map_body_err(e: reqwest::Error) -> RelayError {
    RelayError::StreamInterrupted(e.to_string())
}

fn map_status_err(status: StatusCode, body: Option<String>) -> RelayError {
    let s = format!("{} {}", status.as_u16(), body.unwrap_or_default());
    let prefix = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => "auth",
        StatusCode::TOO_MANY_REQUESTS => "rate limit",
        _ => "upstream",
    };
    RelayError::ProviderUnavailable(format!("{}: {}", prefix, s.trim_end()))
}

/// Returns the earliest blank-line boundary and the separator length.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n").map(|p| (p, 4));
    let lf = twoway::find_bytes(buf, b"\n\n").map(|p| (p, 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_sse_event(ev: &[u8]) -> Result<Option<SseEvent>, RelayError> {
    let s = std::str::from_utf8(ev).map_err(|e| RelayError::MalformedChunk(e.to_string()))?;
    let mut data_lines = Vec::new();
    for line in s.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return Ok(None);
    }
    if data_lines.len() == 1 && data_lines[0].trim() == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }
    let json_text = data_lines.join("\n");
    let v: serde_json::Value =
        serde_json::from_str(&json_text).map_err(|e| RelayError::MalformedChunk(e.to_string()))?;
    if let Some(err) = v.get("error").filter(|e| e.is_object()) {
        let msg = err["message"].as_str().unwrap_or("provider error").to_string();
        return Err(RelayError::StreamInterrupted(msg));
    }
    Ok(Some(SseEvent::Chunk(RawChunk(v))))
}
