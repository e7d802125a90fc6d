//! Per-connection relay: binds one client connection to at most one
//! in-flight completion stream and forwards its fragments in order.
//!
//! A session runs as a single task that waits on two things only: the next
//! inbound client event and the next fragment of the active stream. Inbound
//! events are still read while an outbound send waits for queue space.
//! Dropping the active stream drops the upstream response, which aborts the
//! request.

use futures::{Stream, StreamExt};
use providers::ProviderRegistry;
use relay_core::{
    normalize, CompletionParams, CompletionProvider, CompletionRequest, ErrorKind, Fragment,
    ProviderId, RelayError,
};
use serde::Serialize;
use std::{pin::Pin, sync::Arc, time::Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Streaming,
    /// The last stream ended, or the connection is gone.
    Closed,
}

#[derive(Debug)]
pub enum Inbound {
    Request(CompletionRequest),
    Disconnect,
    TransportError(String),
}

/// Events sent back to the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Outbound {
    Fragment { text: String },
    CompletionEnd,
    CompletionError { error: ErrorKind, message: String },
    /// A request refused without touching the stream in flight.
    CompletionRejected { error: ErrorKind, message: String },
}

impl Outbound {
    pub fn error(e: &RelayError) -> Self {
        Outbound::CompletionError {
            error: e.kind(),
            message: e.to_string(),
        }
    }

    pub fn rejected(e: &RelayError) -> Self {
        Outbound::CompletionRejected {
            error: e.kind(),
            message: e.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outbound::CompletionEnd | Outbound::CompletionError { .. }
        )
    }
}

type FragmentFeed = Pin<Box<dyn Stream<Item = Result<Fragment, RelayError>> + Send>>;

struct ActiveStream {
    feed: FragmentFeed,
    provider: ProviderId,
    forwarded: usize,
    started: Instant,
}

pub struct Relay<P> {
    providers: Arc<ProviderRegistry<P>>,
}

impl<P> Clone for Relay<P> {
    fn clone(&self) -> Self {
        Self {
            providers: Arc::clone(&self.providers),
        }
    }
}

impl<P: CompletionProvider> Relay<P> {
    pub fn new(providers: Arc<ProviderRegistry<P>>) -> Self {
        Self { providers }
    }

    /// Opening the upstream request is the first step of the returned
    /// stream, so the session keeps servicing inbound events while it waits
    /// for the provider to answer.
    fn open(&self, req: CompletionRequest) -> FragmentFeed {
        let lookup = self.providers.get(req.provider);
        Box::pin(async_stream::stream! {
            let provider = match lookup {
                Ok(p) => p,
                Err(e) => { yield Err(e); return; }
            };
            let params = CompletionParams::resolve(&req.parameters, provider.default_params());
            let raw = provider
                .start_stream(&req.system_prompt, &req.conversation, &params, req.model.as_deref())
                .await;
            let raw = match raw {
                Ok(r) => r,
                Err(e) => { yield Err(e); return; }
            };
            let mut fragments = normalize(raw);
            while let Some(item) = fragments.next().await {
                yield item;
            }
        })
    }

    pub async fn run_session(
        &self,
        conn_id: &str,
        inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<Outbound>,
    ) -> SessionState {
        let (state, _) = watch::channel(SessionState::Idle);
        self.run_session_with_state(conn_id, inbound, outbound, state)
            .await
    }

    /// Drives one connection until the client goes away. Every accepted
    /// request gets zero or more `Fragment` events and exactly one terminal
    /// event, unless the client disconnects first.
    pub async fn run_session_with_state(
        &self,
        conn_id: &str,
        inbound: mpsc::Receiver<Inbound>,
        outbound: mpsc::Sender<Outbound>,
        state: watch::Sender<SessionState>,
    ) -> SessionState {
        state.send_replace(SessionState::Idle);
        debug!(target: "server::session", "session open conn={}", conn_id);
        let mut session = Session {
            relay: self,
            conn_id,
            inbound,
            outbound,
            state,
            active: None,
            rejections: 0,
        };
        session.run().await;

        // Dropping the feed releases the upstream request.
        drop(session.active.take());
        session.state.send_replace(SessionState::Closed);
        debug!(target: "server::session", "session closed conn={}", conn_id);
        SessionState::Closed
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Session<'a, P> {
    relay: &'a Relay<P>,
    conn_id: &'a str,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
    state: watch::Sender<SessionState>,
    active: Option<ActiveStream>,
    /// Busy rejections owed to the client, sent once the outbound queue has
    /// room.
    rejections: usize,
}

impl<P: CompletionProvider> Session<'_, P> {
    async fn run(&mut self) {
        loop {
            if self.rejections > 0 {
                self.rejections -= 1;
                match self.deliver(Outbound::rejected(&RelayError::SessionBusy)).await {
                    Flow::Continue => continue,
                    Flow::Stop => return,
                }
            }
            let flow = tokio::select! {
                biased;
                ev = self.inbound.recv() => self.on_inbound(ev),
                item = next_fragment(&mut self.active), if self.active.is_some() => {
                    self.on_item(item).await
                }
            };
            if let Flow::Stop = flow {
                return;
            }
        }
    }

    fn on_inbound(&mut self, ev: Option<Inbound>) -> Flow {
        match ev {
            Some(Inbound::Request(req)) => {
                self.on_request(req);
                Flow::Continue
            }
            Some(Inbound::TransportError(e)) => {
                warn!(target: "server::session", "transport error conn={}: {}", self.conn_id, e);
                Flow::Stop
            }
            Some(Inbound::Disconnect) | None => {
                info!(target: "server::session", "client disconnected conn={} streaming={}", self.conn_id, self.active.is_some());
                Flow::Stop
            }
        }
    }

    fn on_request(&mut self, req: CompletionRequest) {
        if let Some(current) = self.active.as_ref().map(|a| a.provider) {
            warn!(target: "server::session", "busy conn={} provider={} rejected={}", self.conn_id, current, req.provider);
            self.rejections += 1;
            return;
        }
        info!(
            target: "server::session",
            "stream start conn={} provider={} model={} turns={}",
            self.conn_id,
            req.provider,
            req.model.as_deref().unwrap_or("<default>"),
            req.conversation.len()
        );
        let provider = req.provider;
        self.active = Some(ActiveStream {
            feed: self.relay.open(req),
            provider,
            forwarded: 0,
            started: Instant::now(),
        });
        self.state.send_replace(SessionState::Streaming);
    }

    async fn on_item(&mut self, item: Option<Result<Fragment, RelayError>>) -> Flow {
        let terminal = match item {
            Some(Ok(fragment)) => {
                trace!(target: "server::session", "fragment conn={} text={:?}", self.conn_id, fragment.as_str());
                if let Some(a) = self.active.as_mut() {
                    a.forwarded += 1;
                }
                return self
                    .deliver(Outbound::Fragment {
                        text: fragment.into_string(),
                    })
                    .await;
            }
            Some(Err(e)) => Outbound::error(&e),
            None => Outbound::CompletionEnd,
        };
        if let Some(a) = self.active.take() {
            match &terminal {
                Outbound::CompletionError { error, message } => warn!(
                    target: "server::session",
                    "stream error conn={} provider={} kind={:?} forwarded={}: {}",
                    self.conn_id, a.provider, error, a.forwarded, message
                ),
                _ => info!(
                    target: "server::session",
                    "stream end conn={} provider={} forwarded={} elapsed_ms={}",
                    self.conn_id, a.provider, a.forwarded, a.started.elapsed().as_millis()
                ),
            }
        }
        self.state.send_replace(SessionState::Closed);
        self.deliver(terminal).await
    }

    /// Queues one event for the client. While the outbound queue is full the
    /// session keeps reading inbound events, so a disconnect still ends it.
    async fn deliver(&mut self, ev: Outbound) -> Flow {
        loop {
            let msg = tokio::select! {
                biased;
                msg = self.inbound.recv() => msg,
                permit = self.outbound.reserve() => {
                    return match permit {
                        Ok(permit) => {
                            permit.send(ev);
                            Flow::Continue
                        }
                        Err(_) => Flow::Stop,
                    };
                }
            };
            if let Flow::Stop = self.on_inbound(msg) {
                return Flow::Stop;
            }
        }
    }
}

async fn next_fragment(active: &mut Option<ActiveStream>) -> Option<Result<Fragment, RelayError>> {
    match active {
        Some(a) => a.feed.next().await,
        None => std::future::pending().await,
    }
}
