use futures::Stream;
use serde::{Deserialize, Serialize};
use std::{fmt, future::Future, pin::Pin, str::FromStr};

use crate::{CompletionParams, ParamOverrides, RelayError};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::System,
            content: s.into(),
        }
    }
    pub fn user<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::User,
            content: s.into(),
        }
    }
    pub fn assistant<S: Into<String>>(s: S) -> Self {
        Self {
            role: Role::Assistant,
            content: s.into(),
        }
    }
}

/// The closed set of upstream providers the relay knows how to reach.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    DeepSeek,
    DeepInfra,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::DeepSeek, ProviderId::DeepInfra];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::DeepSeek => "deepseek",
            ProviderId::DeepInfra => "deepinfra",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(ProviderId::DeepSeek),
            "deepinfra" => Ok(ProviderId::DeepInfra),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// One client request for a streamed completion. Immutable once dispatched.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub provider: ProviderId,
    #[serde(alias = "systemPrompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub conversation: Vec<Message>,
    #[serde(default, alias = "params")]
    pub parameters: ParamOverrides,
    #[serde(default)]
    pub model: Option<String>,
}

/// A non-empty piece of generated text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Fragment(String);

impl Fragment {
    /// Returns `None` for the empty string.
    pub fn new<S: Into<String>>(s: S) -> Option<Self> {
        let s = s.into();
        if s.is_empty() {
            None
        } else {
            Some(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// One decoded upstream event payload, in the provider's own shape.
#[derive(Clone, Debug, PartialEq)]
pub struct RawChunk(pub serde_json::Value);

pub type RawStream = Pin<Box<dyn Stream<Item = Result<RawChunk, RelayError>> + Send + 'static>>;

/// Uniform contract of a provider client adapter. Implementations hold only
/// immutable configuration and may be shared across connections.
pub trait CompletionProvider: Send + Sync + 'static {
    fn id(&self) -> ProviderId;

    fn default_model(&self) -> &str;

    fn default_params(&self) -> &CompletionParams;

    /// Opens one streaming request. `system_prompt` is sent as the first
    /// message ahead of `conversation`. Fails with
    /// [`RelayError::ProviderUnavailable`] when the stream cannot be opened.
    fn start_stream(
        &self,
        system_prompt: &str,
        conversation: &[Message],
        params: &CompletionParams,
        model: Option<&str>,
    ) -> impl Future<Output = Result<RawStream, RelayError>> + Send;
}
