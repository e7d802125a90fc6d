use relay_core::{CompletionProvider, ProviderId, RelayError};
use std::{collections::HashMap, sync::Arc};
use tracing::{info, warn};

use crate::{OpenAiCompatClient, RelayConfig};

enum Slot<P> {
    Ready(Arc<P>),
    Unavailable(String),
}

/// Process-wide set of provider adapters, built once at startup and shared
/// read-only between connections.
pub struct ProviderRegistry<P> {
    slots: HashMap<ProviderId, Slot<P>>,
}

impl<P> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }
}

impl<P: CompletionProvider> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider: P) {
        self.slots
            .insert(provider.id(), Slot::Ready(Arc::new(provider)));
    }

    /// Registers `id` as known but unusable. Requests to it fail with
    /// [`RelayError::ProviderUnavailable`] carrying `reason`.
    pub fn mark_unavailable(&mut self, id: ProviderId, reason: impl Into<String>) {
        self.slots.insert(id, Slot::Unavailable(reason.into()));
    }

    pub fn get(&self, id: ProviderId) -> Result<Arc<P>, RelayError> {
        match self.slots.get(&id) {
            Some(Slot::Ready(p)) => Ok(Arc::clone(p)),
            Some(Slot::Unavailable(reason)) => Err(RelayError::ProviderUnavailable(reason.clone())),
            None => Err(RelayError::ProviderUnavailable(format!(
                "{} is not registered",
                id
            ))),
        }
    }

    pub fn ready(&self) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = self
            .slots
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Ready(_)))
            .map(|(id, _)| *id)
            .collect();
        ids.sort_by_key(|id| id.as_str());
        ids
    }
}

impl ProviderRegistry<OpenAiCompatClient> {
    /// One adapter per provider with a credential and a valid base URL. The
    /// rest are kept as unavailable so clients get a diagnostic instead of
    /// silence.
    pub fn from_config(cfg: &RelayConfig) -> Self {
        let mut reg = Self::new();
        for p in &cfg.providers {
            if p.api_key.is_none() {
                warn!(target: "providers::registry", "{} credential not configured; requests to it will fail", p.id);
                reg.mark_unavailable(p.id, format!("{} credential not configured", p.id));
                continue;
            }
            if let Err(e) = url::Url::parse(&p.base_url) {
                warn!(target: "providers::registry", "{} base_url {:?} is invalid: {}", p.id, p.base_url, e);
                reg.mark_unavailable(p.id, format!("{} base_url is invalid: {}", p.id, e));
                continue;
            }
            match OpenAiCompatClient::new(p.clone()) {
                Ok(client) => {
                    info!(target: "providers::registry", "provider ready id={} model={} base_url={}", p.id, p.model, p.base_url);
                    reg.insert(client);
                }
                Err(e) => {
                    warn!(target: "providers::registry", "{} client build failed: {:#}", p.id, e);
                    reg.mark_unavailable(p.id, format!("{} client build failed: {}", p.id, e));
                }
            }
        }
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |k| pairs.iter().find(|(n, _)| *n == k).map(|(_, v)| v.to_string())
    }

    #[test]
    fn missing_credential_is_unavailable_not_absent() {
        let cfg = RelayConfig::from_sources(env_of(&[("DEEPSEEK_API_KEY", "sk-1")]), None);
        let reg = ProviderRegistry::from_config(&cfg);
        assert_eq!(reg.ready(), vec![ProviderId::DeepSeek]);
        assert!(reg.get(ProviderId::DeepSeek).is_ok());
        match reg.get(ProviderId::DeepInfra) {
            Err(RelayError::ProviderUnavailable(m)) => assert!(m.contains("credential")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn invalid_base_url_disables_provider() {
        let cfg = RelayConfig::from_sources(
            env_of(&[("DEEPINFRA_API_KEY", "k"), ("DEEPINFRA_BASE_URL", "not a url")]),
            None,
        );
        let reg = ProviderRegistry::from_config(&cfg);
        assert!(reg.ready().is_empty());
        assert!(matches!(
            reg.get(ProviderId::DeepInfra),
            Err(RelayError::ProviderUnavailable(_))
        ));
    }

    #[test]
    fn shared_adapter_is_the_same_instance() {
        let cfg = RelayConfig::from_sources(env_of(&[("DEEPSEEK_API_KEY", "sk-1")]), None);
        let reg = ProviderRegistry::from_config(&cfg);
        let a = reg.get(ProviderId::DeepSeek).unwrap();
        let b = reg.get(ProviderId::DeepSeek).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
