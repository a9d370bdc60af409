//! Registry of live adapters for the current config snapshot.
//!
//! Mutated only by `initialize` (on startup and reload) and `close_all`
//! (shutdown); reads are concurrent. Individual construction failures are
//! logged and skipped so one broken upstream never takes down the rest.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::providers::{build_provider, Provider};

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the adapter set for `config`, replacing and closing whatever
    /// was registered before.
    pub async fn initialize(&self, config: &GatewayConfig) {
        let mut next: HashMap<String, Arc<dyn Provider>> = HashMap::new();

        for settings in &config.providers {
            if !settings.enabled {
                info!(provider = %settings.name, "provider disabled, skipping");
                continue;
            }
            match build_provider(settings) {
                Ok(provider) => {
                    info!(provider = %settings.name, kind = ?settings.kind, "provider registered");
                    next.insert(settings.name.clone(), provider);
                }
                Err(err) => {
                    warn!(provider = %settings.name, error = %err, "skipping provider");
                }
            }
        }

        let registered = next.len();
        let previous = {
            let mut guard =
                self.providers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *guard, next)
        };
        for provider in previous.values() {
            provider.close().await;
        }
        info!(registered, "provider registry initialized");
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Tear down every adapter. Safe to call more than once.
    pub async fn close_all(&self) {
        let drained = {
            let mut guard =
                self.providers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        for provider in drained.values() {
            provider.close().await;
        }
        if !drained.is_empty() {
            info!(closed = drained.len(), "provider registry closed");
        }
    }
}
