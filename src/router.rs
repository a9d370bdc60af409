//! Request router: deterministic header override, else weighted random
//! selection over registered providers.
//!
//! Weights come from the config snapshot the request started with and are
//! normalized at construction. Selection is an O(n) prefix-sum scan with
//! the thread-local RNG, so the hot path takes no global lock.

use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::providers::{Provider, ProviderRegistry};

#[derive(Error, Debug, PartialEq)]
pub enum RouterError {
    #[error("provider {name} has negative weight {weight}")]
    NegativeWeight { name: String, weight: f64 },
}

#[derive(Debug, Clone)]
pub struct RequestRouter {
    /// Enabled provider names with normalized weights (zeros preserved).
    weights: Vec<(String, f64)>,
}

impl RequestRouter {
    /// Build a router from `(name, weight)` pairs. Negative weights are
    /// rejected; when the total is positive, weights are normalized.
    pub fn new(weights: Vec<(String, f64)>) -> Result<Self, RouterError> {
        for (name, weight) in &weights {
            if *weight < 0.0 {
                return Err(RouterError::NegativeWeight { name: name.clone(), weight: *weight });
            }
        }
        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        let weights = if total > 0.0 {
            weights.into_iter().map(|(name, w)| (name, w / total)).collect()
        } else {
            weights
        };
        Ok(Self { weights })
    }

    /// Select an adapter for this request.
    pub fn select(
        &self,
        provider_priority: Option<&str>,
        registry: &ProviderRegistry,
    ) -> Result<Arc<dyn Provider>, GatewayError> {
        if let Some(priority) = provider_priority.filter(|p| !p.is_empty()) {
            if let Some(provider) = registry.get(priority) {
                debug!(provider = priority, "selected provider via priority header");
                return Ok(provider);
            }
            warn!(provider = priority, "priority provider not registered, using weighted selection");
        }

        let resolving: Vec<&(String, f64)> =
            self.weights.iter().filter(|(name, _)| registry.contains(name)).collect();
        if resolving.is_empty() {
            return Err(GatewayError::NoProviderAvailable);
        }

        let total: f64 = resolving.iter().map(|(_, w)| w).sum();
        let chosen = if total <= 0.0 {
            // Every resolving weight is zero: fall back to uniform.
            let index = rand::thread_rng().gen_range(0..resolving.len());
            resolving[index].0.as_str()
        } else {
            let mut remaining = rand::thread_rng().gen_range(0.0..total);
            let mut chosen = resolving[resolving.len() - 1].0.as_str();
            for (name, weight) in &resolving {
                if remaining < *weight {
                    chosen = name.as_str();
                    break;
                }
                remaining -= weight;
            }
            chosen
        };

        debug!(provider = chosen, "selected provider via weighted routing");
        registry.get(chosen).ok_or(GatewayError::NoProviderAvailable)
    }

    /// Names the router could dispatch to right now.
    pub fn available(&self, registry: &ProviderRegistry) -> Vec<String> {
        self.weights
            .iter()
            .filter(|(name, _)| registry.contains(name))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use std::collections::HashMap;

    async fn registry_with_defaults() -> ProviderRegistry {
        let registry = ProviderRegistry::new();
        registry.initialize(&GatewayConfig::default()).await;
        registry
    }

    fn mock_config(names_weights: &[(&str, f64)]) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        let template = config.providers[0].clone();
        config.providers = names_weights
            .iter()
            .map(|(name, weight)| {
                let mut p = template.clone();
                p.name = name.to_string();
                p.weight = *weight;
                p
            })
            .collect();
        config
    }

    #[test]
    fn negative_weights_are_rejected_at_construction() {
        let err = RequestRouter::new(vec![("a".into(), -1.0)]).unwrap_err();
        assert_eq!(err, RouterError::NegativeWeight { name: "a".into(), weight: -1.0 });
    }

    #[test]
    fn weights_are_normalized_at_construction() {
        let router = RequestRouter::new(vec![("a".into(), 7.0), ("b".into(), 3.0)]).unwrap();
        let total: f64 = router.weights.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!((router.weights[0].1 - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn priority_header_pins_the_provider() {
        let registry = registry_with_defaults().await;
        let router =
            RequestRouter::new(vec![("mock_openai".into(), 1.0), ("mock_vllm".into(), 1.0)])
                .unwrap();

        for _ in 0..50 {
            let provider = router.select(Some("mock_vllm"), &registry).unwrap();
            assert_eq!(provider.name(), "mock_vllm");
        }
    }

    #[tokio::test]
    async fn unregistered_priority_falls_back_to_weighted() {
        let registry = registry_with_defaults().await;
        let router = RequestRouter::new(vec![("mock_openai".into(), 1.0)]).unwrap();
        let provider = router.select(Some("ghost"), &registry).unwrap();
        assert_eq!(provider.name(), "mock_openai");
    }

    #[tokio::test]
    async fn empirical_distribution_tracks_normalized_weights() {
        let registry = ProviderRegistry::new();
        registry.initialize(&mock_config(&[("mock_a", 0.7), ("mock_b", 0.3)])).await;
        let router =
            RequestRouter::new(vec![("mock_a".into(), 0.7), ("mock_b".into(), 0.3)]).unwrap();

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..10_000 {
            let provider = router.select(None, &registry).unwrap();
            *counts.entry(provider.name().to_string()).or_default() += 1;
        }

        let a = counts["mock_a"];
        let b = counts["mock_b"];
        assert!((6600..=7400).contains(&a), "mock_a selected {a} times");
        assert!((2600..=3400).contains(&b), "mock_b selected {b} times");
    }

    #[tokio::test]
    async fn zero_weights_fall_back_to_uniform_selection() {
        let registry = ProviderRegistry::new();
        registry.initialize(&mock_config(&[("mock_a", 1.0), ("mock_b", 1.0)])).await;
        let router =
            RequestRouter::new(vec![("mock_a".into(), 0.0), ("mock_b".into(), 0.0)]).unwrap();

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..2_000 {
            let provider = router.select(None, &registry).unwrap();
            *counts.entry(provider.name().to_string()).or_default() += 1;
        }
        assert!(counts["mock_a"] > 700, "uniform selection should reach both providers");
        assert!(counts["mock_b"] > 700, "uniform selection should reach both providers");
    }

    #[tokio::test]
    async fn unresolvable_names_are_excluded_from_selection() {
        let registry = ProviderRegistry::new();
        registry.initialize(&mock_config(&[("mock_a", 1.0)])).await;
        // mock_gone carries nearly all the weight but is not registered.
        let router =
            RequestRouter::new(vec![("mock_a".into(), 0.01), ("mock_gone".into(), 0.99)]).unwrap();

        for _ in 0..100 {
            let provider = router.select(None, &registry).unwrap();
            assert_eq!(provider.name(), "mock_a");
        }
    }

    #[tokio::test]
    async fn empty_resolving_set_is_no_provider_available() {
        let registry = ProviderRegistry::new();
        let router = RequestRouter::new(vec![("mock_a".into(), 1.0)]).unwrap();
        let err = match router.select(None, &registry) {
            Err(e) => e,
            Ok(_) => panic!("expected router.select to fail"),
        };
        assert!(matches!(err, GatewayError::NoProviderAvailable));
    }

    #[tokio::test]
    async fn available_lists_only_registered_names() {
        let registry = registry_with_defaults().await;
        let router = RequestRouter::new(vec![
            ("mock_openai".into(), 0.5),
            ("mock_vllm".into(), 0.5),
            ("ghost".into(), 0.5),
        ])
        .unwrap();
        assert_eq!(router.available(&registry), vec!["mock_openai", "mock_vllm"]);
    }
}
