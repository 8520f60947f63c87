//! Provider lookup by [`ProviderKind`].

use std::collections::HashMap;
use std::sync::Arc;

use genq_core::ProviderKind;

use crate::adapter::ProviderAdapter;
use crate::config::ProviderConfig;
use crate::fal::FalQueueAdapter;
use crate::http::build_client;
use crate::minimax::MinimaxAdapter;
use crate::runway::RunwayAdapter;
use crate::simulation::{SimulationProfile, Simulator};

/// A registered provider.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub adapter: Arc<dyn ProviderAdapter>,
    /// Concurrency slots one in-flight job of this provider occupies.
    pub weight: u32,
}

/// Adapters available to the queue, keyed by provider.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    providers: HashMap<ProviderKind, ProviderDescriptor>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `adapter` with weight 1, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
        self.register_weighted(adapter, 1)
    }

    /// Register `adapter` occupying `weight` slots per in-flight job.
    /// A weight of zero is stored as one.
    pub fn register_weighted(&mut self, adapter: Arc<dyn ProviderAdapter>, weight: u32) -> &mut Self {
        let kind = adapter.kind();
        self.providers.insert(
            kind,
            ProviderDescriptor {
                kind,
                adapter,
                weight: weight.max(1),
            },
        );
        self
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderDescriptor> {
        self.providers.get(&kind)
    }

    pub fn adapter(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(&kind).map(|d| Arc::clone(&d.adapter))
    }

    /// Slot weight for `kind`; unregistered providers count as 1.
    pub fn weight(&self, kind: ProviderKind) -> u32 {
        self.providers.get(&kind).map_or(1, |d| d.weight)
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.providers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Every provider running against its own simulator.
    pub fn simulated(profile: SimulationProfile) -> Self {
        Self::new()
            .with(Arc::new(FalQueueAdapter::simulated(Arc::new(Simulator::new(profile)))))
            .with(Arc::new(MinimaxAdapter::simulated(Arc::new(Simulator::new(profile)))))
            .with(Arc::new(RunwayAdapter::simulated(Arc::new(Simulator::new(profile)))))
    }

    /// Build live adapters (or simulated ones when `config.simulate`).
    pub fn from_config(config: &ProviderConfig) -> Self {
        if config.simulate {
            tracing::info!(polls = config.simulate_polls, "Using simulated providers");
            return Self::simulated(SimulationProfile::AfterPolls(config.simulate_polls));
        }

        let client = build_client(config.request_timeout);
        for (kind, configured) in [
            (ProviderKind::Fal, config.fal_key.is_some()),
            (ProviderKind::Minimax, config.minimax_api_key.is_some()),
            (ProviderKind::Runway, config.runway_api_key.is_some()),
        ] {
            if !configured {
                tracing::warn!(provider = %kind, "Provider credentials missing; submissions will fail");
            }
        }

        Self::new()
            .with(Arc::new(FalQueueAdapter::new(
                client.clone(),
                config.fal_queue_url.clone(),
                config.fal_key.clone(),
            )))
            .with(Arc::new(MinimaxAdapter::new(
                client.clone(),
                config.minimax_base_url.clone(),
                config.minimax_api_key.clone(),
                config.minimax_group_id.clone(),
            )))
            .with(Arc::new(RunwayAdapter::new(
                client,
                config.runway_base_url.clone(),
                config.runway_api_key.clone(),
            )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_registers_every_provider() {
        let registry = AdapterRegistry::from_config(&ProviderConfig::default());
        assert_eq!(
            registry.kinds(),
            vec![ProviderKind::Fal, ProviderKind::Minimax, ProviderKind::Runway]
        );
    }

    #[test]
    fn weights_default_to_one() {
        let mut registry = AdapterRegistry::new();
        registry.register_weighted(
            Arc::new(RunwayAdapter::simulated(Arc::new(Simulator::new(
                SimulationProfile::AfterPolls(1),
            )))),
            0,
        );
        assert_eq!(registry.weight(ProviderKind::Runway), 1);
        assert_eq!(registry.weight(ProviderKind::Fal), 1);
        assert!(registry.adapter(ProviderKind::Fal).is_none());
    }

    #[test]
    fn re_registering_replaces_adapter() {
        let sim = || Arc::new(Simulator::new(SimulationProfile::AfterPolls(1)));
        let mut registry = AdapterRegistry::new();
        registry.register(Arc::new(FalQueueAdapter::simulated(sim())));
        registry.register_weighted(Arc::new(FalQueueAdapter::simulated(sim())), 2);
        assert_eq!(registry.kinds().len(), 1);
        assert_eq!(registry.weight(ProviderKind::Fal), 2);
    }
}
