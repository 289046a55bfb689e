//! Resource generation registry
//!
//! Maps each discovery type to the generator computing its resources for a
//! proxy. The mapping is built once at startup and handed to the dispatcher;
//! it cannot change afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::proto::DiscoveryRequest;
use crate::proxy::ProxySession;
use crate::xds::DiscoveryType;
use crate::xds::types::Resource;

/// Computes the resources of one discovery type for a proxy
#[async_trait]
pub trait ResourceGenerator: Send + Sync {
    async fn generate(
        &self,
        proxy: &ProxySession,
        request: &DiscoveryRequest,
    ) -> anyhow::Result<Vec<Resource>>;
}

/// Generator backed by a plain function
pub struct FnGenerator<F>(F);

/// Wrap a function as a [`ResourceGenerator`]
pub fn from_fn<F>(f: F) -> FnGenerator<F>
where
    F: Fn(&ProxySession, &DiscoveryRequest) -> anyhow::Result<Vec<Resource>> + Send + Sync,
{
    FnGenerator(f)
}

#[async_trait]
impl<F> ResourceGenerator for FnGenerator<F>
where
    F: Fn(&ProxySession, &DiscoveryRequest) -> anyhow::Result<Vec<Resource>> + Send + Sync,
{
    async fn generate(
        &self,
        proxy: &ProxySession,
        request: &DiscoveryRequest,
    ) -> anyhow::Result<Vec<Resource>> {
        (self.0)(proxy, request)
    }
}

/// Immutable discovery type to generator mapping
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<DiscoveryType, Arc<dyn ResourceGenerator>>,
}

impl GeneratorRegistry {
    pub fn builder() -> GeneratorRegistryBuilder {
        GeneratorRegistryBuilder::default()
    }

    pub fn get(&self, discovery_type: DiscoveryType) -> Option<&Arc<dyn ResourceGenerator>> {
        self.generators.get(&discovery_type)
    }

    pub fn contains(&self, discovery_type: DiscoveryType) -> bool {
        self.generators.contains_key(&discovery_type)
    }

    /// Registered types in response order
    pub fn types(&self) -> Vec<DiscoveryType> {
        DiscoveryType::all()
            .iter()
            .copied()
            .filter(|t| self.contains(*t))
            .collect()
    }
}

/// Builder for [`GeneratorRegistry`]
#[derive(Default)]
pub struct GeneratorRegistryBuilder {
    generators: HashMap<DiscoveryType, Arc<dyn ResourceGenerator>>,
}

impl GeneratorRegistryBuilder {
    /// Register the generator of a type, replacing any previous one
    pub fn register(
        mut self,
        discovery_type: DiscoveryType,
        generator: impl ResourceGenerator + 'static,
    ) -> Self {
        self.generators.insert(discovery_type, Arc::new(generator));
        self
    }

    pub fn build(self) -> GeneratorRegistry {
        GeneratorRegistry {
            generators: self.generators,
        }
    }
}
