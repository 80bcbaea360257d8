//! Chain Registry
//!
//! In-memory map of configured providers keyed by `(network type, chain id)`.
//! Built once at startup and handed to consumers by reference; registration
//! replaces any provider already present for the same key.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::rpc::{HttpTransport, RpcTransport};
use super::{ChainProvider, ConfluxProvider, EthereumProvider};
use crate::config::{CoreConfig, NetworkConfig};
use crate::error::CustodyResult;
use crate::types::{ChainRef, NetworkType};

#[derive(Default, Clone)]
pub struct ChainRegistry {
    providers: BTreeMap<ChainRef, Arc<dyn ChainProvider>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One HTTP-backed provider per configured network
    pub fn from_config(config: &CoreConfig) -> CustodyResult<Self> {
        let mut registry = Self::new();
        for network in &config.networks {
            let transport: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new(network.rpc_url.clone())?);
            registry.register(provider_for(network, transport));
        }
        Ok(registry)
    }

    /// Last write wins for a `(network type, chain id)` already present
    pub fn register(&mut self, provider: Arc<dyn ChainProvider>) {
        let key = ChainRef::new(provider.network_type(), provider.chain_id());
        if self.providers.insert(key, provider).is_some() {
            crate::log_debug!("registry", "Replaced provider", chain = key);
        }
    }

    /// Without a network type, an Ethereum provider is preferred over Conflux
    pub fn get(&self, chain_id: u64, network_type: Option<NetworkType>) -> Option<Arc<dyn ChainProvider>> {
        match network_type {
            Some(nt) => self.providers.get(&ChainRef::new(nt, chain_id)).cloned(),
            None => NetworkType::ALL
                .iter()
                .find_map(|nt| self.providers.get(&ChainRef::new(*nt, chain_id)).cloned()),
        }
    }

    pub fn has(&self, chain_id: u64, network_type: Option<NetworkType>) -> bool {
        self.get(chain_id, network_type).is_some()
    }

    pub fn get_by_type(&self, network_type: NetworkType) -> Vec<Arc<dyn ChainProvider>> {
        self.providers
            .iter()
            .filter(|(key, _)| key.network_type == network_type)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Ordered by network type, then chain id
    pub fn get_all(&self) -> Vec<Arc<dyn ChainProvider>> {
        self.providers.values().cloned().collect()
    }

    pub fn size(&self) -> usize {
        self.providers.len()
    }
}

/// Build the provider for one configured network on top of `transport`
pub fn provider_for(network: &NetworkConfig, transport: Arc<dyn RpcTransport>) -> Arc<dyn ChainProvider> {
    match network.network_type {
        NetworkType::Ethereum => Arc::new(EthereumProvider::new(network.chain_id, network.name.clone(), transport)),
        NetworkType::Conflux => Arc::new(ConfluxProvider::new(network.chain_id, network.name.clone(), transport)),
    }
}
