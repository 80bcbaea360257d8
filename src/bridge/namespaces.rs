//! CAIP-25 namespace negotiation
//!
//! A proposal lists required and optional namespaces. The approved set is
//! the intersection with what this wallet supports; a required chain or
//! method outside that set rejects the whole proposal.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::types::ProviderRpcError;
use crate::chain::ChainRegistry;
use crate::types::{ChainRef, NetworkType};

pub const EIP155_METHODS: &[&str] = &[
    "personal_sign",
    "eth_signTypedData",
    "eth_signTypedData_v4",
    "eth_sendTransaction",
];
pub const CFX_METHODS: &[&str] = &["personal_sign", "cfx_sendTransaction"];
pub const SESSION_EVENTS: &[&str] = &["chainChanged", "accountsChanged"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceRequest {
    #[serde(default)]
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

/// Keyed by namespace (`eip155`) or by a single chain (`eip155:1`)
pub type ProposalNamespaces = BTreeMap<String, NamespaceRequest>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedNamespace {
    pub chains: Vec<ChainRef>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
    /// CAIP-10 `namespace:reference:address`
    pub accounts: Vec<String>,
}

pub type ApprovedNamespaces = BTreeMap<String, ApprovedNamespace>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SupportedNamespace {
    chains: BTreeSet<ChainRef>,
    methods: BTreeSet<String>,
    events: BTreeSet<String>,
}

/// What this wallet can serve, per namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportedNamespaces {
    namespaces: BTreeMap<String, SupportedNamespace>,
}

impl SupportedNamespaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn methods_for(network_type: NetworkType) -> &'static [&'static str] {
        match network_type {
            NetworkType::Ethereum => EIP155_METHODS,
            NetworkType::Conflux => CFX_METHODS,
        }
    }

    /// Add a chain with the family's default methods and events
    pub fn add_chain(&mut self, chain: ChainRef) {
        let entry = self
            .namespaces
            .entry(chain.network_type.namespace().to_string())
            .or_default();
        entry.chains.insert(chain);
        entry
            .methods
            .extend(Self::methods_for(chain.network_type).iter().map(|m| m.to_string()));
        entry.events.extend(SESSION_EVENTS.iter().map(|e| e.to_string()));
    }

    pub fn with_chain(mut self, chain: ChainRef) -> Self {
        self.add_chain(chain);
        self
    }

    /// Every chain with a registered provider
    pub fn from_registry(registry: &ChainRegistry) -> Self {
        let mut supported = Self::new();
        for provider in registry.get_all() {
            supported.add_chain(ChainRef::new(provider.network_type(), provider.chain_id()));
        }
        supported
    }

    pub fn supports_chain(&self, chain: &ChainRef) -> bool {
        self.namespaces
            .get(chain.network_type.namespace())
            .map_or(false, |ns| ns.chains.contains(chain))
    }

    pub fn chains(&self) -> Vec<ChainRef> {
        self.namespaces.values().flat_map(|ns| ns.chains.iter().copied()).collect()
    }
}

/// Fold `eip155:1`-style keys into their namespace
fn normalize(namespaces: &ProposalNamespaces) -> BTreeMap<String, NamespaceRequest> {
    let mut out: BTreeMap<String, NamespaceRequest> = BTreeMap::new();
    for (key, request) in namespaces {
        let (namespace, implied_chain) = match key.split_once(':') {
            Some((ns, _)) => (ns.to_string(), Some(key.clone())),
            None => (key.clone(), None),
        };
        let entry = out.entry(namespace).or_default();
        entry.chains.extend(implied_chain);
        entry.chains.extend(request.chains.iter().cloned());
        entry.methods.extend(request.methods.iter().cloned());
        entry.events.extend(request.events.iter().cloned());
    }
    out
}

fn accept(
    approved: &mut ApprovedNamespaces,
    namespace: &str,
    request: &NamespaceRequest,
    supported: &SupportedNamespaces,
    required: bool,
) -> Result<(), ProviderRpcError> {
    let Some(available) = supported.namespaces.get(namespace) else {
        if required {
            return Err(ProviderRpcError::unsupported_chain(namespace));
        }
        return Ok(());
    };

    let mut chains = Vec::new();
    for raw in &request.chains {
        match ChainRef::parse(raw) {
            Ok(chain) if chain.network_type.namespace() == namespace && available.chains.contains(&chain) => {
                chains.push(chain)
            }
            _ if required => return Err(ProviderRpcError::unsupported_chain(raw)),
            _ => {}
        }
    }

    let mut methods = Vec::new();
    for method in &request.methods {
        if available.methods.contains(method) {
            methods.push(method.clone());
        } else if required {
            return Err(ProviderRpcError::unsupported_method(method));
        }
    }

    let events: Vec<String> = request
        .events
        .iter()
        .filter(|e| available.events.contains(*e))
        .cloned()
        .collect();

    if chains.is_empty() {
        return Ok(());
    }

    let entry = approved.entry(namespace.to_string()).or_default();
    for chain in chains {
        if !entry.chains.contains(&chain) {
            entry.chains.push(chain);
        }
    }
    for method in methods {
        if !entry.methods.contains(&method) {
            entry.methods.push(method);
        }
    }
    for event in events {
        if !entry.events.contains(&event) {
            entry.events.push(event);
        }
    }
    Ok(())
}

/// Approved chains/methods/events = requested ∩ supported
pub fn intersect(
    required: &ProposalNamespaces,
    optional: &ProposalNamespaces,
    supported: &SupportedNamespaces,
) -> Result<ApprovedNamespaces, ProviderRpcError> {
    let mut approved = ApprovedNamespaces::new();

    for (namespace, request) in normalize(required) {
        accept(&mut approved, &namespace, &request, supported, true)?;
    }
    for (namespace, request) in normalize(optional) {
        accept(&mut approved, &namespace, &request, supported, false)?;
    }

    if approved.is_empty() {
        return Err(ProviderRpcError::unsupported_chain("no supported chain requested"));
    }
    Ok(approved)
}

/// Attach the CAIP-10 accounts whose chain was approved
pub fn with_accounts(approved: &ApprovedNamespaces, accounts: &[String]) -> ApprovedNamespaces {
    let mut out = approved.clone();
    for (namespace, ns) in out.iter_mut() {
        ns.accounts = accounts
            .iter()
            .filter(|account| {
                let mut parts = account.splitn(3, ':');
                let (Some(ans), Some(reference), Some(_)) = (parts.next(), parts.next(), parts.next()) else {
                    return false;
                };
                ans == namespace
                    && ChainRef::parse(&format!("{}:{}", ans, reference))
                        .map_or(false, |chain| ns.chains.contains(&chain))
            })
            .cloned()
            .collect();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    fn supported() -> SupportedNamespaces {
        SupportedNamespaces::new()
            .with_chain(ChainRef::new(NetworkType::Ethereum, 1))
            .with_chain(ChainRef::new(NetworkType::Conflux, 1029))
    }

    fn request(chains: &[&str], methods: &[&str], events: &[&str]) -> NamespaceRequest {
        NamespaceRequest {
            chains: chains.iter().map(|s| s.to_string()).collect(),
            methods: methods.iter().map(|s| s.to_string()).collect(),
            events: events.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_intersection_drops_unsupported_optional_entries() {
        let required = ProposalNamespaces::from([(
            "eip155".to_string(),
            request(&["eip155:1"], &["personal_sign"], &["chainChanged"]),
        )]);
        let optional = ProposalNamespaces::from([(
            "eip155".to_string(),
            request(&["eip155:137"], &["eth_sendTransaction", "wallet_switchEthereumChain"], &["message"]),
        )]);

        let approved = intersect(&required, &optional, &supported()).unwrap();
        let eip155 = &approved["eip155"];
        assert_eq!(eip155.chains, vec![ChainRef::new(NetworkType::Ethereum, 1)]);
        assert_eq!(eip155.methods, vec!["personal_sign", "eth_sendTransaction"]);
        assert_eq!(eip155.events, vec!["chainChanged"]);
        assert!(!approved.contains_key("cfx"));
    }

    #[test]
    fn test_chain_key_shorthand() {
        let required = ProposalNamespaces::from([(
            "cfx:1029".to_string(),
            request(&[], &["cfx_sendTransaction"], &[]),
        )]);
        let approved = intersect(&required, &ProposalNamespaces::new(), &supported()).unwrap();
        assert_eq!(approved["cfx"].chains, vec![ChainRef::new(NetworkType::Conflux, 1029)]);
    }

    #[test]
    fn test_required_chain_outside_support_rejects() {
        let required = ProposalNamespaces::from([(
            "eip155".to_string(),
            request(&["eip155:56"], &["personal_sign"], &[]),
        )]);
        let err = intersect(&required, &ProposalNamespaces::new(), &supported()).unwrap_err();
        assert_eq!(err.code, codes::CHAIN_DISCONNECTED);

        let solana = ProposalNamespaces::from([("solana".to_string(), request(&[], &[], &[]))]);
        let err = intersect(&solana, &ProposalNamespaces::new(), &supported()).unwrap_err();
        assert_eq!(err.code, codes::CHAIN_DISCONNECTED);
    }

    #[test]
    fn test_required_method_outside_support_rejects() {
        let required = ProposalNamespaces::from([(
            "eip155".to_string(),
            request(&["eip155:1"], &["eth_sign"], &[]),
        )]);
        let err = intersect(&required, &ProposalNamespaces::new(), &supported()).unwrap_err();
        assert_eq!(err.code, codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_nothing_supported_rejects() {
        let optional = ProposalNamespaces::from([(
            "eip155".to_string(),
            request(&["eip155:10"], &["personal_sign"], &[]),
        )]);
        let err = intersect(&ProposalNamespaces::new(), &optional, &supported()).unwrap_err();
        assert_eq!(err.code, codes::CHAIN_DISCONNECTED);
    }

    #[test]
    fn test_accounts_filtered_by_approved_chain() {
        let required = ProposalNamespaces::from([(
            "eip155".to_string(),
            request(&["eip155:1"], &["personal_sign"], &[]),
        )]);
        let approved = intersect(&required, &ProposalNamespaces::new(), &supported()).unwrap();
        let accounts = vec![
            "eip155:1:0x2c7536E3605D9C16a7a3D7b1898e529396a65c23".to_string(),
            "eip155:5:0x2c7536E3605D9C16a7a3D7b1898e529396a65c23".to_string(),
            "cfx:1029:cfx:aarc9abycue0hhzgyrr53m6cxedgccrmmyybjgh4xg".to_string(),
            "garbage".to_string(),
        ];
        let with = with_accounts(&approved, &accounts);
        assert_eq!(with["eip155"].accounts, vec![accounts[0].clone()]);
    }
}
