//! Core Configuration
//!
//! JSON configuration for the networks a wallet talks to, the credential
//! cipher and the fee suggestion tiers. Endpoints are checked with the
//! usual rules:
//! - HTTPS for remote hosts, HTTP only for localhost / private LAN
//! - one entry per (network type, chain id)
//! - credentials or API keys in the URL produce warnings

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::chain::ethereum::eip155_v_base;
use crate::cipher::CipherConfig;
use crate::error::{CustodyError, CustodyResult};
use crate::fees::FeeTierConfig;
use crate::types::{ChainRef, NetworkType};

/// One configured network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub network_type: NetworkType,
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
}

impl NetworkConfig {
    pub fn chain_ref(&self) -> ChainRef {
        ChainRef::new(self.network_type, self.chain_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreConfig {
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    #[serde(default)]
    pub cipher: CipherConfig,
    #[serde(default)]
    pub fees: FeeTierConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            networks: default_networks(),
            cipher: CipherConfig::default(),
            fees: FeeTierConfig::default(),
        }
    }
}

/// Public endpoints used when no configuration file is supplied
pub fn default_networks() -> Vec<NetworkConfig> {
    vec![
        NetworkConfig {
            network_type: NetworkType::Ethereum,
            chain_id: 1,
            name: "Ethereum Mainnet".to_string(),
            rpc_url: "https://eth.llamarpc.com".to_string(),
        },
        NetworkConfig {
            network_type: NetworkType::Ethereum,
            chain_id: 11155111,
            name: "Sepolia".to_string(),
            rpc_url: "https://ethereum-sepolia.publicnode.com".to_string(),
        },
        NetworkConfig {
            network_type: NetworkType::Conflux,
            chain_id: 1029,
            name: "Conflux Mainnet".to_string(),
            rpc_url: "https://main.confluxrpc.com".to_string(),
        },
        NetworkConfig {
            network_type: NetworkType::Conflux,
            chain_id: 1,
            name: "Conflux Testnet".to_string(),
            rpc_url: "https://test.confluxrpc.com".to_string(),
        },
    ]
}

impl CoreConfig {
    pub fn from_json(json: &str) -> CustodyResult<Self> {
        let config: CoreConfig = serde_json::from_str(json)
            .map_err(|e| CustodyError::invalid_input(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> CustodyResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CustodyError::invalid_input(format!("Cannot read configuration {}: {}", path.display(), e))
        })?;
        Self::from_json(&contents)
    }

    /// Reject duplicate networks, bad endpoints, EVM chain ids outside EIP-155
    /// range and a zero iteration count.
    /// Returns the warnings of endpoints that are valid but worth a look.
    pub fn validate(&self) -> CustodyResult<Vec<String>> {
        if self.cipher.iterations == 0 {
            return Err(CustodyError::invalid_input("cipher.iterations must be positive"));
        }

        let mut seen = HashSet::new();
        let mut warnings = Vec::new();
        for network in &self.networks {
            if !seen.insert(network.chain_ref()) {
                return Err(CustodyError::invalid_input(format!(
                    "Network {} configured twice",
                    network.chain_ref()
                )));
            }
            if network.network_type == NetworkType::Ethereum {
                eip155_v_base(network.chain_id)?;
            }

            let validation = validate_endpoint(&network.rpc_url);
            if !validation.is_valid {
                return Err(CustodyError::invalid_input(format!(
                    "Invalid endpoint for {}: {}",
                    network.chain_ref(),
                    validation.errors.join("; ")
                )));
            }
            warnings.extend(
                validation
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}: {}", network.chain_ref(), w)),
            );
        }
        Ok(warnings)
    }

    pub fn network(&self, network_type: NetworkType, chain_id: u64) -> Option<&NetworkConfig> {
        self.networks
            .iter()
            .find(|n| n.network_type == network_type && n.chain_id == chain_id)
    }
}

/// Validation result for an RPC endpoint
#[derive(Debug, Clone, Default)]
pub struct EndpointValidation {
    pub is_valid: bool,
    pub url: Option<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

fn is_local_host(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host.starts_with("192.168.")
}

/// Validate a JSON-RPC endpoint URL
pub fn validate_endpoint(url: &str) -> EndpointValidation {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => {
            errors.push(format!("Invalid URL format: {}", e));
            return EndpointValidation {
                is_valid: false,
                url: None,
                warnings,
                errors,
            };
        }
    };

    match parsed.scheme() {
        "https" => {}
        "http" => match parsed.host_str() {
            Some(host) if is_local_host(host) => {
                warnings.push("HTTP allowed for local development only".to_string());
            }
            _ => errors.push("HTTPS required for remote endpoints".to_string()),
        },
        other => errors.push(format!("Unsupported URL scheme: {}", other)),
    }

    match parsed.host() {
        None => errors.push("Endpoint has no host".to_string()),
        Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => {
            if !parsed.host_str().map(is_local_host).unwrap_or(false) {
                warnings.push("Using IP address instead of domain name - ensure endpoint is trusted".to_string());
            }
        }
        Some(url::Host::Domain(_)) => {}
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        warnings.push("Credentials in URL - consider using headers for authentication".to_string());
    }

    if let Some(query) = parsed.query() {
        let query = query.to_lowercase();
        if query.contains("apikey") || query.contains("api_key") {
            warnings.push("API key in URL query string - ensure URL is not logged".to_string());
        }
    }

    let is_valid = errors.is_empty();
    EndpointValidation {
        is_valid,
        url: is_valid.then(|| parsed.to_string()),
        warnings,
        errors,
    }
}
