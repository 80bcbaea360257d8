use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use custody_core::chain::conflux::{self, ConfluxAddress};
use custody_core::chain::registry::provider_for;
use custody_core::chain::{AddressOptions, ChainProvider, HttpTransport};
use custody_core::config::NetworkConfig;
use custody_core::utils::logging;
use custody_core::{ChainRegistry, CoreConfig, CredentialCipher, NetworkType};

#[derive(Parser)]
#[command(name = "custody", version, about = "Wallet custody core tools")]
struct Cli {
    /// Configuration file (defaults to the built-in public endpoints)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encrypt a JSON value with a password
    Encrypt {
        #[arg(long)]
        password: String,
        /// JSON value; a bare word is taken as a string
        plaintext: String,
    },
    /// Decrypt a blob produced by `encrypt`
    Decrypt {
        #[arg(long)]
        password: String,
        blob: String,
    },
    /// Derive the address of a public key
    Address {
        #[arg(long)]
        network: NetworkType,
        #[arg(long)]
        chain_id: u64,
        /// Print the verbose CIP-37 form
        #[arg(long)]
        verbose: bool,
        public_key: String,
    },
    /// Check address format and checksum
    ValidateAddress {
        #[arg(long)]
        network: NetworkType,
        #[arg(long, default_value_t = 1)]
        chain_id: u64,
        address: String,
    },
    /// Convert between 0x hex and CIP-37 base32
    ConvertAddress {
        #[arg(long, default_value_t = conflux::address::MAINNET_ID)]
        chain_id: u64,
        address: String,
    },
    /// Validate a configuration file
    CheckConfig { path: PathBuf },
}

fn main() {
    logging::init_from_env();
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(output) => print(&output, json),
        Err(e) => {
            if json {
                println!("{}", json!({ "error": format!("{:#}", e) }));
            } else {
                eprintln!("error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

fn print(output: &Value, json: bool) {
    if json {
        println!("{}", output);
        return;
    }
    match output {
        Value::Object(map) => {
            for (key, value) in map {
                match value {
                    Value::String(s) => println!("{}: {}", key, s),
                    other => println!("{}: {}", key, other),
                }
            }
        }
        Value::String(s) => println!("{}", s),
        other => println!("{}", other),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<CoreConfig> {
    match path {
        Some(path) => {
            CoreConfig::load(path).with_context(|| format!("failed to load {}", path.display()))
        }
        None => Ok(CoreConfig::default()),
    }
}

/// Derivation and validation never touch the transport, so an unconfigured
/// chain still gets a provider.
fn provider(config: &CoreConfig, network: NetworkType, chain_id: u64) -> Result<Arc<dyn ChainProvider>> {
    let registry = ChainRegistry::from_config(config)?;
    if let Some(provider) = registry.get(chain_id, Some(network)) {
        return Ok(provider);
    }
    let offline = NetworkConfig {
        network_type: network,
        chain_id,
        name: format!("{} {}", network, chain_id),
        rpc_url: String::new(),
    };
    Ok(provider_for(&offline, Arc::new(HttpTransport::new("")?)))
}

fn run(cli: Cli) -> Result<Value> {
    let config = load_config(cli.config.as_ref())?;
    let cipher = CredentialCipher::new(config.cipher);

    match cli.command {
        Command::Encrypt { password, plaintext } => {
            let value: Value = serde_json::from_str(&plaintext).unwrap_or(Value::String(plaintext));
            let blob = cipher.encrypt(&value, Some(&password))?;
            Ok(Value::String(blob))
        }
        Command::Decrypt { password, blob } => {
            let value: Value = cipher.decrypt(&blob, Some(&password))?;
            Ok(value)
        }
        Command::Address {
            network,
            chain_id,
            verbose,
            public_key,
        } => {
            let key = hex::decode(public_key.trim_start_matches("0x")).context("public key must be hex")?;
            let derived = provider(&config, network, chain_id)?.derive_address(
                &key,
                &AddressOptions {
                    chain_id: Some(chain_id),
                    verbose,
                },
            )?;
            Ok(serde_json::to_value(derived)?)
        }
        Command::ValidateAddress {
            network,
            chain_id,
            address,
        } => {
            let provider = provider(&config, network, chain_id)?;
            let valid = provider.validate_address(&address);
            let hex = if valid { provider.address_to_hex(&address).ok() } else { None };
            Ok(json!({ "address": address, "valid": valid, "hex": hex }))
        }
        Command::ConvertAddress { chain_id, address } => {
            let parsed = if address.starts_with("0x") || address.starts_with("0X") {
                ConfluxAddress::from_hex(&address, chain_id)?
            } else {
                conflux::address::decode(&address)?
            };
            Ok(json!({
                "hex": parsed.to_hex(),
                "base32": parsed.encode(),
                "verbose": parsed.encode_verbose(),
                "type": parsed.address_type().as_str(),
            }))
        }
        Command::CheckConfig { path } => {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config = CoreConfig::from_json(&contents)?;
            if config.networks.is_empty() {
                bail!("no networks configured");
            }
            let warnings = config.validate()?;
            Ok(json!({
                "valid": true,
                "networks": config.networks.len(),
                "warnings": warnings,
            }))
        }
    }
}
