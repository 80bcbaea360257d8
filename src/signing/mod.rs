//! Signer Resolution
//!
//! Decides who produces a signature for an address: a key decrypted from a
//! software vault, or a hardware secure element. Also holds the per-address
//! locks the transaction pipeline uses.

pub mod lock;
pub mod service;
pub mod signer;
pub mod store;
pub mod vault;

pub use lock::{AddressGuard, AddressLocks};
pub use service::{AuthorizeReason, Authorizer, SigningService, StaticAuthorizer};
pub use signer::{HardwareSigner, SecureElement, Signer, SignerKind, SigningPayload, SoftwareSigner};
pub use store::{MemoryWalletStore, WalletStore};
pub use vault::{derivation_path, VaultKeyring};
