//! Wallet record lookup
//!
//! The signing service reads accounts, addresses and vaults through
//! [`WalletStore`]; persistence itself lives outside this crate.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::CustodyResult;
use crate::types::{Account, AccountGroup, Address, Vault};

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn account(&self, id: &str) -> CustodyResult<Option<Account>>;

    async fn address(&self, id: &str) -> CustodyResult<Option<Address>>;

    /// Vault of the group the account belongs to
    async fn vault_for_account(&self, account: &Account) -> CustodyResult<Option<Vault>>;
}

#[derive(Default)]
struct Records {
    groups: HashMap<String, AccountGroup>,
    accounts: HashMap<String, Account>,
    addresses: HashMap<String, Address>,
    vaults: HashMap<String, Vault>,
}

/// `WalletStore` over in-process maps
#[derive(Default)]
pub struct MemoryWalletStore {
    records: RwLock<Records>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Records> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Records> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_group(&self, group: AccountGroup) {
        self.write().groups.insert(group.id.clone(), group);
    }

    pub fn insert_account(&self, account: Account) {
        self.write().accounts.insert(account.id.clone(), account);
    }

    pub fn insert_address(&self, address: Address) {
        self.write().addresses.insert(address.id.clone(), address);
    }

    pub fn insert_vault(&self, vault: Vault) {
        self.write().vaults.insert(vault.id.clone(), vault);
    }

    /// Addresses bound to an account
    pub fn addresses_of(&self, account_id: &str) -> Vec<Address> {
        self.read()
            .addresses
            .values()
            .filter(|a| a.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn account(&self, id: &str) -> CustodyResult<Option<Account>> {
        Ok(self.read().accounts.get(id).cloned())
    }

    async fn address(&self, id: &str) -> CustodyResult<Option<Address>> {
        Ok(self.read().addresses.get(id).cloned())
    }

    async fn vault_for_account(&self, account: &Account) -> CustodyResult<Option<Vault>> {
        let records = self.read();
        Ok(records
            .groups
            .get(&account.group_id)
            .and_then(|group| records.vaults.get(&group.vault_id))
            .cloned())
    }
}
