use async_trait::async_trait;
use chatgate_provider_core::{CredentialRecord, CredentialStore, StoreError};
use dashmap::DashMap;

/// Process-local store, used when no data directory is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: DashMap<String, CredentialRecord>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, provider: &str) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.records.get(provider).map(|entry| entry.value().clone()))
    }

    async fn save(&self, provider: &str, record: &CredentialRecord) -> Result<(), StoreError> {
        self.records.insert(provider.to_string(), record.clone());
        Ok(())
    }

    async fn clear(&self, provider: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(provider).is_some())
    }
}
