use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chatgate_provider_core::{CredentialRecord, CredentialStore, StoreError};
use tracing::debug;

/// One `<provider>.json` file per provider under a data directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, provider: &str) -> PathBuf {
        let name: String = provider
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, provider: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let path = self.path_for(provider);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
            provider: provider.to_string(),
            source,
        })?;
        Ok(Some(record))
    }

    async fn save(&self, provider: &str, record: &CredentialRecord) -> Result<(), StoreError> {
        let path = self.path_for(provider);
        let raw = serde_json::to_vec_pretty(record).map_err(StoreError::Serialize)?;
        // atomic replace
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(provider = %provider, path = %path.display(), "credential record saved");
        Ok(())
    }

    async fn clear(&self, provider: &str) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(self.path_for(provider)).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}
