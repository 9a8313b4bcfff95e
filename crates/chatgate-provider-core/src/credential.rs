use std::marker::PhantomData;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::ProviderError;

const EXPIRING_SOON_MS: i64 = 30 * 60 * 1000;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credential store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credential record for `{provider}` is corrupt: {source}")]
    Corrupt {
        provider: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("credential record serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A provider's harvested session, as persisted by a [`CredentialStore`].
///
/// Everything except `captured_at` and `user_agent` is provider-specific and
/// kept as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    #[serde(default)]
    pub user_agent: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl CredentialRecord {
    pub fn new(user_agent: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            captured_at: OffsetDateTime::now_utc(),
            user_agent: user_agent.into(),
            payload,
        }
    }

    /// Builds a record from a manually entered JSON object. A missing
    /// `captured_at` is stamped with the current time.
    pub fn from_manual(mut value: Value) -> Result<Self, String> {
        let Some(object) = value.as_object_mut() else {
            return Err("credentials must be a JSON object".to_string());
        };
        if !object.contains_key("captured_at") {
            let now = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(|err| err.to_string())?;
            object.insert("captured_at".to_string(), Value::String(now));
        }
        serde_json::from_value(value).map_err(|err| err.to_string())
    }

    pub fn captured_at_rfc3339(&self) -> Option<String> {
        self.captured_at.format(&Rfc3339).ok()
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }
}

/// Key to JSON record persistence for credentials, one record per provider.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, provider: &str) -> Result<Option<CredentialRecord>, StoreError>;
    async fn save(&self, provider: &str, record: &CredentialRecord) -> Result<(), StoreError>;
    /// Returns whether a record existed.
    async fn clear(&self, provider: &str) -> Result<bool, StoreError>;
}

#[derive(Debug)]
pub struct LoadedCredential<T> {
    pub record: CredentialRecord,
    pub value: T,
}

/// Lazily loaded, atomically swapped credential of one provider.
///
/// `T` is the provider's typed view of the record payload.
pub struct CredentialSlot<T> {
    provider: &'static str,
    store: Arc<dyn CredentialStore>,
    current: ArcSwapOption<LoadedCredential<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CredentialSlot<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(provider: &'static str, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider,
            store,
            current: ArcSwapOption::empty(),
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    fn parse(&self, record: CredentialRecord) -> Result<LoadedCredential<T>, ProviderError> {
        let value = serde_json::from_value(Value::Object(record.payload.clone())).map_err(
            |err| ProviderError::InvalidCredentials {
                provider: self.provider.to_string(),
                message: err.to_string(),
            },
        )?;
        Ok(LoadedCredential { record, value })
    }

    pub async fn current(&self) -> Result<Option<Arc<LoadedCredential<T>>>, ProviderError> {
        if let Some(loaded) = self.current.load_full() {
            return Ok(Some(loaded));
        }
        let Some(record) = self.store.load(self.provider).await? else {
            return Ok(None);
        };
        let loaded = Arc::new(self.parse(record)?);
        self.current.store(Some(loaded.clone()));
        Ok(Some(loaded))
    }

    pub async fn require(&self) -> Result<Arc<LoadedCredential<T>>, ProviderError> {
        self.current()
            .await?
            .ok_or_else(|| ProviderError::NoCredentials {
                provider: self.provider.to_string(),
            })
    }

    /// Validates, persists and activates a full replacement record.
    pub async fn replace(
        &self,
        record: CredentialRecord,
    ) -> Result<Arc<LoadedCredential<T>>, ProviderError> {
        let loaded = Arc::new(self.parse(record)?);
        self.store.save(self.provider, &loaded.record).await?;
        self.current.store(Some(loaded.clone()));
        Ok(loaded)
    }

    /// Activates a record that has already been persisted elsewhere.
    pub fn adopt(&self, record: CredentialRecord) -> Result<(), ProviderError> {
        let loaded = Arc::new(self.parse(record)?);
        self.current.store(Some(loaded));
        Ok(())
    }

    pub async fn clear(&self) -> Result<bool, ProviderError> {
        self.current.store(None);
        Ok(self.store.clear(self.provider).await?)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryStatus {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiring_soon: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_ms: Option<i64>,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
pub fn jwt_expiry(token: &str, now: OffsetDateTime) -> ExpiryStatus {
    let token = token.strip_prefix("Bearer ").unwrap_or(token);
    let Some(payload) = token.split('.').nth(1) else {
        return ExpiryStatus::default();
    };
    let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return ExpiryStatus::default();
    };
    let Some(exp) = serde_json::from_slice::<Value>(&decoded)
        .ok()
        .and_then(|claims| claims.get("exp").and_then(Value::as_i64))
    else {
        return ExpiryStatus::default();
    };
    let Ok(expires_at) = OffsetDateTime::from_unix_timestamp(exp) else {
        return ExpiryStatus::default();
    };
    let remaining_ms = i64::try_from((expires_at - now).whole_milliseconds()).unwrap_or(0);
    ExpiryStatus {
        valid: remaining_ms > 0,
        expires_at: expires_at.format(&Rfc3339).ok(),
        expired: Some(remaining_ms <= 0),
        expiring_soon: Some(remaining_ms > 0 && remaining_ms < EXPIRING_SOON_MS),
        remaining_ms: Some(remaining_ms.max(0)),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct MapStore {
        records: Mutex<HashMap<String, CredentialRecord>>,
        loads: Mutex<usize>,
    }

    #[async_trait]
    impl CredentialStore for MapStore {
        async fn load(&self, provider: &str) -> Result<Option<CredentialRecord>, StoreError> {
            *self.loads.lock().unwrap() += 1;
            Ok(self.records.lock().unwrap().get(provider).cloned())
        }

        async fn save(&self, provider: &str, record: &CredentialRecord) -> Result<(), StoreError> {
            self.records
                .lock()
                .unwrap()
                .insert(provider.to_string(), record.clone());
            Ok(())
        }

        async fn clear(&self, provider: &str) -> Result<bool, StoreError> {
            Ok(self.records.lock().unwrap().remove(provider).is_some())
        }
    }

    #[derive(Debug, Deserialize)]
    struct Token {
        token: String,
    }

    fn jwt(claims: Value) -> String {
        let body = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("eyJhbGciOiJIUzI1NiJ9.{body}.sig")
    }

    #[test]
    fn record_flattens_payload() {
        let record = CredentialRecord::from_manual(json!({
            "captured_at": "2026-01-02T03:04:05Z",
            "user_agent": "UA",
            "token": "abc",
        }))
        .unwrap();
        assert_eq!(record.user_agent, "UA");
        assert_eq!(record.str_field("token"), Some("abc"));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["token"], "abc");
        assert_eq!(value["captured_at"], "2026-01-02T03:04:05Z");
    }

    #[test]
    fn manual_record_gets_timestamp() {
        let record = CredentialRecord::from_manual(json!({ "token": "x" })).unwrap();
        assert!(record.captured_at_rfc3339().is_some());
        assert!(CredentialRecord::from_manual(json!("nope")).is_err());
    }

    #[tokio::test]
    async fn slot_loads_once_and_clears() {
        let store = Arc::new(MapStore::default());
        let slot: CredentialSlot<Token> = CredentialSlot::new("qwen", store.clone());
        assert!(slot.current().await.unwrap().is_none());
        assert!(matches!(
            slot.require().await.unwrap_err(),
            ProviderError::NoCredentials { .. }
        ));

        let mut payload = Map::new();
        payload.insert("token".into(), json!("t1"));
        store
            .save("qwen", &CredentialRecord::new("UA", payload))
            .await
            .unwrap();
        assert_eq!(slot.require().await.unwrap().value.token, "t1");
        assert_eq!(slot.require().await.unwrap().value.token, "t1");
        assert_eq!(*store.loads.lock().unwrap(), 3);

        assert!(slot.clear().await.unwrap());
        assert!(slot.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn slot_rejects_payload_of_wrong_shape() {
        let store = Arc::new(MapStore::default());
        let slot: CredentialSlot<Token> = CredentialSlot::new("qwen", store.clone());
        let err = slot
            .replace(CredentialRecord::new("UA", Map::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidCredentials { .. }));
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[test]
    fn jwt_expiry_reports_remaining_time() {
        let now = OffsetDateTime::from_unix_timestamp(1_000_000).unwrap();
        let status = jwt_expiry(&jwt(json!({ "exp": 1_000_600 })), now);
        assert!(status.valid);
        assert_eq!(status.expired, Some(false));
        assert_eq!(status.expiring_soon, Some(true));
        assert_eq!(status.remaining_ms, Some(600_000));

        let status = jwt_expiry(&format!("Bearer {}", jwt(json!({ "exp": 999_000 }))), now);
        assert!(!status.valid);
        assert_eq!(status.expired, Some(true));
        assert_eq!(status.remaining_ms, Some(0));

        assert!(!jwt_expiry("opaque-token", now).valid);
    }
}
