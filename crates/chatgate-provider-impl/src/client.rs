use std::sync::OnceLock;
use std::time::Duration;

use dashmap::DashMap;

use chatgate_provider_core::ProviderError;

static CLIENTS: OnceLock<DashMap<String, wreq::Client>> = OnceLock::new();

/// One pooled upstream client per proxy setting.
pub fn shared_client(proxy: Option<&str>) -> Result<wreq::Client, ProviderError> {
    let proxy = proxy.map(str::trim).filter(|proxy| !proxy.is_empty());
    let key = proxy.unwrap_or_default().to_string();
    let clients = CLIENTS.get_or_init(DashMap::new);
    if let Some(client) = clients.get(&key) {
        return Ok(client.clone());
    }

    let mut builder = wreq::Client::builder().connect_timeout(Duration::from_secs(30));
    if let Some(proxy) = proxy {
        let proxy = wreq::Proxy::all(proxy)
            .map_err(|err| ProviderError::Network(format!("invalid proxy: {err}")))?;
        builder = builder.proxy(proxy);
    }
    let client = builder
        .build()
        .map_err(|err| ProviderError::Network(err.to_string()))?;
    clients.insert(key, client.clone());
    Ok(client)
}
