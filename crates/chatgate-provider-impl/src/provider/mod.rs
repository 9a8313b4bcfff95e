pub mod claude;
pub mod deepseek;
pub mod qwen;

pub use claude::ClaudeProvider;
pub use deepseek::DeepSeekProvider;
pub use qwen::QwenProvider;

use chatgate_provider_core::{ExpiryStatus, jwt_expiry};
use time::OffsetDateTime;

pub(crate) const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/145.0.0.0 Safari/537.36";

/// Per-provider upstream overrides.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub proxy: Option<String>,
}

impl ProviderSettings {
    pub(crate) fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

pub(crate) fn user_agent_or_default(user_agent: &str) -> &str {
    if user_agent.trim().is_empty() {
        DEFAULT_USER_AGENT
    } else {
        user_agent
    }
}

/// Expiry of an optional token. Tokens that are not JWTs are reported valid
/// with an unknown expiry.
pub(crate) fn token_expiry(token: Option<&str>) -> ExpiryStatus {
    let Some(token) = token.filter(|token| !token.is_empty()) else {
        return ExpiryStatus::default();
    };
    let status = jwt_expiry(token, OffsetDateTime::now_utc());
    if status.expires_at.is_none() {
        return ExpiryStatus {
            valid: true,
            ..ExpiryStatus::default()
        };
    }
    status
}

pub(crate) fn cookie_value<'a>(cookie: &'a str, name: &str) -> Option<&'a str> {
    cookie
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_value_finds_exact_name() {
        let cookie = "xtoken=1; token=abc.def; other=";
        assert_eq!(cookie_value(cookie, "token"), Some("abc.def"));
        assert_eq!(cookie_value(cookie, "other"), None);
        assert_eq!(cookie_value(cookie, "missing"), None);
    }

    #[test]
    fn opaque_tokens_have_unknown_expiry() {
        assert!(!token_expiry(None).valid);
        let status = token_expiry(Some("opaque"));
        assert!(status.valid);
        assert!(status.expires_at.is_none());
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let settings = ProviderSettings {
            base_url: Some("http://127.0.0.1:8080/".into()),
            proxy: None,
        };
        assert_eq!(settings.base_url_or("https://x"), "http://127.0.0.1:8080");
        assert_eq!(ProviderSettings::default().base_url_or("https://x/"), "https://x");
    }
}
