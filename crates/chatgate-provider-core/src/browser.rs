use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::credential::CredentialRecord;
use crate::error::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// A request or response seen on the page. Header names are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservedTraffic {
    pub url: String,
    pub status: Option<u16>,
    pub headers: HashMap<String, String>,
}

impl ObservedTraffic {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    Request(ObservedTraffic),
    Response(ObservedTraffic),
    Closed,
}

/// An external browser page the user logs in through.
#[async_trait]
pub trait BrowserPage: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ProviderError>;
    async fn user_agent(&mut self) -> Result<String, ProviderError>;
    /// Cookies visible to any of the given origins.
    async fn list_cookies(&mut self, urls: &[&str]) -> Result<Vec<BrowserCookie>, ProviderError>;
    /// Network and lifecycle events of the page. Called once per capture run.
    fn subscribe(&mut self) -> mpsc::Receiver<BrowserEvent>;
    async fn release(self: Box<Self>);
}

pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureOutcome {
    pub record: CredentialRecord,
    /// Set when the run finished without every signal it wanted.
    pub warning: Option<String>,
}
