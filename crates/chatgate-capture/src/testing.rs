//! Scripted stand-in for a browser page, driven from tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatgate_provider_core::{
    BrowserCookie, BrowserEvent, BrowserPage, ObservedTraffic, ProviderError,
};
use tokio::sync::mpsc;

#[derive(Default)]
struct Shared {
    cookies: Mutex<Vec<BrowserCookie>>,
    navigated: Mutex<Vec<String>>,
    released: AtomicBool,
}

pub struct ScriptedPage {
    user_agent: String,
    events: Option<mpsc::Receiver<BrowserEvent>>,
    shared: Arc<Shared>,
}

#[derive(Clone)]
pub struct PageHandle {
    events: mpsc::Sender<BrowserEvent>,
    shared: Arc<Shared>,
}

pub fn scripted_page(user_agent: &str) -> (Box<dyn BrowserPage>, PageHandle) {
    let (tx, rx) = mpsc::channel(64);
    let shared = Arc::new(Shared::default());
    let page = ScriptedPage {
        user_agent: user_agent.to_string(),
        events: Some(rx),
        shared: shared.clone(),
    };
    (Box::new(page), PageHandle { events: tx, shared })
}

fn traffic(url: &str, status: Option<u16>, headers: &[(&str, &str)]) -> ObservedTraffic {
    ObservedTraffic {
        url: url.to_string(),
        status,
        headers: headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

impl PageHandle {
    pub fn set_cookie(&self, name: &str, value: &str, domain: &str) {
        let mut cookies = self.shared.cookies.lock().unwrap_or_else(|e| e.into_inner());
        cookies.retain(|cookie| cookie.name != name);
        cookies.push(BrowserCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.to_string(),
        });
    }

    pub async fn request(&self, url: &str, headers: &[(&str, &str)]) {
        let _ = self
            .events
            .send(BrowserEvent::Request(traffic(url, None, headers)))
            .await;
    }

    pub async fn response(&self, url: &str, status: u16, headers: &[(&str, &str)]) {
        let _ = self
            .events
            .send(BrowserEvent::Response(traffic(url, Some(status), headers)))
            .await;
    }

    pub async fn close(&self) {
        let _ = self.events.send(BrowserEvent::Closed).await;
    }

    pub fn released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    pub fn navigated(&self) -> Vec<String> {
        self.shared
            .navigated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl BrowserPage for ScriptedPage {
    async fn navigate(&mut self, url: &str) -> Result<(), ProviderError> {
        self.shared
            .navigated
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());
        Ok(())
    }

    async fn user_agent(&mut self) -> Result<String, ProviderError> {
        Ok(self.user_agent.clone())
    }

    async fn list_cookies(&mut self, _urls: &[&str]) -> Result<Vec<BrowserCookie>, ProviderError> {
        Ok(self
            .shared
            .cookies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn subscribe(&mut self) -> mpsc::Receiver<BrowserEvent> {
        self.events.take().unwrap_or_else(|| mpsc::channel(1).1)
    }

    async fn release(self: Box<Self>) {
        self.shared.released.store(true, Ordering::SeqCst);
    }
}
