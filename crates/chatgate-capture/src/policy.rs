use std::time::Duration;

use chatgate_provider_core::{BrowserCookie, ObservedTraffic};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Waiting,
    /// The minimum signals are present; the rest may still arrive.
    Partial,
    Ready,
}

/// Per-vendor rules for what a captured session consists of.
///
/// Slots only ever fill up, so readiness never moves backwards.
pub trait CapturePolicy: Send {
    fn provider(&self) -> &'static str;

    /// Chat page the browser is sent to.
    fn start_url(&self) -> &'static str;

    /// Origins whose cookies belong to the session.
    fn cookie_urls(&self) -> &'static [&'static str];

    fn observe_request(&mut self, _request: &ObservedTraffic) {}

    fn observe_response(&mut self, _response: &ObservedTraffic) {}

    fn observe_cookies(&mut self, cookies: &[BrowserCookie]);

    fn readiness(&self) -> Readiness;

    /// How long a partial capture waits for the remaining signals before it
    /// completes anyway. `None` keeps waiting until the deadline.
    fn grace_period(&self) -> Option<Duration> {
        None
    }

    fn partial_warning(&self) -> String {
        format!("{} credentials captured without every expected signal", self.provider())
    }

    /// The provider-specific part of the credential record.
    fn payload(&self) -> Map<String, Value>;
}

pub fn cookie_header(cookies: &[BrowserCookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn find_cookie<'a>(cookies: &'a [BrowserCookie], name: &str) -> Option<&'a str> {
    cookies
        .iter()
        .find(|cookie| cookie.name == name && !cookie.value.is_empty())
        .map(|cookie| cookie.value.as_str())
}
