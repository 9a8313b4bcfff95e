use std::time::Duration;

use chatgate_provider_core::{
    BrowserEvent, BrowserPage, CaptureOutcome, CredentialRecord, CredentialStore, ProviderError,
    StatusCallback, StoreError,
};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{Instant, MissedTickBehavior, sleep_until};
use tracing::{info, warn};

use crate::policy::{CapturePolicy, Readiness};

pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("credential capture timed out")]
    Timeout,
    #[error("browser page closed before capture finished")]
    Aborted,
    #[error("a credential capture for `{provider}` is already running")]
    InProgress { provider: String },
    #[error("browser error: {0}")]
    Browser(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CaptureError> for ProviderError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::Timeout => ProviderError::CaptureTimeout,
            CaptureError::Aborted => ProviderError::CaptureAborted,
            CaptureError::InProgress { provider } => ProviderError::CaptureInProgress { provider },
            CaptureError::Browser(message) => ProviderError::Browser(message),
            CaptureError::Store(err) => ProviderError::Store(err),
        }
    }
}

fn browser_error(err: ProviderError) -> CaptureError {
    match err {
        ProviderError::Browser(message) => CaptureError::Browser(message),
        other => CaptureError::Browser(other.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Connecting,
    WaitingForSignals,
    Completing,
    Done,
    TimedOut,
    Aborted,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CAPTURE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Allows a single capture run per provider at a time.
#[derive(Debug, Default)]
pub struct CaptureLock {
    running: Mutex<()>,
}

impl CaptureLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self, provider: &str) -> Result<MutexGuard<'_, ()>, CaptureError> {
        self.running
            .try_lock()
            .map_err(|_| CaptureError::InProgress {
                provider: provider.to_string(),
            })
    }
}

struct Reporter<'a> {
    provider: &'static str,
    callback: Option<&'a StatusCallback>,
}

impl Reporter<'_> {
    fn report(&self, state: CaptureState, message: &str) {
        info!(
            event = "credential_capture",
            provider = %self.provider,
            state = ?state,
            "{message}"
        );
        if let Some(callback) = self.callback {
            callback(message);
        }
    }
}

/// Runs one capture to completion and releases the page whatever the
/// outcome. On success the record has already been saved to `store`.
pub async fn run_capture<P: CapturePolicy>(
    mut policy: P,
    mut page: Box<dyn BrowserPage>,
    store: &dyn CredentialStore,
    status: Option<StatusCallback>,
    config: CaptureConfig,
) -> Result<CaptureOutcome, CaptureError> {
    let reporter = Reporter {
        provider: policy.provider(),
        callback: status.as_ref(),
    };
    let result = drive(&mut policy, page.as_mut(), store, &reporter, config).await;
    page.release().await;
    result
}

async fn drive<P: CapturePolicy>(
    policy: &mut P,
    page: &mut dyn BrowserPage,
    store: &dyn CredentialStore,
    reporter: &Reporter<'_>,
    config: CaptureConfig,
) -> Result<CaptureOutcome, CaptureError> {
    reporter.report(CaptureState::Connecting, "opening login page");
    let mut events = page.subscribe();
    page.navigate(policy.start_url())
        .await
        .map_err(browser_error)?;
    let user_agent = page.user_agent().await.map_err(browser_error)?;

    reporter.report(
        CaptureState::WaitingForSignals,
        "waiting for login, send a message in the chat to finish",
    );
    let deadline = Instant::now() + config.timeout;
    let mut poll = tokio::time::interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut grace_until: Option<Instant> = None;

    let warning = loop {
        match policy.readiness() {
            Readiness::Ready => break None,
            Readiness::Partial if grace_until.is_none() => {
                if let Some(grace) = policy.grace_period() {
                    grace_until = Some(Instant::now() + grace);
                    reporter.report(
                        CaptureState::WaitingForSignals,
                        "session found, waiting briefly for signature headers",
                    );
                }
            }
            _ => {}
        }

        let grace = async {
            match grace_until {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = sleep_until(deadline) => {
                reporter.report(CaptureState::TimedOut, "capture timed out");
                return Err(CaptureError::Timeout);
            }
            _ = grace => {
                let warning = policy.partial_warning();
                warn!(provider = %policy.provider(), "{warning}");
                break Some(warning);
            }
            event = events.recv() => {
                match event {
                    Some(BrowserEvent::Request(request)) => policy.observe_request(&request),
                    Some(BrowserEvent::Response(response)) => policy.observe_response(&response),
                    Some(BrowserEvent::Closed) | None => {
                        reporter.report(CaptureState::Aborted, "browser page closed");
                        return Err(CaptureError::Aborted);
                    }
                }
                let cookies = page
                    .list_cookies(policy.cookie_urls())
                    .await
                    .map_err(browser_error)?;
                policy.observe_cookies(&cookies);
            }
            _ = poll.tick() => {
                let cookies = page
                    .list_cookies(policy.cookie_urls())
                    .await
                    .map_err(browser_error)?;
                policy.observe_cookies(&cookies);
            }
        }
    };

    reporter.report(CaptureState::Completing, "saving credentials");
    let record = CredentialRecord::new(user_agent, policy.payload());
    store.save(policy.provider(), &record).await?;
    reporter.report(CaptureState::Done, "credentials captured");
    Ok(CaptureOutcome { record, warning })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use chatgate_provider_core::{BrowserCookie, ObservedTraffic};
    use chatgate_storage::MemoryCredentialStore;
    use serde_json::{Map, Value, json};

    use super::*;
    use crate::policy::find_cookie;
    use crate::testing::scripted_page;

    /// Needs a `sid` cookie and an `authorization` request header; `sid`
    /// alone is partial.
    #[derive(Default)]
    struct TwoSlotPolicy {
        sid: Option<String>,
        auth: Option<String>,
        grace: Option<Duration>,
    }

    impl CapturePolicy for TwoSlotPolicy {
        fn provider(&self) -> &'static str {
            "vendor-a"
        }

        fn start_url(&self) -> &'static str {
            "https://vendor-a.test/chat"
        }

        fn cookie_urls(&self) -> &'static [&'static str] {
            &["https://vendor-a.test"]
        }

        fn observe_request(&mut self, request: &ObservedTraffic) {
            if let Some(auth) = request.header("authorization") {
                self.auth = Some(auth.to_string());
            }
        }

        fn observe_cookies(&mut self, cookies: &[BrowserCookie]) {
            if let Some(sid) = find_cookie(cookies, "sid") {
                self.sid = Some(sid.to_string());
            }
        }

        fn readiness(&self) -> Readiness {
            match (&self.sid, &self.auth) {
                (Some(_), Some(_)) => Readiness::Ready,
                (Some(_), None) => Readiness::Partial,
                _ => Readiness::Waiting,
            }
        }

        fn grace_period(&self) -> Option<Duration> {
            self.grace
        }

        fn payload(&self) -> Map<String, Value> {
            let mut payload = Map::new();
            payload.insert("sid".into(), json!(self.sid));
            payload.insert("auth".into(), json!(self.auth));
            payload
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completes_under_either_signal_order() {
        for cookie_first in [true, false] {
            let store = MemoryCredentialStore::new();
            let (page, handle) = scripted_page("UA/1");
            let driver = async {
                if cookie_first {
                    handle.set_cookie("sid", "s1", "vendor-a.test");
                    handle.request("https://vendor-a.test/x", &[]).await;
                    handle
                        .request("https://vendor-a.test/api", &[("authorization", "Bearer t")])
                        .await;
                } else {
                    handle
                        .request("https://vendor-a.test/api", &[("authorization", "Bearer t")])
                        .await;
                    handle.set_cookie("sid", "s1", "vendor-a.test");
                }
            };
            let (outcome, ()) = tokio::join!(
                run_capture(
                    TwoSlotPolicy::default(),
                    page,
                    &store,
                    None,
                    CaptureConfig::default()
                ),
                driver
            );
            let outcome = outcome.unwrap();
            assert_eq!(outcome.warning, None);
            assert_eq!(outcome.record.user_agent, "UA/1");
            assert_eq!(outcome.record.payload["sid"], "s1");
            assert_eq!(outcome.record.payload["auth"], "Bearer t");
            assert!(store.load("vendor-a").await.unwrap().is_some());
            assert!(handle.released());
            assert_eq!(handle.navigated(), vec!["https://vendor-a.test/chat".to_string()]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_signals_times_out() {
        let store = MemoryCredentialStore::new();
        let (page, handle) = scripted_page("UA/1");
        let started = Instant::now();
        let err = run_capture(
            TwoSlotPolicy::default(),
            page,
            &store,
            None,
            CaptureConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CaptureError::Timeout));
        assert!(started.elapsed() >= DEFAULT_CAPTURE_TIMEOUT);
        assert!(handle.released());
        assert!(store.load("vendor-a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn partial_signals_complete_after_grace() {
        let store = MemoryCredentialStore::new();
        let (page, handle) = scripted_page("UA/1");
        handle.set_cookie("sid", "s1", "vendor-a.test");
        let messages = Arc::new(StdMutex::new(Vec::<String>::new()));
        let sink = messages.clone();
        let status: StatusCallback = Arc::new(move |message: &str| {
            sink.lock().unwrap().push(message.to_string());
        });
        let policy = TwoSlotPolicy {
            grace: Some(Duration::from_secs(15)),
            ..Default::default()
        };
        let started = Instant::now();
        let outcome = run_capture(policy, page, &store, Some(status), CaptureConfig::default())
            .await
            .unwrap();
        assert!(outcome.warning.is_some());
        assert_eq!(outcome.record.payload["auth"], Value::Null);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(20));
        let messages = messages.lock().unwrap();
        assert_eq!(messages.first().map(String::as_str), Some("opening login page"));
        assert_eq!(messages.last().map(String::as_str), Some("credentials captured"));
    }

    #[tokio::test(start_paused = true)]
    async fn page_close_aborts() {
        let store = MemoryCredentialStore::new();
        let (page, handle) = scripted_page("UA/1");
        let (result, ()) = tokio::join!(
            run_capture(
                TwoSlotPolicy::default(),
                page,
                &store,
                None,
                CaptureConfig::default()
            ),
            handle.close()
        );
        assert!(matches!(result.unwrap_err(), CaptureError::Aborted));
        assert!(handle.released());
    }

    #[test]
    fn second_run_is_rejected_while_first_holds_the_lock() {
        let lock = CaptureLock::new();
        let guard = lock.try_begin("vendor-a").unwrap();
        let err = lock.try_begin("vendor-a").unwrap_err();
        assert!(matches!(err, CaptureError::InProgress { .. }));
        drop(guard);
        assert!(lock.try_begin("vendor-a").is_ok());
        let mapped: ProviderError = CaptureError::Timeout.into();
        assert!(matches!(mapped, ProviderError::CaptureTimeout));
    }
}
