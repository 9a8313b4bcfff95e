pub mod browser;
pub mod credential;
pub mod error;
pub mod event;
pub mod prompt;
pub mod provider;
pub mod registry;
pub mod session;
pub mod translate;

pub use browser::{
    BrowserCookie, BrowserEvent, BrowserPage, CaptureOutcome, ObservedTraffic, StatusCallback,
};
pub use credential::{
    CredentialRecord, CredentialSlot, CredentialStore, ExpiryStatus, LoadedCredential, StoreError,
    jwt_expiry,
};
pub use error::ProviderError;
pub use event::{FinishReason, StreamEvent};
pub use prompt::build_prompt;
pub use provider::{ByteStream, ChatInput, ModelInfo, Provider, SessionPolicy, mask_secret};
pub use registry::ProviderRegistry;
pub use session::{DEFAULT_SESSION_KEY, SessionMap};
pub use translate::{
    Classified, Collected, FramedTranslator, PayloadClassifier, StreamTranslator,
    TranslateOptions, collect,
};
