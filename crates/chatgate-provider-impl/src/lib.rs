pub mod client;
pub mod pow;
pub mod provider;
pub mod registry;
pub mod upstream;

pub use pow::{PowChallenge, PowError, PowParams, PowSolver, PowStrategy};
pub use provider::{ClaudeProvider, DeepSeekProvider, ProviderSettings, QwenProvider};
pub use registry::{RegistrySettings, default_registry};
