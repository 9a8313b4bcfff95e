mod engine;
mod policy;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{CaptureConfig, CaptureError, CaptureLock, CaptureState, run_capture};
pub use policy::{CapturePolicy, Readiness, cookie_header, find_cookie};
