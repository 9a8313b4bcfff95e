use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Character-based estimate: roughly 1.5 prompt characters per token.
pub fn estimate_prompt_tokens(chars: usize) -> u64 {
    (chars as f64 / 1.5).ceil() as u64
}

/// Character-based estimate: roughly 2 output characters per token.
pub fn estimate_completion_tokens(chars: usize) -> u64 {
    chars.div_ceil(2) as u64
}

#[derive(Debug, Default)]
pub struct UsageStats {
    requests: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl UsageStats {
    pub fn record_request(&self, prompt_tokens: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.input_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
    }

    pub fn record_output(&self, completion_tokens: u64) {
        self.output_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let input_tokens = self.input_tokens.load(Ordering::Relaxed);
        let output_tokens = self.output_tokens.load(Ordering::Relaxed);
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}
