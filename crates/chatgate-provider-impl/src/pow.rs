use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use chatgate_provider_core::ProviderError;

pub const SHA256_ALGORITHM: &str = "sha256";
pub const DEFAULT_MAX_ITERATIONS: u64 = 1_000_000;

#[derive(Debug, thiserror::Error)]
pub enum PowError {
    #[error("proof-of-work not solved within {iterations} iterations")]
    Timeout { iterations: u64 },
    #[error("unsupported proof-of-work algorithm `{0}`")]
    UnsupportedAlgorithm(String),
    #[error("proof-of-work solver failed: {0}")]
    Solver(String),
}

impl From<PowError> for ProviderError {
    fn from(err: PowError) -> Self {
        match err {
            PowError::Timeout { iterations } => ProviderError::PowTimeout { iterations },
            PowError::UnsupportedAlgorithm(algorithm) => {
                ProviderError::UnsupportedAlgorithm(algorithm)
            }
            PowError::Solver(message) => ProviderError::InvalidResponse(message),
        }
    }
}

/// A challenge as issued upstream. Unknown fields are kept so the encoded
/// response echoes them back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowChallenge {
    pub algorithm: String,
    pub challenge: String,
    pub salt: String,
    pub difficulty: u64,
    #[serde(default)]
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PowChallenge {
    /// Finds the challenge inside an upstream envelope. It may sit at
    /// `data.biz_data.challenge`, `data.challenge` or `challenge`, or the
    /// envelope body may itself be the challenge.
    pub fn from_response(body: &Value) -> Result<Self, ProviderError> {
        let nested = ["/data/biz_data/challenge", "/data/challenge", "/challenge"]
            .iter()
            .filter_map(|pointer| body.pointer(pointer))
            .find(|candidate| !candidate.is_null());
        let Some(nested) = nested else {
            return Err(ProviderError::InvalidResponse(
                "pow challenge missing from response".to_string(),
            ));
        };
        let challenge = if nested.get("algorithm").is_some() {
            nested
        } else {
            ["/data/biz_data", "/data"]
                .iter()
                .filter_map(|pointer| body.pointer(pointer))
                .find(|candidate| candidate.is_object())
                .unwrap_or(body)
        };
        serde_json::from_value(challenge.clone())
            .map_err(|err| ProviderError::InvalidResponse(format!("pow challenge: {err}")))
    }

    pub fn params(&self) -> PowParams<'_> {
        PowParams {
            challenge: &self.challenge,
            salt: &self.salt,
            expire_at: self.expire_at.unwrap_or(0),
            difficulty: self.difficulty,
        }
    }
}

/// Inputs handed to a solving strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowParams<'a> {
    pub challenge: &'a str,
    pub salt: &'a str,
    pub expire_at: i64,
    pub difficulty: u64,
}

pub trait PowStrategy: Send + Sync {
    fn solve(&self, params: &PowParams<'_>) -> Result<u64, PowError>;
}

impl<F> PowStrategy for F
where
    F: Fn(&PowParams<'_>) -> Result<u64, PowError> + Send + Sync,
{
    fn solve(&self, params: &PowParams<'_>) -> Result<u64, PowError> {
        self(params)
    }
}

/// Brute force over `sha256(salt ++ challenge ++ nonce)` until the digest has
/// enough leading zero bits.
#[derive(Debug, Clone, Copy)]
pub struct Sha256BruteForce {
    max_iterations: u64,
}

impl Default for Sha256BruteForce {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl Sha256BruteForce {
    pub fn with_max_iterations(max_iterations: u64) -> Self {
        Self { max_iterations }
    }
}

impl PowStrategy for Sha256BruteForce {
    fn solve(&self, params: &PowParams<'_>) -> Result<u64, PowError> {
        let target = target_bits(params.difficulty);
        let mut prefix = Sha256::new();
        prefix.update(params.salt.as_bytes());
        prefix.update(params.challenge.as_bytes());
        for nonce in 0..self.max_iterations {
            let mut hasher = prefix.clone();
            hasher.update(nonce.to_string().as_bytes());
            if leading_zero_bits(&hasher.finalize()) >= target {
                return Ok(nonce);
            }
        }
        Err(PowError::Timeout {
            iterations: self.max_iterations,
        })
    }
}

/// Difficulties above 1000 describe a search-space size rather than a bit
/// count.
pub fn target_bits(difficulty: u64) -> u32 {
    if difficulty > 1000 {
        u64::BITS - 1 - difficulty.leading_zeros()
    } else {
        u32::try_from(difficulty).unwrap_or(u32::MAX)
    }
}

pub fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
        } else {
            bits += byte.leading_zeros();
            break;
        }
    }
    bits
}

/// Strategies keyed by the challenge's `algorithm` tag.
#[derive(Clone)]
pub struct PowSolver {
    strategies: HashMap<String, Arc<dyn PowStrategy>>,
}

impl Default for PowSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl PowSolver {
    pub fn new() -> Self {
        Self::empty().with_strategy(SHA256_ALGORITHM, Arc::new(Sha256BruteForce::default()))
    }

    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    pub fn with_strategy(
        mut self,
        algorithm: impl Into<String>,
        strategy: Arc<dyn PowStrategy>,
    ) -> Self {
        self.strategies.insert(algorithm.into(), strategy);
        self
    }

    pub fn supports(&self, algorithm: &str) -> bool {
        self.strategies.contains_key(algorithm)
    }

    /// Solves on the blocking pool so the runtime keeps serving requests.
    pub async fn solve(&self, challenge: &PowChallenge) -> Result<u64, PowError> {
        let strategy = self
            .strategies
            .get(&challenge.algorithm)
            .cloned()
            .ok_or_else(|| PowError::UnsupportedAlgorithm(challenge.algorithm.clone()))?;
        let challenge = challenge.clone();
        tokio::task::spawn_blocking(move || strategy.solve(&challenge.params()))
            .await
            .map_err(|err| PowError::Solver(err.to_string()))?
    }

    /// Solves the challenge and encodes the header value proving it.
    pub async fn respond(
        &self,
        challenge: &PowChallenge,
        target_path: &str,
    ) -> Result<String, PowError> {
        let answer = self.solve(challenge).await?;
        encode_response(challenge, answer, target_path)
    }
}

/// `base64(json({...challenge, answer, target_path}))`
pub fn encode_response(
    challenge: &PowChallenge,
    answer: u64,
    target_path: &str,
) -> Result<String, PowError> {
    let mut fields = match serde_json::to_value(challenge) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => return Err(PowError::Solver("challenge is not an object".to_string())),
        Err(err) => return Err(PowError::Solver(err.to_string())),
    };
    fields.insert("answer".to_string(), Value::from(answer));
    fields.insert(
        "target_path".to_string(),
        Value::String(target_path.to_string()),
    );
    let json = serde_json::to_vec(&fields).map_err(|err| PowError::Solver(err.to_string()))?;
    Ok(STANDARD.encode(json))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn challenge(algorithm: &str, difficulty: u64) -> PowChallenge {
        serde_json::from_value(json!({
            "algorithm": algorithm,
            "challenge": "5f1e8a",
            "salt": "b0c4",
            "difficulty": difficulty,
            "signature": "sig",
            "expire_at": 1_700_000_000_i64,
            "target_path": "/api/v0/chat/completion",
            "expire_after": 30000
        }))
        .unwrap()
    }

    fn digest_for(challenge: &PowChallenge, nonce: u64) -> Vec<u8> {
        let input = format!("{}{}{}", challenge.salt, challenge.challenge, nonce);
        Sha256::digest(input.as_bytes()).to_vec()
    }

    #[test]
    fn normalizes_large_difficulty_to_log2() {
        assert_eq!(target_bits(8), 8);
        assert_eq!(target_bits(1000), 1000);
        assert_eq!(target_bits(1024), 10);
        assert_eq!(target_bits(144_000), 17);
    }

    #[test]
    fn counts_leading_zero_bits() {
        assert_eq!(leading_zero_bits(&[0x00, 0x00, 0x80]), 16);
        assert_eq!(leading_zero_bits(&[0x0f]), 4);
        assert_eq!(leading_zero_bits(&[0x00, 0x01]), 15);
    }

    #[tokio::test]
    async fn brute_force_answer_meets_target() {
        let solver = PowSolver::new();
        for difficulty in [4, 8, 12, 4096] {
            let challenge = challenge(SHA256_ALGORITHM, difficulty);
            let answer = solver.solve(&challenge).await.unwrap();
            let digest = digest_for(&challenge, answer);
            assert!(leading_zero_bits(&digest) >= target_bits(difficulty));
            if answer > 0 {
                let previous = digest_for(&challenge, answer - 1);
                assert!(leading_zero_bits(&previous) < target_bits(difficulty));
            }
        }
    }

    #[test]
    fn unreachable_target_times_out() {
        let strategy = Sha256BruteForce::with_max_iterations(500);
        let challenge = challenge(SHA256_ALGORITHM, 200);
        let err = strategy.solve(&challenge.params()).unwrap_err();
        assert!(matches!(err, PowError::Timeout { iterations: 500 }));
    }

    #[tokio::test]
    async fn unknown_algorithm_is_rejected() {
        let err = PowSolver::new()
            .solve(&challenge("DeepSeekHashV1", 8))
            .await
            .unwrap_err();
        assert!(matches!(err, PowError::UnsupportedAlgorithm(ref name) if name == "DeepSeekHashV1"));
        let mapped: ProviderError = err.into();
        assert!(matches!(mapped, ProviderError::UnsupportedAlgorithm(_)));
    }

    #[tokio::test]
    async fn external_strategy_receives_challenge_tuple() {
        fn wasm_stand_in(params: &PowParams<'_>) -> Result<u64, PowError> {
            assert_eq!(params.challenge, "5f1e8a");
            assert_eq!(params.salt, "b0c4");
            assert_eq!(params.expire_at, 1_700_000_000);
            assert_eq!(params.difficulty, 144_000);
            Ok(42)
        }
        let solver = PowSolver::new().with_strategy("DeepSeekHashV1", Arc::new(wasm_stand_in));
        assert!(solver.supports("DeepSeekHashV1"));
        let answer = solver
            .solve(&challenge("DeepSeekHashV1", 144_000))
            .await
            .unwrap();
        assert_eq!(answer, 42);
    }

    #[test]
    fn encoded_response_preserves_every_field() {
        let challenge = challenge(SHA256_ALGORITHM, 8);
        let encoded = encode_response(&challenge, 7, "/api/v0/chat/completion").unwrap();
        let decoded: Value = serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(
            decoded,
            json!({
                "algorithm": "sha256",
                "challenge": "5f1e8a",
                "salt": "b0c4",
                "difficulty": 8,
                "signature": "sig",
                "expire_at": 1_700_000_000_i64,
                "expire_after": 30000,
                "target_path": "/api/v0/chat/completion",
                "answer": 7
            })
        );
    }

    #[test]
    fn challenge_is_found_in_every_envelope_shape() {
        let inner = json!({
            "algorithm": "sha256", "challenge": "c", "salt": "s",
            "difficulty": 4, "signature": "x"
        });
        let shapes = [
            json!({ "code": 0, "data": { "biz_data": { "challenge": inner.clone() } } }),
            json!({ "data": { "challenge": inner.clone() } }),
            json!({ "challenge": inner.clone() }),
        ];
        for shape in shapes {
            let parsed = PowChallenge::from_response(&shape).unwrap();
            assert_eq!(parsed.challenge, "c");
            assert_eq!(parsed.difficulty, 4);
        }

        let flat = json!({
            "data": { "biz_data": {
                "algorithm": "sha256", "challenge": "flat", "salt": "s", "difficulty": 4
            } }
        });
        assert_eq!(PowChallenge::from_response(&flat).unwrap().challenge, "flat");
        assert!(PowChallenge::from_response(&json!({ "data": {} })).is_err());
    }
}
