//! Crash point generation.
//!
//! Every round draws a fresh crash point from a cryptographically secure
//! entropy source. Two algorithms are supported:
//!
//! - **Inverse**: draw `r` uniform in `[0, 1)` and map it through `1 / (1 - r)`.
//! - **HashCommit**: draw a server seed and a client seed, hash them together,
//!   and map a 52-bit prefix of the digest through
//!   `floor((100 * 2^52 - h) / (2^52 - h)) / 100`.
//!
//! ## Commit-Reveal Flow (HashCommit)
//!
//! 1. **Commit** - `sha256(server_seed)` is published while the round is waiting
//! 2. **Reveal** - both seeds are disclosed once the round has crashed
//! 3. **Verify** - anyone can check the commitment and recompute the crash point
//!    with [`verify_crash_point`]
//!
//! ## Shaping
//!
//! Both algorithms pass through the same shaping step: most rounds are clamped
//! into `[1.01, soft_cap]`, and a `tail_probability` share into
//! `[soft_cap + 0.01, max_crash_point]`. The result is rounded to two decimals.

use std::fmt;
use std::str::FromStr;

use commonware_cryptography::sha256::Sha256;
use commonware_cryptography::Hasher;
use liftoff_types::{round2, FairnessReveal};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Length of server and client seeds in bytes.
pub const SEED_LEN: usize = 32;

/// Lowest crash point a round may have.
pub const MIN_CRASH_POINT: f64 = 1.01;

/// `2^52`, the range of the digest prefix used by the hash mapping.
const HASH_RANGE: u64 = 1 << 52;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessAlgorithm {
    Inverse,
    HashCommit,
}

impl FromStr for FairnessAlgorithm {
    type Err = &'static str;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "inverse" => Ok(Self::Inverse),
            "hash_commit" | "hash-commit" => Ok(Self::HashCommit),
            _ => Err("valid values: inverse, hash_commit"),
        }
    }
}

/// Game-economics knobs for the crash point distribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    pub algorithm: FairnessAlgorithm,
    /// Upper bound of the common case.
    pub soft_cap: f64,
    /// Absolute upper bound.
    pub max_crash_point: f64,
    /// Share of rounds allowed past `soft_cap`.
    pub tail_probability: f64,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            algorithm: FairnessAlgorithm::HashCommit,
            soft_cap: 10.0,
            max_crash_point: 50.0,
            tail_probability: 0.05,
        }
    }
}

impl FairnessConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.soft_cap.is_finite() || self.soft_cap < MIN_CRASH_POINT {
            return Err("soft_cap must be at least 1.01");
        }
        if !self.max_crash_point.is_finite() || self.max_crash_point <= self.soft_cap {
            return Err("max_crash_point must be greater than soft_cap");
        }
        if !(0.0..=1.0).contains(&self.tail_probability) {
            return Err("tail_probability must be within [0, 1]");
        }
        Ok(())
    }

    /// Clamp a raw draw into the body or tail band and round it.
    ///
    /// `unit` is an independent uniform value in `[0, 1)` deciding the band.
    fn shape(&self, raw: f64, unit: f64) -> f64 {
        let (low, high) = if unit < 1.0 - self.tail_probability {
            (MIN_CRASH_POINT, self.soft_cap)
        } else {
            (self.soft_cap + 0.01, self.max_crash_point)
        };
        let raw = if raw.is_finite() { raw } else { high };
        round2(raw.max(low).min(high))
    }
}

#[derive(Debug, ThisError)]
pub enum FairnessError {
    #[error("entropy source unavailable: {0}")]
    Entropy(#[from] rand::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum VerifyError {
    #[error("{field} is not valid hex")]
    InvalidHex { field: &'static str },
    #[error("{field} has invalid length: {len} (expected 32)")]
    InvalidLength { field: &'static str, len: usize },
    #[error("server seed does not match commitment")]
    CommitmentMismatch,
}

/// One round's draw.
///
/// The crash point stays inside the engine until the round crashes. `Debug`
/// output is redacted so it cannot leak through logs.
#[derive(Clone)]
pub struct CrashDraw {
    crash_point: f64,
    seeds: Option<Seeds>,
}

#[derive(Clone)]
struct Seeds {
    server: [u8; SEED_LEN],
    client: [u8; SEED_LEN],
    commitment: [u8; SEED_LEN],
}

impl CrashDraw {
    /// A draw with a known crash point and no commitment.
    #[cfg(any(test, feature = "mocks"))]
    pub fn fixed(crash_point: f64) -> Self {
        Self {
            crash_point,
            seeds: None,
        }
    }

    pub fn crash_point(&self) -> f64 {
        self.crash_point
    }

    /// Hex commitment safe to publish before the round runs.
    pub fn commitment(&self) -> Option<String> {
        self.seeds.as_ref().map(|seeds| hex::encode(seeds.commitment))
    }

    /// Seeds to publish once the round has crashed.
    pub fn reveal(&self) -> Option<FairnessReveal> {
        self.seeds.as_ref().map(|seeds| FairnessReveal {
            server_seed: hex::encode(seeds.server),
            client_seed: hex::encode(seeds.client),
            commitment: hex::encode(seeds.commitment),
        })
    }
}

impl fmt::Debug for CrashDraw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrashDraw")
            .field("crash_point", &"<redacted>")
            .field("commitment", &self.commitment())
            .finish()
    }
}

/// Draws crash points from a secure RNG.
pub struct FairnessGenerator<R = OsRng> {
    config: FairnessConfig,
    rng: R,
}

impl FairnessGenerator<OsRng> {
    pub fn new(config: FairnessConfig) -> Self {
        Self::with_rng(config, OsRng)
    }
}

impl<R: RngCore + CryptoRng> FairnessGenerator<R> {
    pub fn with_rng(config: FairnessConfig, rng: R) -> Self {
        Self { config, rng }
    }

    pub fn config(&self) -> &FairnessConfig {
        &self.config
    }

    /// Draw the crash point for a new round.
    pub fn generate(&mut self) -> Result<CrashDraw, FairnessError> {
        match self.config.algorithm {
            FairnessAlgorithm::Inverse => {
                let r = self.draw_unit()?;
                let band = self.draw_unit()?;
                let raw = 1.0 / (1.0 - r);
                Ok(CrashDraw {
                    crash_point: self.config.shape(raw, band),
                    seeds: None,
                })
            }
            FairnessAlgorithm::HashCommit => {
                let mut server = [0u8; SEED_LEN];
                let mut client = [0u8; SEED_LEN];
                self.rng.try_fill_bytes(&mut server)?;
                self.rng.try_fill_bytes(&mut client)?;
                Ok(CrashDraw {
                    crash_point: crash_point_from_seeds(&server, &client, &self.config),
                    seeds: Some(Seeds {
                        server,
                        client,
                        commitment: compute_commitment(&server),
                    }),
                })
            }
        }
    }

    /// Uniform value in `[0, 1)` from four secure bytes.
    fn draw_unit(&mut self) -> Result<f64, FairnessError> {
        let mut buf = [0u8; 4];
        self.rng.try_fill_bytes(&mut buf)?;
        Ok(u32::from_be_bytes(buf) as f64 / 4_294_967_296.0)
    }
}

/// Anything that can hand the engine one fresh draw per round.
pub trait DrawSource: Send {
    fn draw(&mut self) -> Result<CrashDraw, FairnessError>;
}

impl<R: RngCore + CryptoRng + Send> DrawSource for FairnessGenerator<R> {
    fn draw(&mut self) -> Result<CrashDraw, FairnessError> {
        self.generate()
    }
}

/// `sha256(server_seed)`.
pub fn compute_commitment(server_seed: &[u8; SEED_LEN]) -> [u8; SEED_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.finalize().0
}

/// Deterministic crash point for a pair of seeds.
pub fn crash_point_from_seeds(
    server_seed: &[u8; SEED_LEN],
    client_seed: &[u8; SEED_LEN],
    config: &FairnessConfig,
) -> f64 {
    let digest = keyed_digest(server_seed, client_seed);

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let h = u64::from_be_bytes(prefix) >> 12;
    let cents = (100 * HASH_RANGE - h) / (HASH_RANGE - h);
    let raw = cents as f64 / 100.0;

    let mut band = [0u8; 8];
    band.copy_from_slice(&digest[8..16]);
    let unit = u64::from_be_bytes(band) as f64 / 18_446_744_073_709_551_616.0;

    config.shape(raw, unit)
}

/// Server seed keys the hash over the client seed.
fn keyed_digest(server_seed: &[u8; SEED_LEN], client_seed: &[u8; SEED_LEN]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(server_seed);
    hasher.update(client_seed);
    hasher.update(b"crash_point"); // Domain separator
    hasher.finalize().0
}

/// Recompute a crash point from a published reveal.
pub fn verify_crash_point(
    reveal: &FairnessReveal,
    config: &FairnessConfig,
) -> Result<f64, VerifyError> {
    let server = decode_seed("server_seed", &reveal.server_seed)?;
    let client = decode_seed("client_seed", &reveal.client_seed)?;
    let commitment = decode_seed("commitment", &reveal.commitment)?;
    if compute_commitment(&server) != commitment {
        return Err(VerifyError::CommitmentMismatch);
    }
    Ok(crash_point_from_seeds(&server, &client, config))
}

fn decode_seed(field: &'static str, value: &str) -> Result<[u8; SEED_LEN], VerifyError> {
    let bytes = hex::decode(value).map_err(|_| VerifyError::InvalidHex { field })?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| VerifyError::InvalidLength { field, len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn inverse_config() -> FairnessConfig {
        FairnessConfig {
            algorithm: FairnessAlgorithm::Inverse,
            ..FairnessConfig::default()
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(FairnessConfig::default().validate().is_ok());

        let low_cap = FairnessConfig { soft_cap: 1.0, ..FairnessConfig::default() };
        assert!(low_cap.validate().is_err());

        let inverted = FairnessConfig { max_crash_point: 5.0, ..FairnessConfig::default() };
        assert!(inverted.validate().is_err());

        let bad_tail = FairnessConfig { tail_probability: 1.5, ..FairnessConfig::default() };
        assert!(bad_tail.validate().is_err());
    }

    #[test]
    fn test_algorithm_from_str() {
        assert_eq!("inverse".parse(), Ok(FairnessAlgorithm::Inverse));
        assert_eq!("HASH_COMMIT".parse(), Ok(FairnessAlgorithm::HashCommit));
        assert!("dice".parse::<FairnessAlgorithm>().is_err());
    }

    #[test]
    fn test_crash_points_within_bounds() {
        for config in [inverse_config(), FairnessConfig::default()] {
            let mut generator = FairnessGenerator::with_rng(config, StdRng::seed_from_u64(7));
            for _ in 0..5_000 {
                let point = generator.generate().unwrap().crash_point();
                assert!(point >= MIN_CRASH_POINT, "{point} below minimum");
                assert!(point <= config.max_crash_point, "{point} above cap");
                assert_eq!(point, round2(point));
            }
        }
    }

    #[test]
    fn test_distribution_favors_low_multipliers() {
        for config in [inverse_config(), FairnessConfig::default()] {
            let mut generator = FairnessGenerator::with_rng(config, StdRng::seed_from_u64(11));
            let draws = 10_000;
            let body = (0..draws)
                .filter(|_| generator.generate().unwrap().crash_point() <= config.soft_cap)
                .count();
            // Expect ~95% within the body band.
            assert!(body > draws * 90 / 100, "only {body} of {draws} in body");
            assert!(body < draws, "tail never sampled");
        }
    }

    #[test]
    fn test_seeds_never_reused() {
        let mut generator =
            FairnessGenerator::with_rng(FairnessConfig::default(), StdRng::seed_from_u64(3));
        let first = generator.generate().unwrap().reveal().unwrap();
        let second = generator.generate().unwrap().reveal().unwrap();
        assert_ne!(first.server_seed, second.server_seed);
        assert_ne!(first.client_seed, second.client_seed);
    }

    #[test]
    fn test_inverse_has_no_commitment() {
        let mut generator = FairnessGenerator::with_rng(inverse_config(), StdRng::seed_from_u64(1));
        let draw = generator.generate().unwrap();
        assert!(draw.commitment().is_none());
        assert!(draw.reveal().is_none());
    }

    #[test]
    fn test_reveal_verifies() {
        let config = FairnessConfig::default();
        let mut generator = FairnessGenerator::with_rng(config, StdRng::seed_from_u64(42));
        for _ in 0..50 {
            let draw = generator.generate().unwrap();
            let reveal = draw.reveal().unwrap();
            assert_eq!(draw.commitment().as_deref(), Some(reveal.commitment.as_str()));
            assert_eq!(verify_crash_point(&reveal, &config), Ok(draw.crash_point()));
        }
    }

    #[test]
    fn test_verify_rejects_tampered_seed() {
        let config = FairnessConfig::default();
        let mut generator = FairnessGenerator::with_rng(config, StdRng::seed_from_u64(5));
        let mut reveal = generator.generate().unwrap().reveal().unwrap();
        reveal.server_seed = hex::encode([9u8; SEED_LEN]);
        assert_eq!(
            verify_crash_point(&reveal, &config),
            Err(VerifyError::CommitmentMismatch)
        );

        reveal.client_seed = "zz".to_string();
        reveal.server_seed = "00".to_string();
        assert_eq!(
            verify_crash_point(&reveal, &config),
            Err(VerifyError::InvalidLength { field: "server_seed", len: 1 })
        );
    }

    #[test]
    fn test_hash_mapping_is_deterministic() {
        let config = FairnessConfig::default();
        let server = [1u8; SEED_LEN];
        let client = [2u8; SEED_LEN];
        let first = crash_point_from_seeds(&server, &client, &config);
        for _ in 0..10 {
            assert_eq!(crash_point_from_seeds(&server, &client, &config), first);
        }
        assert!(crash_point_from_seeds(&server, &[3u8; SEED_LEN], &config).is_finite());
    }

    #[test]
    fn test_draw_debug_is_redacted() {
        let mut generator = FairnessGenerator::with_rng(inverse_config(), StdRng::seed_from_u64(9));
        let draw = generator.generate().unwrap();
        let rendered = format!("{draw:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains(&format!("{}", draw.crash_point())));
    }

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            unimplemented!()
        }

        fn next_u64(&mut self) -> u64 {
            unimplemented!()
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {
            unimplemented!()
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no entropy",
            )))
        }
    }

    impl CryptoRng for BrokenRng {}

    #[test]
    fn test_entropy_failure_surfaces() {
        for config in [inverse_config(), FairnessConfig::default()] {
            let mut generator = FairnessGenerator::with_rng(config, BrokenRng);
            assert!(matches!(generator.generate(), Err(FairnessError::Entropy(_))));
        }
    }
}
