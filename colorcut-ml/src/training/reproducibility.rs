//! Reproducibility tracking: environment snapshots and per-component seeds.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Snapshot of the environment a run was executed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub crate_version: String,
    pub system_info: String,
    pub platform: String,
    pub timestamp: DateTime<Utc>,
    /// Hash of the environment variables that influence a run.
    pub env_vars_hash: String,
}

impl EnvironmentSnapshot {
    pub fn capture() -> Self {
        Self {
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            system_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            platform: std::env::consts::OS.to_string(),
            timestamp: Utc::now(),
            env_vars_hash: Self::compute_env_vars_hash(),
        }
    }

    fn compute_env_vars_hash() -> String {
        let mut hasher = Sha256::new();
        for var in &["RUST_LOG", "COLORCUT_TRAINING__SEED", "COLORCUT_TRAINING__DEVICE"] {
            let value = std::env::var(var).unwrap_or_default();
            hasher.update(var.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Derives independent, stable seeds for the random components of a run
/// (data split, weight init, shuffling, augmentation) from one global seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedManager {
    pub global_seed: u64,
    pub component_seeds: BTreeMap<String, u64>,
}

impl SeedManager {
    pub fn new(global_seed: u64) -> Self {
        Self {
            global_seed,
            component_seeds: BTreeMap::new(),
        }
    }

    pub fn get_seed(&mut self, component: &str) -> u64 {
        let global = self.global_seed;
        *self
            .component_seeds
            .entry(component.to_string())
            .or_insert_with(|| derive_seed(global, component))
    }

    pub fn rng(&mut self, component: &str) -> StdRng {
        StdRng::seed_from_u64(self.get_seed(component))
    }
}

fn derive_seed(global: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global.to_le_bytes());
    hasher.update(component.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
