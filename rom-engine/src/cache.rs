//! Prediction cache keyed by a fingerprint of the request.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use faer::Mat;
use sha2::{Digest, Sha256};

/// Named scalar prediction parameters. Ordered so equal maps encode identically.
pub type PredictionParameters = BTreeMap<String, f64>;

const FINGERPRINT_DOMAIN: &str = "rom-prediction-v1";

/// SHA-256 fingerprint of a prediction request, hex encoded.
///
/// Format:
/// ```text
/// rom-prediction-v1\n
/// generation=G\n
/// n_steps=N\n
/// dt=<f64 bits as hex>\n
/// count=K\n
/// name=<f64 bits as hex>\n
/// ...
/// ```
///
/// Values are encoded by their bit pattern so any change in a parameter
/// changes the key; `-0.0` parameter values are folded onto `0.0`.
/// `generation` identifies the trained model the request was served from.
pub fn fingerprint(
    params: &PredictionParameters,
    n_steps: usize,
    dt: f64,
    generation: u64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN.as_bytes());
    hasher.update(b"\n");
    hasher.update(format!("generation={generation}\n").as_bytes());
    hasher.update(format!("n_steps={n_steps}\n").as_bytes());
    hasher.update(format!("dt={:016x}\n", dt.to_bits()).as_bytes());
    hasher.update(format!("count={}\n", params.len()).as_bytes());
    for (name, value) in params {
        let value = if *value == 0.0 { 0.0_f64 } else { *value };
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(format!("{:016x}", value.to_bits()).as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Thread-safe fingerprint → prediction map.
///
/// Entries never expire; the map is emptied only by [`PredictionCache::clear`].
/// A fused forecast together with the models that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrediction {
    pub prediction: Mat<f64>,
    pub pod_contribution: bool,
    pub dmd_contribution: bool,
}

/// Concurrent misses on the same key may both compute and insert, the last
/// write wins.
#[derive(Debug, Default)]
pub struct PredictionCache {
    entries: Mutex<HashMap<String, CachedPrediction>>,
}

impl PredictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    // A panicking writer cannot leave a half-inserted entry, so a poisoned
    // lock still guards a consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedPrediction>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<CachedPrediction> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: String, entry: CachedPrediction) {
        self.lock().insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
