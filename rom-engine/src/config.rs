use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::RomError;

/// DMD algorithm selected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DmdVariant {
    /// Truncated-SVD projected DMD.
    Exact,
    /// Exact DMD with L1-regularized amplitudes.
    Optimized,
    /// Exact DMD on a time-delay embedded snapshot matrix.
    Extended,
    /// Streaming DMD with an exponentially forgotten full operator.
    Online,
    /// Full-rank operator via pseudo-inverse.
    Standard,
}

impl fmt::Display for DmdVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DmdVariant::Exact => "exact",
            DmdVariant::Optimized => "optimized",
            DmdVariant::Extended => "extended",
            DmdVariant::Online => "online",
            DmdVariant::Standard => "standard",
        };
        f.write_str(name)
    }
}

impl FromStr for DmdVariant {
    type Err = RomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(DmdVariant::Exact),
            "optimized" => Ok(DmdVariant::Optimized),
            "extended" => Ok(DmdVariant::Extended),
            "online" => Ok(DmdVariant::Online),
            "standard" => Ok(DmdVariant::Standard),
            other => Err(RomError::InvalidConfig(format!(
                "unsupported DMD variant '{other}'"
            ))),
        }
    }
}

/// Configuration shared by the POD, DMD and engine components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomConfig {
    /// Cumulative energy fraction retained by POD truncation.
    pub energy_threshold: f64,
    /// Upper bound on retained POD modes.
    pub max_modes: usize,
    /// Lower bound on retained POD modes.
    pub min_modes: usize,

    /// DMD algorithm.
    pub dmd_variant: DmdVariant,
    /// Shift between the X1 and X2 snapshot windows (and embedding depth).
    pub time_delay: usize,
    /// DMD truncation rank. None selects by `energy_threshold`.
    pub rank_truncation: Option<usize>,

    /// Keep a QR factorization for per-snapshot POD updates.
    pub enable_online_update: bool,
    /// Weight of the previous operator in online DMD, in (0, 1].
    pub forgetting_factor: f64,
    /// Buffered snapshots that trigger a batch POD re-decomposition.
    pub adaptation_frequency: usize,
    /// Capacity of the online DMD snapshot window.
    pub online_buffer_size: usize,
    /// L1 weight used by the optimized DMD amplitude fit.
    pub sparsity_weight: f64,

    /// Use a randomized range finder for the POD SVD.
    pub use_randomized_svd: bool,
    /// Extra sketch columns beyond the target rank.
    pub oversampling_factor: usize,
    /// Subspace iterations applied to the sketch.
    pub power_iterations: usize,
    /// Seed of the Gaussian sketch.
    pub random_seed: u64,

    /// Request an accelerated linear-algebra backend.
    pub enable_device_acceleration: bool,
    /// Worker pool size. None uses all available cores.
    pub worker_threads: Option<usize>,
}

impl Default for RomConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.999,
            max_modes: 100,
            min_modes: 5,
            dmd_variant: DmdVariant::Exact,
            time_delay: 1,
            rank_truncation: None,
            enable_online_update: true,
            forgetting_factor: 0.95,
            adaptation_frequency: 100,
            online_buffer_size: 1000,
            sparsity_weight: 0.01,
            use_randomized_svd: true,
            oversampling_factor: 10,
            power_iterations: 2,
            random_seed: 42,
            enable_device_acceleration: false,
            worker_threads: None,
        }
    }
}

impl RomConfig {
    /// Check internal consistency before any computation starts.
    pub fn validate(&self) -> Result<(), RomError> {
        if !(self.energy_threshold > 0.0 && self.energy_threshold <= 1.0) {
            return Err(RomError::InvalidConfig(format!(
                "energy_threshold must be in (0, 1], got {}",
                self.energy_threshold
            )));
        }
        if self.min_modes == 0 {
            return Err(RomError::InvalidConfig("min_modes must be at least 1".into()));
        }
        if self.min_modes > self.max_modes {
            return Err(RomError::InvalidConfig(format!(
                "min_modes ({}) exceeds max_modes ({})",
                self.min_modes, self.max_modes
            )));
        }
        if self.time_delay == 0 {
            return Err(RomError::InvalidConfig("time_delay must be at least 1".into()));
        }
        if self.rank_truncation == Some(0) {
            return Err(RomError::InvalidConfig(
                "rank_truncation must be positive when set".into(),
            ));
        }
        if !(self.forgetting_factor > 0.0 && self.forgetting_factor <= 1.0) {
            return Err(RomError::InvalidConfig(format!(
                "forgetting_factor must be in (0, 1], got {}",
                self.forgetting_factor
            )));
        }
        if self.adaptation_frequency == 0 {
            return Err(RomError::InvalidConfig(
                "adaptation_frequency must be at least 1".into(),
            ));
        }
        if self.online_buffer_size < self.time_delay + 1 {
            return Err(RomError::InvalidConfig(format!(
                "online_buffer_size ({}) must exceed time_delay ({})",
                self.online_buffer_size, self.time_delay
            )));
        }
        if !(self.sparsity_weight >= 0.0 && self.sparsity_weight.is_finite()) {
            return Err(RomError::InvalidConfig(
                "sparsity_weight must be finite and non-negative".into(),
            ));
        }
        if self.worker_threads == Some(0) {
            return Err(RomError::InvalidConfig(
                "worker_threads must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, RomError> {
        let config: RomConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(RomConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_above_max_rejected() {
        let config = RomConfig {
            min_modes: 20,
            max_modes: 10,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(RomError::InvalidConfig(_))));
    }

    #[test]
    fn test_forgetting_factor_bounds() {
        let zero = RomConfig {
            forgetting_factor: 0.0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let one = RomConfig {
            forgetting_factor: 1.0,
            ..Default::default()
        };
        assert!(one.validate().is_ok());
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("exact".parse::<DmdVariant>().unwrap(), DmdVariant::Exact);
        assert_eq!(" Online ".parse::<DmdVariant>().unwrap(), DmdVariant::Online);
        assert!("koopman".parse::<DmdVariant>().is_err());
    }

    #[test]
    fn test_variant_display_round_trip() {
        for v in [
            DmdVariant::Exact,
            DmdVariant::Optimized,
            DmdVariant::Extended,
            DmdVariant::Online,
            DmdVariant::Standard,
        ] {
            assert_eq!(v.to_string().parse::<DmdVariant>().unwrap(), v);
        }
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            RomConfig::from_json_str(r#"{"max_modes": 12, "dmd_variant": "extended"}"#).unwrap();
        assert_eq!(config.max_modes, 12);
        assert_eq!(config.dmd_variant, DmdVariant::Extended);
        assert_eq!(config.min_modes, 5);

        assert!(RomConfig::from_json_str(r#"{"dmd_variant": "fancy"}"#).is_err());
    }
}
