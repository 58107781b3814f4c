//! # Match Configuration
//!
//! Loaded once at startup from TOML. Every field has a default matching the
//! reference game, so an empty file is a valid configuration.
//!
//! ```toml
//! total_rounds = 5
//! penalty_ms = 1000
//!
//! [[peripherals]]
//! id = 1
//!
//! [[peripherals]]
//! id = 2
//! eligible = false
//! ```

use std::collections::HashSet;
use std::path::Path;

use buzzline_protocol::PeripheralId;
use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

/// One configured buzzer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct PeripheralConfig {
    /// Bus id of the buzzer.
    pub id: u8,
    /// Whether it takes part in matches.
    #[serde(default = "default_true")]
    pub eligible: bool,
}

impl PeripheralConfig {
    /// Returns the typed id.
    #[must_use]
    pub const fn peripheral_id(&self) -> PeripheralId {
        PeripheralId(self.id)
    }
}

/// Complete match configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// Rounds per match.
    pub total_rounds: u8,
    /// A peripheral is online iff a frame arrived within this window.
    pub liveness_window_ms: u64,
    /// Lower bound (inclusive) of the random arming delay.
    pub arming_delay_min_ms: u32,
    /// Upper bound (exclusive) of the random arming delay.
    pub arming_delay_max_ms: u32,
    /// Time added for each press by a non-armed peripheral.
    pub penalty_ms: u32,
    /// Idle heartbeat / arm re-announcement cadence.
    pub idle_broadcast_interval_ms: u64,
    /// Duration of each countdown step.
    pub countdown_step_ms: u64,
    /// Number of countdown steps before the first round.
    pub countdown_steps: u8,
    /// Controller tick rate (ticks per second).
    pub tick_rate: u32,
    /// Fixed RNG seed for reproducible matches; entropy when absent.
    pub rng_seed: Option<u64>,
    /// Only arm peripherals that are currently online.
    pub require_online_for_arming: bool,
    /// Accept a press that arrives as a peripheral's first frame after
    /// being offline.
    pub trust_press_without_liveness: bool,
    /// Known buzzers.
    pub peripherals: Vec<PeripheralConfig>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            total_rounds: 5,
            liveness_window_ms: 1000,
            arming_delay_min_ms: 1500,
            arming_delay_max_ms: 3000,
            penalty_ms: 1000,
            idle_broadcast_interval_ms: 1000,
            countdown_step_ms: 1000,
            countdown_steps: 3,
            tick_rate: 100,
            rng_seed: None,
            require_online_for_arming: true,
            trust_press_without_liveness: false,
            peripherals: (1..=4)
                .map(|id| PeripheralConfig { id, eligible: true })
                .collect(),
        }
    }
}

impl MatchConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] for inconsistent values.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`MatchConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        tracing::info!(
            path = %path.display(),
            peripherals = config.peripherals.len(),
            rounds = config.total_rounds,
            "match config loaded"
        );
        Ok(config)
    }

    /// Checks the values for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.total_rounds == 0 {
            return Err(ConfigError::Invalid("total_rounds must be at least 1".to_string()));
        }
        if self.liveness_window_ms == 0 {
            return Err(ConfigError::Invalid("liveness_window_ms must be non-zero".to_string()));
        }
        if self.arming_delay_min_ms > self.arming_delay_max_ms {
            return Err(ConfigError::Invalid(format!(
                "arming delay range {}..{} is inverted",
                self.arming_delay_min_ms, self.arming_delay_max_ms
            )));
        }
        if self.tick_rate == 0 {
            return Err(ConfigError::Invalid("tick_rate must be non-zero".to_string()));
        }
        let mut seen = HashSet::new();
        for peripheral in &self.peripherals {
            if !seen.insert(peripheral.id) {
                return Err(ConfigError::Invalid(format!(
                    "peripheral id {} configured twice",
                    peripheral.id
                )));
            }
        }
        Ok(())
    }

    /// Ids of every configured peripheral.
    pub fn peripheral_ids(&self) -> impl Iterator<Item = PeripheralId> + '_ {
        self.peripherals.iter().map(PeripheralConfig::peripheral_id)
    }
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_reference_game() {
        let config = MatchConfig::from_toml_str("").unwrap();
        assert_eq!(config, MatchConfig::default());
        assert_eq!(config.total_rounds, 5);
        assert_eq!(config.penalty_ms, 1000);
        assert_eq!(config.peripherals.len(), 4);
    }

    #[test]
    fn test_peripheral_table() {
        let config = MatchConfig::from_toml_str(
            r"
            total_rounds = 3
            rng_seed = 42

            [[peripherals]]
            id = 7

            [[peripherals]]
            id = 9
            eligible = false
            ",
        )
        .unwrap();

        assert_eq!(config.total_rounds, 3);
        assert_eq!(config.rng_seed, Some(42));
        assert_eq!(
            config.peripherals,
            vec![
                PeripheralConfig {
                    id: 7,
                    eligible: true
                },
                PeripheralConfig {
                    id: 9,
                    eligible: false
                },
            ]
        );
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = MatchConfig::from_toml_str(
            r"
            [[peripherals]]
            id = 1
            [[peripherals]]
            id = 1
            ",
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_inverted_delay_and_zero_rounds() {
        let inverted = MatchConfig::from_toml_str(
            "arming_delay_min_ms = 3000\narming_delay_max_ms = 1500",
        );
        assert!(matches!(inverted, Err(ConfigError::Invalid(_))));

        let zero = MatchConfig::from_toml_str("total_rounds = 0");
        assert!(matches!(zero, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_field_is_parse_error() {
        let result = MatchConfig::from_toml_str("round_count = 5");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = MatchConfig::load("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
