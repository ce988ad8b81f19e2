//! Run configuration: model shape, optimisation schedule and sampling settings.
//!
//! Every field has a default in [`crate::constants`]; [`from_env`] overlays
//! `CHAR_GPT_<FIELD>` environment variables on top of those defaults.

use std::path::PathBuf;
use std::str::FromStr;

use crate::constants;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub batch_size: usize,
    /// Maximum context length the model can condition on.
    pub block_size: usize,
    pub max_iters: usize,
    pub eval_interval: usize,
    pub eval_iters: usize,
    pub learning_rate: f64,
    /// Embedding width, split evenly across `n_head` heads.
    pub n_embd: usize,
    pub n_head: usize,
    pub n_layer: usize,
    /// Probability of zeroing an activation while training.
    pub dropout: f64,
    pub train_fraction: f64,
    pub seed: u64,
    pub corpus_path: PathBuf,
    /// Divides the final logits before softmax when sampling.
    pub temperature: f64,
    pub generate_tokens: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_size: constants::BATCH_SIZE,
            block_size: constants::BLOCK_SIZE,
            max_iters: constants::MAX_ITERS,
            eval_interval: constants::EVAL_INTERVAL,
            eval_iters: constants::EVAL_ITERS,
            learning_rate: constants::LEARNING_RATE,
            n_embd: constants::EMBEDDING_DIM,
            n_head: constants::HEADS,
            n_layer: constants::LAYERS,
            dropout: constants::DROPOUT,
            train_fraction: constants::TRAIN_VALIDATION_SPLIT,
            seed: constants::SEED,
            corpus_path: PathBuf::from(constants::CORPUS_PATH),
            temperature: constants::TEMPERATURE,
            generate_tokens: constants::GENERATE_TOKENS,
        }
    }
}

impl Config {
    /// Checks that the values describe a model that can be built and trained.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("batch_size", self.batch_size),
            ("block_size", self.block_size),
            ("n_embd", self.n_embd),
            ("n_head", self.n_head),
            ("n_layer", self.n_layer),
            ("eval_interval", self.eval_interval),
            ("eval_iters", self.eval_iters),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.n_embd % self.n_head != 0 {
            return Err(Error::Config(format!(
                "n_embd ({}) must be divisible by n_head ({})",
                self.n_embd, self.n_head
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::Config("dropout must be in [0, 1)".to_string()));
        }
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(Error::Config("train_fraction must be in (0, 1)".to_string()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::Config("learning_rate must be positive".to_string()));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(Error::Config("temperature must be positive".to_string()));
        }
        Ok(())
    }

    /// Width of a single attention head.
    pub fn head_size(&self) -> usize {
        self.n_embd / self.n_head
    }
}

/// Full environment variable name for a field, e.g. `block_size` -> `CHAR_GPT_BLOCK_SIZE`.
pub fn env_key(field: &str) -> String {
    format!("{}{}", constants::ENV_PREFIX, field.to_ascii_uppercase())
}

/// Reads and parses `key`. Unset yields `None`; set but unparsable is an error.
pub fn env_parsed<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = match std::env::var(key) {
        Ok(raw) => raw,
        Err(std::env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(Error::Config(format!("{key}: {e}"))),
    };
    raw.parse()
        .map(Some)
        .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}")))
}

fn overlay<T>(field: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = env_parsed(&env_key(field))? {
        *slot = value;
    }
    Ok(())
}

/// Builds a [`Config`] from the defaults, overridden by any `CHAR_GPT_*` variables that are set.
///
/// The result is not validated; call [`Config::validate`] before use.
pub fn from_env() -> Result<Config> {
    let mut config = Config::default();
    overlay("batch_size", &mut config.batch_size)?;
    overlay("block_size", &mut config.block_size)?;
    overlay("max_iters", &mut config.max_iters)?;
    overlay("eval_interval", &mut config.eval_interval)?;
    overlay("eval_iters", &mut config.eval_iters)?;
    overlay("learning_rate", &mut config.learning_rate)?;
    overlay("n_embd", &mut config.n_embd)?;
    overlay("n_head", &mut config.n_head)?;
    overlay("n_layer", &mut config.n_layer)?;
    overlay("dropout", &mut config.dropout)?;
    overlay("train_fraction", &mut config.train_fraction)?;
    overlay("seed", &mut config.seed)?;
    overlay("corpus_path", &mut config.corpus_path)?;
    overlay("temperature", &mut config.temperature)?;
    overlay("generate_tokens", &mut config.generate_tokens)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialises tests that touch the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.head_size(), 8);
    }

    #[test]
    fn test_rejects_indivisible_heads() {
        let config = Config {
            n_embd: 30,
            n_head: 4,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_zero_sizes() {
        for config in [
            Config {
                block_size: 0,
                ..Config::default()
            },
            Config {
                n_head: 0,
                ..Config::default()
            },
            Config {
                eval_interval: 0,
                ..Config::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_rejects_out_of_range_scalars() {
        let bad = [
            Config {
                dropout: 1.0,
                ..Config::default()
            },
            Config {
                train_fraction: 1.0,
                ..Config::default()
            },
            Config {
                learning_rate: 0.0,
                ..Config::default()
            },
            Config {
                temperature: f64::NAN,
                ..Config::default()
            },
        ];
        for config in bad {
            assert!(config.validate().is_err(), "{config:?} should be rejected");
        }
    }

    #[test]
    fn test_env_key_format() {
        assert_eq!(env_key("block_size"), "CHAR_GPT_BLOCK_SIZE");
    }

    #[test]
    fn test_env_parsed_unset_is_none() {
        assert_eq!(env_parsed::<usize>("CHAR_GPT_SURELY_UNSET_KEY").unwrap(), None);
    }

    #[test]
    fn test_from_env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let key = env_key("n_layer");
        unsafe { std::env::set_var(&key, "5") };
        let config = from_env();
        unsafe { std::env::remove_var(&key) };
        let config = config.unwrap();
        assert_eq!(config.n_layer, 5);
        assert_eq!(config.block_size, constants::BLOCK_SIZE);
    }

    #[test]
    fn test_from_env_rejects_unparsable_value() {
        let _guard = ENV_LOCK.lock().unwrap();
        let key = env_key("seed");
        unsafe { std::env::set_var(&key, "not-a-number") };
        let result = from_env();
        unsafe { std::env::remove_var(&key) };
        match result {
            Err(Error::Config(message)) => assert!(message.contains("CHAR_GPT_SEED")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
