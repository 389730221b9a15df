use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ledger::{AccountId, Amount};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid {field}: {detail}")]
    Invalid {
        field: &'static str,
        detail: String,
    },
}

/// Upper bound for `event_capacity`; broadcast channels allocate every slot up front.
pub const MAX_EVENT_CAPACITY: usize = 65_536;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisAccount {
    pub account: AccountId,
    pub balance: Amount,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Deliveries buffered per topic stream before slow observers start losing them.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Available balances minted when the ledger is built.
    #[serde(default)]
    pub genesis: Vec<GenesisAccount>,
}

fn default_event_capacity() -> usize {
    64
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            genesis: Vec::new(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_json(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !event_capacity_in_range(self.event_capacity) {
            return Err(ConfigError::Invalid {
                field: "event_capacity",
                detail: format!(
                    "{} is outside 1..={MAX_EVENT_CAPACITY}",
                    self.event_capacity
                ),
            });
        }
        Ok(())
    }
}

pub(crate) fn event_capacity_in_range(capacity: usize) -> bool {
    (1..=MAX_EVENT_CAPACITY).contains(&capacity)
}

pub(crate) fn load_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
