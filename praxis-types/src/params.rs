//! Session parameter files.
//!
//! A session is configured by a TOML file: experiment-level settings at the
//! top, one `[[match]]` table per match, and free-form `[match.custom]`
//! string parameters interpreted by the game controller. A verbatim copy of
//! the loaded parameters is dumped to the output directory when a session
//! starts.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::money::{Money, RoundingPolicy};

/// Experiment-level parameters for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionParams {
    /// Registry name of the game controller (e.g. "island", "quiz").
    pub game_type: String,
    #[serde(default)]
    pub experiment_id: String,
    pub num_players: usize,
    /// Flat payment added to every seat's rounded earnings, in currency units.
    #[serde(default)]
    pub show_up_payment: f64,
    #[serde(default)]
    pub rounding: RoundingPolicy,
    /// Post-experiment survey page. Must exist and be readable at session
    /// start when set.
    #[serde(default)]
    pub survey_file: Option<PathBuf>,
    #[serde(rename = "match", default)]
    pub matches: Vec<MatchParams>,
}

/// Parameters for one contiguous block of rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchParams {
    pub num_rounds: usize,
    /// Real currency per experiment-currency point.
    #[serde(default = "default_exchange_rate")]
    pub exchange_rate: f64,
    /// Practice matches count for history but not for payment.
    #[serde(default)]
    pub practice: bool,
    /// Controller-defined parameters, kept as strings the way they appear
    /// in the file.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

fn default_exchange_rate() -> f64 {
    1.0
}

impl MatchParams {
    pub fn custom(&self, key: &str) -> Option<&str> {
        self.custom.get(key).map(|s| s.as_str())
    }

    /// Custom parameter with a fallback for absent keys.
    pub fn custom_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.custom(key).unwrap_or(default)
    }
}

impl SessionParams {
    pub fn show_up_payment(&self) -> Money {
        Money::from_f64(self.show_up_payment)
    }

    pub fn load(path: &Path) -> Result<SessionParams, ParamsError> {
        let text = std::fs::read_to_string(path)?;
        let params: SessionParams = toml::from_str(&text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn save(&self, path: &Path) -> Result<(), ParamsError> {
        let text = toml::to_string_pretty(self).map_err(|e| {
            ParamsError::Invalid(format!("cannot serialize parameters: {}", e))
        })?;
        std::fs::write(path, text)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ParamsError> {
        if self.game_type.is_empty() {
            return Err(ParamsError::Invalid("game_type is empty".into()));
        }
        if self.num_players == 0 {
            return Err(ParamsError::Invalid("num_players must be at least 1".into()));
        }
        if self.matches.is_empty() {
            return Err(ParamsError::Invalid("at least one [[match]] required".into()));
        }
        for (i, m) in self.matches.iter().enumerate() {
            if m.num_rounds == 0 {
                return Err(ParamsError::Invalid(format!(
                    "match {} has num_rounds = 0",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

/// Error loading or validating a parameter file.
#[derive(Debug)]
pub enum ParamsError {
    Io(io::Error),
    Parse(toml::de::Error),
    Invalid(String),
}

impl From<io::Error> for ParamsError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ParamsError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

impl std::fmt::Display for ParamsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Parse(e) => write!(f, "parameter file syntax: {}", e),
            Self::Invalid(msg) => write!(f, "invalid parameters: {}", msg),
        }
    }
}

impl std::error::Error for ParamsError {}
