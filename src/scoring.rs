use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Scores at or above this value are accepted. Not part of the weight table.
pub const ACCEPT_THRESHOLD: u8 = 60;

pub const MIN_SCORE: i64 = 0;
pub const MAX_SCORE: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum WeightsError {
    #[error("Unknown score weight key(s): {}", .0.join(", "))]
    UnknownKeys(Vec<String>),
    #[error("Failed to access weight overrides {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Invalid weight overrides JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub base: i32,
    pub mx_exists: i32,
    pub smtp_valid: i32,
    pub whitelisted: i32,
    pub new_domain: i32,
    pub disposable: i32,
    pub blacklisted: i32,
    pub spam_keywords: i32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            base: 50,
            mx_exists: 20,
            smtp_valid: 20,
            whitelisted: 10,
            new_domain: -10,
            disposable: -30,
            blacklisted: -40,
            spam_keywords: -20,
        }
    }
}

impl ScoreWeights {
    pub const KEYS: [&'static str; 8] = [
        "base",
        "mx_exists",
        "smtp_valid",
        "whitelisted",
        "new_domain",
        "disposable",
        "blacklisted",
        "spam_keywords",
    ];

    fn slot(&mut self, key: &str) -> Option<&mut i32> {
        match key {
            "base" => Some(&mut self.base),
            "mx_exists" => Some(&mut self.mx_exists),
            "smtp_valid" => Some(&mut self.smtp_valid),
            "whitelisted" => Some(&mut self.whitelisted),
            "new_domain" => Some(&mut self.new_domain),
            "disposable" => Some(&mut self.disposable),
            "blacklisted" => Some(&mut self.blacklisted),
            "spam_keywords" => Some(&mut self.spam_keywords),
            _ => None,
        }
    }

    /// Defaults with the override table applied on top.
    pub fn with_overrides(overrides: &WeightOverrides) -> Self {
        let mut weights = Self::default();
        for (key, value) in overrides.iter() {
            if let Some(slot) = weights.slot(key) {
                *slot = *value;
            }
        }
        weights
    }

    /// Loads the weights in effect for this process. A missing override file means defaults.
    pub fn load(overrides_path: &Path) -> Result<Self, WeightsError> {
        let overrides = WeightOverrides::read(overrides_path)?;
        if !overrides.is_empty() {
            log::info!(
                "Applying {} score weight override(s) from {}",
                overrides.len(),
                overrides_path.display()
            );
        }
        Ok(Self::with_overrides(&overrides))
    }
}

/// The persisted weight-override table, restricted to the `ScoreWeights` keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightOverrides(BTreeMap<String, i32>);

impl WeightOverrides {
    pub fn new(values: BTreeMap<String, i32>) -> Result<Self, WeightsError> {
        let unknown: Vec<String> = values
            .keys()
            .filter(|k| !ScoreWeights::KEYS.contains(&k.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(WeightsError::UnknownKeys(unknown));
        }
        Ok(Self(values))
    }

    pub fn read(path: &Path) -> Result<Self, WeightsError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(WeightsError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let values: BTreeMap<String, i32> = serde_json::from_str(&content)?;
        Self::new(values)
    }

    /// Persists the table. The running process keeps its weights until restart.
    pub fn write(&self, path: &Path) -> Result<(), WeightsError> {
        let content = serde_json::to_string_pretty(&self.0)?;
        let io_err = |source| WeightsError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        fs::write(path, content).map_err(io_err)?;
        log::info!("Wrote score weight overrides to {}", path.display());
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i32)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signals {
    pub mx_exists: bool,
    pub smtp_valid: bool,
    pub whitelisted: bool,
    pub new_domain: bool,
    pub disposable: bool,
    pub blacklisted: bool,
    pub spam_keywords: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Accepted,
    Rejected,
}

impl Verdict {
    pub fn from_score(score: u8) -> Self {
        if score >= ACCEPT_THRESHOLD {
            Verdict::Accepted
        } else {
            Verdict::Rejected
        }
    }
}

/// Weighted sum of the signals plus the reputation penalty, clamped to 0..=100.
pub fn score(signals: &Signals, penalty: i32, weights: &ScoreWeights) -> (u8, Verdict) {
    let contributions = [
        (signals.mx_exists, weights.mx_exists),
        (signals.smtp_valid, weights.smtp_valid),
        (signals.whitelisted, weights.whitelisted),
        (signals.new_domain, weights.new_domain),
        (signals.disposable, weights.disposable),
        (signals.blacklisted, weights.blacklisted),
        (signals.spam_keywords, weights.spam_keywords),
    ];

    let raw = contributions
        .iter()
        .filter(|(on, _)| *on)
        .fold(weights.base as i64 + penalty as i64, |acc, (_, w)| {
            acc + *w as i64
        });
    let clamped = raw.clamp(MIN_SCORE, MAX_SCORE) as u8;
    log::debug!("Raw score {raw} clamped to {clamped}");

    (clamped, Verdict::from_score(clamped))
}
