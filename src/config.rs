//! Solver configuration store (`KEY= VALUE` line format).
//!
//! The store is deliberately schema-light: keys the workflow understands get
//! typed accessors, everything else passes through opaquely so a config file
//! round-trips losslessly through [`Config::dump`]. Each perturbed run gets
//! its own dumped copy on disk for the solver to read.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors from parsing or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write config {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {} line {line}: expected KEY= VALUE, got {text:?}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        text: String,
    },

    #[error("config key {key} is missing or inconsistent: {reason}")]
    Inconsistent { key: &'static str, reason: String },
}

/// A single configuration value: a bare scalar or a parenthesized list.
///
/// Both forms keep the raw text of each element, so values the workflow never
/// interprets survive a load/dump cycle byte-for-byte (modulo whitespace).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(String),
    List(Vec<String>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::List(items) => write!(f, "( {} )", items.join(", ")),
        }
    }
}

/// Ordered, case-normalized key/value configuration.
///
/// Keys are uppercased and unique; insertion order is preserved so a dumped
/// file reads like the original. Unknown keys are kept, never rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    entries: Vec<(String, Value)>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a `KEY= VALUE` text file.
    ///
    /// `%`-comment and blank lines are skipped. A later occurrence of a key
    /// overwrites an earlier one (the earlier position is kept).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "loading config");
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('%') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                text: raw.to_string(),
            })?;
            config.set(key.trim(), parse_value(value.trim()));
        }
        debug!(keys = config.entries.len(), "config loaded");
        Ok(config)
    }

    /// Insert or overwrite a key. Keys are uppercased; the position of an
    /// existing key is preserved on overwrite.
    pub fn set(&mut self, key: &str, value: Value) {
        let key = key.to_uppercase();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn set_scalar(&mut self, key: &str, value: impl ToString) {
        self.set(key, Value::Scalar(value.to_string()));
    }

    pub fn set_list(&mut self, key: &str, items: Vec<String>) {
        self.set(key, Value::List(items));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        let key = key.to_uppercase();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            Value::Scalar(s) => Some(s.as_str()),
            Value::List(_) => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key)?.parse().ok()
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_str(key)?.parse().ok()
    }

    /// Boolean-as-string: YES/NO/TRUE/FALSE, case-insensitive.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get_str(key)?.to_uppercase().as_str() {
            "YES" | "TRUE" => Some(true),
            "NO" | "FALSE" => Some(false),
            _ => None,
        }
    }

    /// List elements; a scalar is treated as a one-element list so configs
    /// written either way behave the same.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::Scalar(s) => Some(vec![s.clone()]),
            Value::List(items) => Some(items.clone()),
        }
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Write the configuration back out in `KEY= VALUE` format, preserving
    /// insertion order and unknown keys.
    pub fn dump(&self, path: &Path) -> Result<(), ConfigError> {
        let mut buf = String::new();
        for (key, value) in &self.entries {
            buf.push_str(&format!("{key}= {value}\n"));
        }
        fs::write(path, buf).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overrides the driver applies before deriving physics: partition count,
    /// zone count, and console verbosity for quiet runs.
    pub fn apply_overrides(&mut self, partitions: u32, nzones: u32, quiet: bool) {
        self.set_scalar("NUMBER_PART", partitions);
        self.set_scalar("NZONES", nzones);
        if quiet {
            self.set_scalar("CONSOLE", "CONCISE");
        }
    }
}

fn parse_value(text: &str) -> Value {
    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        let items = inner
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        return Value::List(items);
    }
    Value::Scalar(text.to_string())
}
