//! Line-oriented `key=value` configuration files.
//!
//! The server reads its defaults from a small config file. Blank lines
//! and `#` comments are ignored, whitespace around keys and values is
//! trimmed, and malformed lines are skipped with a warning. Typed
//! getters fall back to a caller-supplied default when a key is missing
//! or fails to parse.

use crate::errors::ConfigError;

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Parsed configuration key/value pairs.
#[derive(Debug, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Loads a configuration file.
    ///
    /// # Errors
    /// Returns [`ConfigError::ReadError`] when the file cannot be opened
    /// or read. Malformed lines are not errors; they are logged and
    /// skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        log::info!("Loading configuration from: {:?}", path.as_ref());
        let file = File::open(&path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        let reader = BufReader::new(file);

        let mut values = HashMap::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ConfigError::ReadError(e.to_string()))?;
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match trimmed.split_once('=') {
                Some((key, value)) => {
                    values.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    log::warn!(
                        "Skipping malformed config line {}: '{}'",
                        line_no + 1,
                        trimmed
                    );
                }
            }
        }

        log::debug!("Loaded {} configuration entries", values.len());
        Ok(Self { values })
    }

    /// Returns whether a key is present.
    pub fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// String value for `key`, or `default` when absent.
    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// `u16` value for `key`, or `default` when absent or unparseable.
    pub fn get_u16(&self, key: &str, default: u16) -> u16 {
        self.get_parsed(key, default)
    }

    /// `u32` value for `key`, or `default` when absent or unparseable.
    pub fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get_parsed(key, default)
    }

    /// `usize` value for `key`, or `default` when absent or unparseable.
    pub fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get_parsed(key, default)
    }

    /// Boolean value for `key`.
    ///
    /// `true`, `1`, `yes` and `on` (case-insensitive) count as true;
    /// `false`, `0`, `no` and `off` as false. Anything else falls back
    /// to `default` with a warning.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.values.get(key) {
            None => default,
            Some(raw) => match raw.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                other => {
                    log::warn!(
                        "Config key '{}' has non-boolean value '{}', using default {}",
                        key,
                        other,
                        default
                    );
                    default
                }
            },
        }
    }

    fn get_parsed<T: FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.values.get(key) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(v) => v,
                Err(_) => {
                    log::warn!("Config key '{}' has unparseable value '{}'", key, raw);
                    default
                }
            },
        }
    }
}
