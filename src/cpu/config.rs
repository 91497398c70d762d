//! Machine options.

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Largest accepted timer interval or device latency.
pub const MAX_LATENCY: u32 = 1024;

/// Options fixed when the machine is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// User-mode instructions between timer interrupts (0 disables the timer).
    pub timer: u32,
    /// Enter the debugger on `BRKP`.
    pub debug: bool,
    /// Ticks before a disk request completes.
    pub disk: u32,
    /// Ticks before a console request completes.
    pub console: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            timer: 20,
            debug: false,
            disk: 20,
            console: 20,
        }
    }
}

impl Options {
    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let options: Options = serde_json::from_str(text)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check every field is within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("timer", self.timer), ("disk", self.disk), ("console", self.console)] {
            if value > MAX_LATENCY {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        Ok(())
    }
}

/// Errors in machine options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(String),

    #[error("{field} = {value} is out of range (max 1024)")]
    OutOfRange { field: &'static str, value: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.timer, 20);
        assert_eq!(options.disk, 20);
        assert_eq!(options.console, 20);
        assert!(!options.debug);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let options = Options::from_json(r#"{ "disk": 3, "debug": true }"#).unwrap();
        assert_eq!(options.disk, 3);
        assert!(options.debug);
        assert_eq!(options.timer, 20);
    }

    #[test]
    fn test_out_of_range() {
        let err = Options::from_json(r#"{ "console": 5000 }"#).unwrap_err();
        assert_eq!(err, ConfigError::OutOfRange { field: "console", value: 5000 });
        assert!(matches!(Options::from_json("{ not json"), Err(ConfigError::Parse(_))));
    }
}
