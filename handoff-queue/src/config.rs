//! Backend and tuning configuration.
//!
//! Settings come from the builder methods on [`QueueConfig`] or from the
//! process environment:
//!
//! | Variable | Values | Default |
//! |---|---|---|
//! | `HANDOFF_QUEUE_BACKEND` | `auto`, `native`, `fallback` | `auto` |
//! | `HANDOFF_SPSC_MAX_LOOKAHEAD` | positive integer | `4096` |
//!
//! Invalid environment values are logged and ignored.

use std::env;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::ConfigError;
use crate::spsc::DEFAULT_MAX_LOOKAHEAD;

/// Environment variable selecting the backend.
pub const BACKEND_ENV: &str = "HANDOFF_QUEUE_BACKEND";

/// Environment variable overriding the SPSC look-ahead ceiling.
pub const MAX_LOOKAHEAD_ENV: &str = "HANDOFF_SPSC_MAX_LOOKAHEAD";

/// Returns `true` if this target has pointer-sized atomics with the orderings
/// the native queues rely on.
#[inline]
pub const fn native_atomics_available() -> bool {
    cfg!(target_has_atomic = "ptr")
}

/// Which backend the factory should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendPreference {
    /// Native when the target supports it, fallback otherwise.
    #[default]
    Auto,
    /// Native rings. Degrades to the fallback, with a warning, on targets
    /// without the required atomics.
    Native,
    /// Always the `crossbeam-queue` backend.
    Fallback,
}

impl FromStr for BackendPreference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "fallback" => Ok(Self::Fallback),
            _ => Err(ConfigError::UnknownBackend(s.to_string())),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Native => "native",
            Self::Fallback => "fallback",
        })
    }
}

/// Parses a look-ahead ceiling: a positive integer.
///
/// # Errors
///
/// [`ConfigError::InvalidLookahead`] if `s` is not an integer,
/// [`ConfigError::ZeroLookahead`] if it is zero.
pub fn parse_max_lookahead(s: &str) -> Result<usize, ConfigError> {
    let value = s
        .trim()
        .parse::<usize>()
        .map_err(|source| ConfigError::InvalidLookahead {
            value: s.to_string(),
            source,
        })?;
    if value == 0 {
        return Err(ConfigError::ZeroLookahead);
    }
    Ok(value)
}

/// Settings for a [`QueueFactory`](crate::QueueFactory).
///
/// # Example
///
/// ```
/// use handoff_queue::{BackendPreference, QueueConfig, QueueFactory};
///
/// let config = QueueConfig::new()
///     .with_backend(BackendPreference::Fallback)
///     .with_max_lookahead(64);
/// let factory = QueueFactory::from_config(&config);
///
/// let (mut tx, mut rx) = factory.spsc::<u32>(8).unwrap();
/// tx.offer(1).unwrap();
/// assert_eq!(rx.poll(), Some(1));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    backend: BackendPreference,
    max_lookahead: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            max_lookahead: DEFAULT_MAX_LOOKAHEAD,
        }
    }
}

impl QueueConfig {
    /// Default settings: automatic backend, default look-ahead ceiling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads overrides through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(BACKEND_ENV) {
            match raw.parse::<BackendPreference>() {
                Ok(backend) => config.backend = backend,
                Err(err) => warn!(variable = BACKEND_ENV, %err, "ignoring invalid override"),
            }
        }

        if let Some(raw) = lookup(MAX_LOOKAHEAD_ENV) {
            match parse_max_lookahead(&raw) {
                Ok(max_lookahead) => config.max_lookahead = max_lookahead,
                Err(err) => {
                    warn!(variable = MAX_LOOKAHEAD_ENV, %err, "ignoring invalid override");
                }
            }
        }

        config
    }

    /// Sets the backend preference.
    #[must_use]
    pub const fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the SPSC look-ahead ceiling. Zero disables batching.
    #[must_use]
    pub const fn with_max_lookahead(mut self, max_lookahead: usize) -> Self {
        self.max_lookahead = max_lookahead;
        self
    }

    /// The backend preference.
    pub const fn backend(&self) -> BackendPreference {
        self.backend
    }

    /// The SPSC look-ahead ceiling.
    pub const fn max_lookahead(&self) -> usize {
        self.max_lookahead
    }

    /// Resolves the preference against the target: `true` if the native
    /// queues should be used.
    pub fn native_supported(&self) -> bool {
        match self.backend {
            BackendPreference::Auto => native_atomics_available(),
            BackendPreference::Native => {
                let available = native_atomics_available();
                if !available {
                    warn!("native queues requested but unsupported on this target, using fallback");
                }
                available
            }
            BackendPreference::Fallback => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn parses_backend_names() {
        assert_eq!("auto".parse(), Ok(BackendPreference::Auto));
        assert_eq!(" Native ".parse(), Ok(BackendPreference::Native));
        assert_eq!("FALLBACK".parse(), Ok(BackendPreference::Fallback));
        assert_eq!(
            "ring".parse::<BackendPreference>(),
            Err(ConfigError::UnknownBackend("ring".to_string()))
        );
    }

    #[test]
    fn backend_display_round_trips() {
        for backend in [
            BackendPreference::Auto,
            BackendPreference::Native,
            BackendPreference::Fallback,
        ] {
            assert_eq!(backend.to_string().parse(), Ok(backend));
        }
    }

    #[test]
    fn parses_lookahead() {
        assert_eq!(parse_max_lookahead("64"), Ok(64));
        assert_eq!(parse_max_lookahead("0"), Err(ConfigError::ZeroLookahead));
        assert!(matches!(
            parse_max_lookahead("-3"),
            Err(ConfigError::InvalidLookahead { .. })
        ));
    }

    #[test]
    fn lookup_applies_valid_overrides() {
        let config = QueueConfig::from_lookup(lookup(&[
            (BACKEND_ENV, "fallback"),
            (MAX_LOOKAHEAD_ENV, "32"),
        ]));
        assert_eq!(config.backend(), BackendPreference::Fallback);
        assert_eq!(config.max_lookahead(), 32);
        assert!(!config.native_supported());
    }

    #[test]
    fn lookup_ignores_invalid_overrides() {
        let config = QueueConfig::from_lookup(lookup(&[
            (BACKEND_ENV, "turbo"),
            (MAX_LOOKAHEAD_ENV, "lots"),
        ]));
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn builder_setters() {
        let config = QueueConfig::new()
            .with_backend(BackendPreference::Native)
            .with_max_lookahead(0);
        assert_eq!(config.backend(), BackendPreference::Native);
        assert_eq!(config.max_lookahead(), 0);
        assert_eq!(config.native_supported(), native_atomics_available());
    }
}
