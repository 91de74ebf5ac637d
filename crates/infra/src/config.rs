//! Ledger configuration, loaded from the environment.
//!
//! | Variable                        | Default   | Meaning                                   |
//! |---------------------------------|-----------|-------------------------------------------|
//! | `PICKLEDGER_LOCK_TIMEOUT_MS`    | `2000`    | Max wait for a row lock before aborting   |
//! | `PICKLEDGER_RETRY_MAX_ATTEMPTS` | `3`       | Attempts for transient failures (>= 1)    |
//! | `PICKLEDGER_RETRY_BACKOFF_MS`   | `25`      | Base backoff between attempts (linear)    |
//! | `PICKLEDGER_DEFAULT_ACTOR`      | `Sistema` | Audit actor when the caller supplies none |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use pickledger_core::{Actor, DomainError, DomainResult};

/// Caller-side retry policy for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Run each unit of work exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay before attempt number `attempt + 1` (attempts are 1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub lock_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub default_actor: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 2_000,
            retry: RetryPolicy::default(),
            default_actor: Actor::SYSTEM.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Load from process environment variables.
    pub fn from_env() -> DomainResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests pass a map instead of the environment).
    pub fn from_lookup<F>(lookup: F) -> DomainResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let lock_timeout_ms = parse_or(&lookup, "PICKLEDGER_LOCK_TIMEOUT_MS", defaults.lock_timeout_ms)?;
        let max_attempts = parse_or(
            &lookup,
            "PICKLEDGER_RETRY_MAX_ATTEMPTS",
            defaults.retry.max_attempts,
        )?;
        let backoff_ms = parse_or(&lookup, "PICKLEDGER_RETRY_BACKOFF_MS", defaults.retry.backoff_ms)?;
        let default_actor = lookup("PICKLEDGER_DEFAULT_ACTOR")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.default_actor);

        if max_attempts == 0 {
            return Err(DomainError::validation(
                "PICKLEDGER_RETRY_MAX_ATTEMPTS must be at least 1",
            ));
        }

        Ok(Self {
            lock_timeout_ms,
            retry: RetryPolicy {
                max_attempts,
                backoff_ms,
            },
            default_actor,
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn default_actor(&self) -> Actor {
        Actor::new(self.default_actor.clone())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> DomainResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DomainError::validation(format!("{key}: cannot parse '{raw}'"))),
    }
}
