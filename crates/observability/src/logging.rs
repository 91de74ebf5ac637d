//! Tracing subscriber initialization.
//!
//! Output format comes from `PICKLEDGER_LOG_FORMAT` (`json` by default,
//! `pretty` for human-readable lines). Filtering follows `RUST_LOG` and
//! falls back to `info`.

use anyhow::{Context, bail};
use tracing_subscriber::EnvFilter;

pub const FORMAT_ENV: &str = "PICKLEDGER_LOG_FORMAT";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Read the format from the environment; unset means JSON.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(FORMAT_ENV) {
            Ok(raw) => raw.parse(),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(err) => Err(err).with_context(|| format!("reading {FORMAT_ENV}")),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}' (expected 'json' or 'pretty')"),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn try_init(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let result = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.with_target(true).try_init(),
    };
    result
        .map_err(|err| anyhow::anyhow!(err))
        .context("installing tracing subscriber")
}

/// Initialize logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops). A malformed
/// `PICKLEDGER_LOG_FORMAT` falls back to JSON with a warning.
pub fn init() {
    let format = match LogFormat::from_env() {
        Ok(format) => format,
        Err(err) => {
            eprintln!("{err:#}; using json logs");
            LogFormat::Json
        }
    };
    let _ = try_init(format);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        assert!(try_init(LogFormat::Json).is_err());
    }
}
