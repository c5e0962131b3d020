//! Environment lookups shared by the service configs
//!
//! Every service reads `DATABASE_URL` and a handful of numeric knobs from the
//! environment. Missing variables fall back to defaults; present but
//! malformed ones are errors rather than silently ignored.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

/// Database location used when `DATABASE_URL` is unset
pub const DEFAULT_DATABASE_URL: &str = "sqlite://telecommands.db";

/// `DATABASE_URL`, or the local default
pub fn database_url() -> String {
    env_string("DATABASE_URL", DEFAULT_DATABASE_URL)
}

/// String variable with a default
pub fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parsed variable with a default
pub fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    parse_or(key, env::var(key).ok().as_deref(), default)
}

/// Duration given in (possibly fractional) seconds
pub fn env_secs(key: &str, default: Duration) -> Result<Duration> {
    secs_or(key, env::var(key).ok().as_deref(), default)
}

/// Delay range written `min-max` in seconds, or a single fixed value
pub fn env_range(key: &str, default: SecsRange) -> Result<SecsRange> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("Invalid {key} value {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn parse_or<T>(key: &str, raw: Option<&str>, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}")),
    }
}

fn secs_or(key: &str, raw: Option<&str>, default: Duration) -> Result<Duration> {
    match raw {
        None => Ok(default),
        Some(raw) => {
            let secs: f64 = parse_or(key, Some(raw), 0.0)?;
            Duration::try_from_secs_f64(secs).map_err(|e| anyhow!("Invalid {key} value {raw:?}: {e}"))
        }
    }
}

/// Inclusive range of seconds, used for simulated link and execution delays
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecsRange {
    pub min: f64,
    pub max: f64,
}

impl SecsRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, delay: Duration) -> bool {
        let secs = delay.as_secs_f64();
        secs >= self.min && secs <= self.max
    }
}

impl fmt::Display for SecsRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}s", self.min, self.max)
    }
}

impl FromStr for SecsRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (min, max) = match s.split_once('-') {
            Some((min, max)) => (min.trim().parse::<f64>()?, max.trim().parse::<f64>()?),
            None => {
                let fixed = s.trim().parse::<f64>()?;
                (fixed, fixed)
            }
        };

        if !(min.is_finite() && max.is_finite()) || min < 0.0 {
            bail!("range bounds must be finite and non-negative");
        }
        if min > max {
            bail!("range minimum {min} exceeds maximum {max}");
        }
        Ok(Self { min, max })
    }
}
