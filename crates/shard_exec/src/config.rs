//! Executor configuration.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// How per-unit failures affect a batch outcome.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// A failed unit contributes `None`, `0` or `false` and siblings are unaffected.
    #[default]
    Tolerant,
    /// The first failure in submission order becomes the call's error.
    FailFast,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tolerant" => Ok(Self::Tolerant),
            "fail-fast" | "fail_fast" | "failfast" => Ok(Self::FailFast),
            other => bail!("unknown failure policy `{other}`, expected `tolerant` or `fail-fast`"),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tolerant => "tolerant",
            Self::FailFast => "fail-fast",
        })
    }
}

/// Executor-wide settings, fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub failure_policy: FailurePolicy,
    /// Upper bound on units running at once across one call.
    pub max_inflight_units: usize,
    /// Run units one at a time on the calling task, e.g. when a transaction
    /// pins every unit to one connection.
    pub serial: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Tolerant,
            max_inflight_units: 64,
            serial: false,
        }
    }
}

impl ExecutorConfig {
    /// Reads `SHARD_EXEC_*` variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let failure_policy = match lookup("SHARD_EXEC_FAILURE_POLICY") {
            Some(raw) => raw
                .parse()
                .context("invalid SHARD_EXEC_FAILURE_POLICY")?,
            None => defaults.failure_policy,
        };
        let max_inflight_units = parse_usize(
            lookup("SHARD_EXEC_MAX_INFLIGHT_UNITS"),
            defaults.max_inflight_units,
        )?
        .max(1);
        let serial = parse_bool(lookup("SHARD_EXEC_SERIAL"), defaults.serial)?;
        Ok(Self {
            failure_policy,
            max_inflight_units,
            serial,
        })
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    pub fn with_max_inflight_units(mut self, max_inflight_units: usize) -> Self {
        self.max_inflight_units = max_inflight_units;
        self
    }

    pub fn with_serial(mut self, serial: bool) -> Self {
        self.serial = serial;
        self
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_bool(value: Option<String>, default_value: bool) -> Result<bool> {
    match value {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("invalid bool value: {raw}"),
        },
        None => Ok(default_value),
    }
}
