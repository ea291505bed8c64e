//! Standard (single-column) sharding algorithms.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{anyhow, bail, Context};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::Props;
use crate::inline::InlineTemplate;
use crate::sharding_value::ShardingKey;

/// Maps one column's values onto a subset of available target names.
///
/// Targets are datasource names on the database axis and actual table names
/// on the table axis. Implementations must be stateless with respect to
/// routing calls; a rule shares one instance across every query thread.
pub trait StandardShardingAlgorithm: Send + Sync + fmt::Debug {
    /// Registry type name, e.g. `MOD`.
    fn type_name(&self) -> &str;

    /// Target for one exact value, or `None` when no available target matches.
    fn do_precise_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        key: &ShardingKey,
    ) -> anyhow::Result<Option<String>>;

    /// Targets for an inclusive range with optional open bounds.
    fn do_range_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        lower: Option<&ShardingKey>,
        upper: Option<&ShardingKey>,
    ) -> anyhow::Result<Vec<String>>;
}

/// `INLINE`: renders `algorithm-expression` for each precise value.
#[derive(Debug)]
pub struct InlineShardingAlgorithm {
    template: InlineTemplate,
    allow_range_query: bool,
}

pub const ALGORITHM_EXPRESSION: &str = "algorithm-expression";
pub const ALLOW_RANGE_QUERY: &str = "allow-range-query-with-inline-sharding";
pub const SHARDING_COUNT: &str = "sharding-count";

impl InlineShardingAlgorithm {
    pub fn from_props(props: &Props) -> anyhow::Result<Self> {
        let expression = props
            .get(ALGORITHM_EXPRESSION)
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| anyhow!("`{ALGORITHM_EXPRESSION}` is required"))?;
        let allow_range_query = match props.get(ALLOW_RANGE_QUERY) {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .with_context(|| format!("invalid `{ALLOW_RANGE_QUERY}` value: {raw}"))?,
            None => false,
        };
        Ok(Self {
            template: InlineTemplate::parse(expression)?,
            allow_range_query,
        })
    }
}

impl StandardShardingAlgorithm for InlineShardingAlgorithm {
    fn type_name(&self) -> &str {
        "INLINE"
    }

    fn do_precise_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        key: &ShardingKey,
    ) -> anyhow::Result<Option<String>> {
        let rendered = self.template.render(column, key)?;
        Ok(find_target(available_targets, |target| target.eq_ignore_ascii_case(&rendered)))
    }

    fn do_range_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        _lower: Option<&ShardingKey>,
        _upper: Option<&ShardingKey>,
    ) -> anyhow::Result<Vec<String>> {
        if !self.allow_range_query {
            bail!("range condition on `{column}` is not supported by inline sharding, set `{ALLOW_RANGE_QUERY}` to route it everywhere");
        }
        Ok(available_targets.to_vec())
    }
}

/// `MOD`: picks the target whose suffix equals `value % sharding-count`.
#[derive(Debug)]
pub struct ModShardingAlgorithm {
    sharding_count: i64,
}

impl ModShardingAlgorithm {
    pub fn from_props(props: &Props) -> anyhow::Result<Self> {
        Ok(Self {
            sharding_count: parse_sharding_count(props)?,
        })
    }
}

impl StandardShardingAlgorithm for ModShardingAlgorithm {
    fn type_name(&self) -> &str {
        "MOD"
    }

    fn do_precise_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        key: &ShardingKey,
    ) -> anyhow::Result<Option<String>> {
        let value = key
            .as_i64()
            .ok_or_else(|| anyhow!("value `{key}` of `{column}` is not numeric"))?;
        let suffix = value.rem_euclid(self.sharding_count);
        Ok(find_target(available_targets, |target| has_suffix(target, suffix)))
    }

    fn do_range_sharding(
        &self,
        available_targets: &[String],
        column: &str,
        lower: Option<&ShardingKey>,
        upper: Option<&ShardingKey>,
    ) -> anyhow::Result<Vec<String>> {
        let bounds = match (lower, upper) {
            (Some(lower), Some(upper)) => {
                let low = lower
                    .as_i64()
                    .ok_or_else(|| anyhow!("lower bound of `{column}` is not numeric"))?;
                let high = upper
                    .as_i64()
                    .ok_or_else(|| anyhow!("upper bound of `{column}` is not numeric"))?;
                Some((low, high))
            }
            _ => None,
        };
        // Open ranges and ranges wider than the modulus touch every shard.
        let Some((low, high)) = bounds.filter(|(low, high)| {
            high.checked_sub(*low)
                .is_some_and(|span| span >= 0 && span < self.sharding_count)
        }) else {
            return Ok(available_targets.to_vec());
        };
        let suffixes: BTreeSet<i64> = (low..=high)
            .map(|value| value.rem_euclid(self.sharding_count))
            .collect();
        Ok(available_targets
            .iter()
            .filter(|target| suffixes.iter().any(|suffix| has_suffix(target, *suffix)))
            .cloned()
            .collect())
    }
}

/// `HASH_MOD`: XXH3-64 of the textual key modulo `sharding-count`.
///
/// XXH3 is a fixed, published function, so placement survives toolchain
/// and process changes.
#[derive(Debug)]
pub struct HashModShardingAlgorithm {
    sharding_count: i64,
}

impl HashModShardingAlgorithm {
    pub fn from_props(props: &Props) -> anyhow::Result<Self> {
        Ok(Self {
            sharding_count: parse_sharding_count(props)?,
        })
    }
}

impl StandardShardingAlgorithm for HashModShardingAlgorithm {
    fn type_name(&self) -> &str {
        "HASH_MOD"
    }

    fn do_precise_sharding(
        &self,
        available_targets: &[String],
        _column: &str,
        key: &ShardingKey,
    ) -> anyhow::Result<Option<String>> {
        let suffix = (xxh3_64(key.to_string().as_bytes()) % self.sharding_count as u64) as i64;
        Ok(find_target(available_targets, |target| has_suffix(target, suffix)))
    }

    fn do_range_sharding(
        &self,
        available_targets: &[String],
        _column: &str,
        _lower: Option<&ShardingKey>,
        _upper: Option<&ShardingKey>,
    ) -> anyhow::Result<Vec<String>> {
        Ok(available_targets.to_vec())
    }
}

fn parse_sharding_count(props: &Props) -> anyhow::Result<i64> {
    let raw = props
        .get(SHARDING_COUNT)
        .ok_or_else(|| anyhow!("`{SHARDING_COUNT}` is required"))?;
    let count: i64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid `{SHARDING_COUNT}` value: {raw}"))?;
    if count <= 0 {
        bail!("`{SHARDING_COUNT}` must be positive, got {count}");
    }
    Ok(count)
}

/// `t_order_3` and `3` both carry suffix 3; `t_order_13` does not.
fn has_suffix(target: &str, suffix: i64) -> bool {
    let suffix = suffix.to_string();
    target == suffix
        || target
            .strip_suffix(suffix.as_str())
            .is_some_and(|head| head.ends_with('_'))
}

fn find_target(available_targets: &[String], pred: impl Fn(&str) -> bool) -> Option<String> {
    available_targets.iter().find(|target| pred(target)).cloned()
}
