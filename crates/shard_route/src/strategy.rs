//! Per-axis sharding strategies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::algorithm::StandardShardingAlgorithm;
use crate::config::ShardingStrategyConfiguration;
use crate::error::{Result, ShardingError};
use crate::sharding_value::{ShardingCondition, ShardingValue};

/// How one axis (database or table) of a logical table is partitioned.
///
/// Resolution per table and axis is: the table's own strategy, then the
/// rule-wide default, then [`ShardingStrategy::None`].
#[derive(Clone, Debug, Default)]
pub enum ShardingStrategy {
    /// No partitioning on this axis.
    #[default]
    None,
    /// One sharding column mapped through a standard algorithm.
    Standard {
        sharding_column: String,
        algorithm_name: String,
        algorithm: Arc<dyn StandardShardingAlgorithm>,
    },
    /// Multi-column strategy; only its columns take part in routing decisions.
    Complex {
        sharding_columns: Vec<String>,
        algorithm_name: String,
    },
    /// Externally hinted routing; carries no columns.
    Hint { algorithm_name: String },
}

impl ShardingStrategy {
    /// Resolves a declared strategy against the rule's instantiated algorithms.
    pub(crate) fn from_config(
        config: &ShardingStrategyConfiguration,
        algorithms: &BTreeMap<String, Arc<dyn StandardShardingAlgorithm>>,
    ) -> Result<Self> {
        let lookup = |name: &str| {
            algorithms.get(name).cloned().ok_or_else(|| {
                ShardingError::config(format!("sharding algorithm `{name}` is not configured"))
            })
        };
        match config {
            ShardingStrategyConfiguration::None => Ok(Self::None),
            ShardingStrategyConfiguration::Standard {
                sharding_column,
                algorithm_name,
            } => {
                let column = sharding_column.trim();
                if column.is_empty() {
                    return Err(ShardingError::config(format!(
                        "standard strategy using `{algorithm_name}` has no sharding column"
                    )));
                }
                Ok(Self::Standard {
                    sharding_column: column.to_string(),
                    algorithm_name: algorithm_name.clone(),
                    algorithm: lookup(algorithm_name)?,
                })
            }
            ShardingStrategyConfiguration::Complex {
                sharding_columns,
                algorithm_name,
            } => {
                lookup(algorithm_name)?;
                let columns: Vec<String> = sharding_columns
                    .split(',')
                    .map(str::trim)
                    .filter(|column| !column.is_empty())
                    .map(str::to_string)
                    .collect();
                if columns.is_empty() {
                    return Err(ShardingError::config(format!(
                        "complex strategy using `{algorithm_name}` has no sharding columns"
                    )));
                }
                Ok(Self::Complex {
                    sharding_columns: columns,
                    algorithm_name: algorithm_name.clone(),
                })
            }
            ShardingStrategyConfiguration::Hint { algorithm_name } => {
                lookup(algorithm_name)?;
                Ok(Self::Hint {
                    algorithm_name: algorithm_name.clone(),
                })
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Columns this strategy shards on, as configured.
    pub fn sharding_columns(&self) -> Vec<&str> {
        match self {
            Self::None | Self::Hint { .. } => Vec::new(),
            Self::Standard {
                sharding_column, ..
            } => vec![sharding_column.as_str()],
            Self::Complex {
                sharding_columns, ..
            } => sharding_columns.iter().map(String::as_str).collect(),
        }
    }

    /// Case-insensitive membership test against [`Self::sharding_columns`].
    pub fn has_sharding_column(&self, column: &str) -> bool {
        self.sharding_columns()
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(column))
    }

    /// Narrows `available_targets` using the values bound to this strategy's
    /// column. Returned targets keep `available_targets` order.
    ///
    /// Without a value for the sharding column every target is returned, as
    /// the statement could touch any of them. Complex and hint strategies
    /// also return every target.
    pub fn do_sharding(
        &self,
        available_targets: &[String],
        values: &[ShardingValue],
    ) -> Result<Vec<String>> {
        let Self::Standard {
            sharding_column,
            algorithm_name,
            algorithm,
        } = self
        else {
            return Ok(available_targets.to_vec());
        };
        let Some(value) = values.iter().find(|value| value.matches_column(sharding_column)) else {
            return Ok(available_targets.to_vec());
        };
        let algorithm_error = |source: anyhow::Error| ShardingError::Algorithm {
            name: algorithm_name.clone(),
            source,
        };

        let mut routed = BTreeSet::new();
        match &value.condition {
            ShardingCondition::Precise(keys) => {
                for key in keys {
                    let target = algorithm
                        .do_precise_sharding(available_targets, sharding_column, key)
                        .map_err(algorithm_error)?
                        .ok_or_else(|| {
                            ShardingError::Routing(format!(
                                "`{sharding_column}` = {key} matches none of {available_targets:?}"
                            ))
                        })?;
                    routed.insert(target);
                }
            }
            ShardingCondition::Range { lower, upper } => {
                let targets = algorithm
                    .do_range_sharding(
                        available_targets,
                        sharding_column,
                        lower.as_ref(),
                        upper.as_ref(),
                    )
                    .map_err(algorithm_error)?;
                routed.extend(targets);
            }
        }
        Ok(available_targets
            .iter()
            .filter(|target| routed.contains(*target))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::ModShardingAlgorithm;
    use crate::config::Props;
    use crate::sharding_value::ShardingKey;

    fn mod_strategy(column: &str) -> ShardingStrategy {
        let mut props = Props::new();
        props.insert("sharding-count".to_string(), "2".to_string());
        ShardingStrategy::Standard {
            sharding_column: column.to_string(),
            algorithm_name: "ds_mod".to_string(),
            algorithm: Arc::new(ModShardingAlgorithm::from_props(&props).expect("mod")),
        }
    }

    fn targets() -> Vec<String> {
        vec!["ds_0".to_string(), "ds_1".to_string()]
    }

    #[test]
    fn none_strategy_routes_everywhere() {
        let routed = ShardingStrategy::None
            .do_sharding(&targets(), &[ShardingValue::precise("id", vec![ShardingKey::Int(1)])])
            .expect("route");
        assert_eq!(routed, targets());
    }

    #[test]
    fn standard_strategy_routes_precise_values_in_target_order() {
        let strategy = mod_strategy("user_id");
        let routed = strategy
            .do_sharding(
                &targets(),
                &[ShardingValue::precise("USER_ID", vec![ShardingKey::Int(3), ShardingKey::Int(2)])],
            )
            .expect("route");
        assert_eq!(routed, targets());
        let single = strategy
            .do_sharding(&targets(), &[ShardingValue::precise("user_id", vec![ShardingKey::Int(5)])])
            .expect("route");
        assert_eq!(single, vec!["ds_1".to_string()]);
    }

    #[test]
    fn missing_sharding_value_routes_everywhere() {
        let routed = mod_strategy("user_id")
            .do_sharding(&targets(), &[ShardingValue::precise("order_id", vec![ShardingKey::Int(1)])])
            .expect("route");
        assert_eq!(routed.len(), 2);
    }

    #[test]
    fn complex_strategy_exposes_columns() {
        let strategy = ShardingStrategy::Complex {
            sharding_columns: vec!["user_id".to_string(), "order_id".to_string()],
            algorithm_name: "complex".to_string(),
        };
        assert!(strategy.has_sharding_column("ORDER_ID"));
        assert!(!strategy.has_sharding_column("status"));
        assert!(ShardingStrategy::None.sharding_columns().is_empty());
    }

    #[test]
    fn unknown_algorithm_name_is_rejected() {
        let err = ShardingStrategy::from_config(
            &ShardingStrategyConfiguration::standard("id", "missing"),
            &BTreeMap::new(),
        )
        .expect_err("unknown algorithm");
        assert!(err.is_configuration());
    }
}
