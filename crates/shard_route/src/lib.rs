//! Routing metadata for a sharded database: which physical
//! `(datasource, table)` pairs a logical table lives on, how each axis is
//! partitioned, and how keys are generated for new rows.
//!
//! Build a [`ShardingRule`] once from a [`ShardingRuleConfiguration`] and
//! the known datasource names, then share it behind an `Arc`.

pub mod algorithm;
pub mod config;
pub mod datanode;
pub mod error;
pub mod inline;
pub mod rule;
pub mod sharding_value;
pub mod strategy;
pub mod table_rule;

pub use algorithm::{AlgorithmRegistry, KeyGenerateAlgorithm, KeyValue, StandardShardingAlgorithm};
pub use config::{
    AlgorithmConfiguration, KeyGenerateStrategyConfiguration, Props, ShardingRuleConfiguration,
    ShardingStrategyConfiguration, TableRuleConfiguration,
};
pub use datanode::DataNode;
pub use error::{Result, ShardingError};
pub use rule::ShardingRule;
pub use sharding_value::{ShardingCondition, ShardingKey, ShardingValue};
pub use strategy::ShardingStrategy;
pub use table_rule::{BindingTableRule, TableRule};
