//! Declarative rule configuration consumed by [`crate::ShardingRule::new`].
//!
//! These structs only describe the rule; they are `Deserialize` so any loader
//! (YAML, JSON, a registry center) can produce them. Reading files is the
//! caller's concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Algorithm properties, keyed by kebab-case property name.
pub type Props = BTreeMap<String, String>;

/// Root configuration for one sharding rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShardingRuleConfiguration {
    /// Per-table rule definitions.
    pub tables: Vec<TableRuleConfiguration>,
    /// Binding groups written as comma-separated logical table names.
    pub binding_tables: Vec<String>,
    /// Logical tables replicated to every datasource.
    pub broadcast_tables: Vec<String>,
    pub default_database_strategy: Option<ShardingStrategyConfiguration>,
    pub default_table_strategy: Option<ShardingStrategyConfiguration>,
    pub default_key_generate_strategy: Option<KeyGenerateStrategyConfiguration>,
    /// Named sharding algorithm instances referenced by strategies.
    pub sharding_algorithms: BTreeMap<String, AlgorithmConfiguration>,
    /// Named key generator instances referenced by key-generate strategies.
    pub key_generators: BTreeMap<String, AlgorithmConfiguration>,
}

/// Definition of one logical table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableRuleConfiguration {
    pub logic_table: String,
    /// Inline expression such as `ds_${0..1}.t_order_${0..1}`; empty spreads
    /// the logical table over every datasource.
    pub actual_data_nodes: String,
    pub database_strategy: Option<ShardingStrategyConfiguration>,
    pub table_strategy: Option<ShardingStrategyConfiguration>,
    pub key_generate_strategy: Option<KeyGenerateStrategyConfiguration>,
}

impl TableRuleConfiguration {
    pub fn new(logic_table: impl Into<String>, actual_data_nodes: impl Into<String>) -> Self {
        Self {
            logic_table: logic_table.into(),
            actual_data_nodes: actual_data_nodes.into(),
            ..Self::default()
        }
    }
}

/// Strategy declaration for one routing axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ShardingStrategyConfiguration {
    None,
    #[serde(rename_all = "camelCase")]
    Standard {
        sharding_column: String,
        algorithm_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Complex {
        /// Comma-separated column list.
        sharding_columns: String,
        algorithm_name: String,
    },
    #[serde(rename_all = "camelCase")]
    Hint { algorithm_name: String },
}

impl ShardingStrategyConfiguration {
    pub fn standard(column: impl Into<String>, algorithm_name: impl Into<String>) -> Self {
        Self::Standard {
            sharding_column: column.into(),
            algorithm_name: algorithm_name.into(),
        }
    }
}

/// Column + named key generator for auto-generated keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyGenerateStrategyConfiguration {
    pub column: String,
    pub key_generator_name: String,
}

impl KeyGenerateStrategyConfiguration {
    pub fn new(column: impl Into<String>, key_generator_name: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            key_generator_name: key_generator_name.into(),
        }
    }
}

/// Algorithm type name (registry key) plus its properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmConfiguration {
    #[serde(rename = "type")]
    pub algorithm_type: String,
    pub props: Props,
}

impl AlgorithmConfiguration {
    pub fn new(algorithm_type: impl Into<String>) -> Self {
        Self {
            algorithm_type: algorithm_type.into(),
            props: Props::new(),
        }
    }

    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }
}
