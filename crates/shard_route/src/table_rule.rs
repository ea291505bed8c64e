//! Logical-to-physical table mapping.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::algorithm::KeyGenerateAlgorithm;
use crate::config::TableRuleConfiguration;
use crate::datanode::{group_by_data_source, DataNode};
use crate::error::{Result, ShardingError};
use crate::inline;
use crate::rule::ResolvedAlgorithms;
use crate::strategy::ShardingStrategy;

/// One logical table and the ordered physical nodes it is partitioned over.
#[derive(Clone, Debug)]
pub struct TableRule {
    logic_table: String,
    actual_data_nodes: Vec<DataNode>,
    /// Lower-cased actual table names.
    actual_tables: HashSet<String>,
    /// `(datasource, lower-cased table)` -> position in `actual_data_nodes`.
    data_node_index: HashMap<(String, String), usize>,
    actual_data_source_names: Vec<String>,
    data_source_to_tables: BTreeMap<String, Vec<String>>,
    database_sharding_strategy: Option<ShardingStrategy>,
    table_sharding_strategy: Option<ShardingStrategy>,
    generate_key_column: Option<String>,
    key_generator_name: Option<String>,
    key_generator: Option<Arc<dyn KeyGenerateAlgorithm>>,
}

impl TableRule {
    /// Rule over explicit nodes; the logical name is canonicalized to lower case.
    pub fn new(logic_table: &str, actual_data_nodes: Vec<DataNode>) -> Result<Self> {
        let logic_table = logic_table.trim().to_ascii_lowercase();
        if logic_table.is_empty() {
            return Err(ShardingError::config("logic table name must not be empty"));
        }
        if actual_data_nodes.is_empty() {
            return Err(ShardingError::config(format!(
                "logic table `{logic_table}` has no actual data nodes"
            )));
        }

        let mut actual_tables = HashSet::new();
        let mut data_node_index = HashMap::new();
        for (index, node) in actual_data_nodes.iter().enumerate() {
            let table = node.table_name.to_ascii_lowercase();
            actual_tables.insert(table.clone());
            if data_node_index
                .insert((node.data_source_name.clone(), table), index)
                .is_some()
            {
                return Err(ShardingError::config(format!(
                    "logic table `{logic_table}` lists data node `{node}` twice"
                )));
            }
        }
        let (actual_data_source_names, groups) = group_by_data_source(&actual_data_nodes);
        let data_source_to_tables = groups
            .into_iter()
            .map(|(ds, nodes)| (ds, nodes.into_iter().map(|node| node.table_name).collect()))
            .collect();

        Ok(Self {
            logic_table,
            actual_data_nodes,
            actual_tables,
            data_node_index,
            actual_data_source_names,
            data_source_to_tables,
            database_sharding_strategy: None,
            table_sharding_strategy: None,
            generate_key_column: None,
            key_generator_name: None,
            key_generator: None,
        })
    }

    /// Spreads the logical table as `{ds}.{logic_table}` over every datasource.
    pub fn broadcast(logic_table: &str, data_source_names: &[String]) -> Result<Self> {
        let table = logic_table.trim().to_ascii_lowercase();
        let nodes = data_source_names
            .iter()
            .map(|ds| DataNode::new(ds.clone(), table.clone()))
            .collect();
        Self::new(&table, nodes)
    }

    pub(crate) fn from_config(
        config: &TableRuleConfiguration,
        data_source_names: &[String],
        algorithms: &ResolvedAlgorithms,
        default_generate_key_column: Option<&str>,
    ) -> Result<Self> {
        let expression = config.actual_data_nodes.trim();
        let table_strategy = config
            .table_strategy
            .as_ref()
            .map(|strategy| ShardingStrategy::from_config(strategy, &algorithms.sharding))
            .transpose()?;
        let database_strategy = config
            .database_strategy
            .as_ref()
            .map(|strategy| ShardingStrategy::from_config(strategy, &algorithms.sharding))
            .transpose()?;

        let mut rule = if expression.is_empty() {
            if table_strategy.as_ref().is_some_and(|strategy| !strategy.is_none()) {
                return Err(ShardingError::config(format!(
                    "actual data nodes must be configured to shard tables of `{}`",
                    config.logic_table
                )));
            }
            Self::broadcast(&config.logic_table, data_source_names)?
        } else {
            let nodes = inline::split_and_evaluate(expression)?
                .iter()
                .map(|raw| raw.parse::<DataNode>())
                .collect::<Result<Vec<_>>>()?;
            Self::new(&config.logic_table, nodes)?
        };

        if let Some(node) = rule
            .actual_data_nodes
            .iter()
            .find(|node| !data_source_names.contains(&node.data_source_name))
        {
            return Err(ShardingError::config(format!(
                "data node `{node}` of `{}` references unknown datasource `{}`",
                rule.logic_table, node.data_source_name
            )));
        }

        rule.database_sharding_strategy = database_strategy;
        rule.table_sharding_strategy = table_strategy;
        match &config.key_generate_strategy {
            Some(key_strategy) => {
                let name = key_strategy.key_generator_name.trim();
                let generator = algorithms.key_generators.get(name).cloned().ok_or_else(|| {
                    ShardingError::config(format!(
                        "key generator `{name}` of `{}` is not configured",
                        rule.logic_table
                    ))
                })?;
                let column = key_strategy.column.trim();
                rule.generate_key_column = (!column.is_empty())
                    .then(|| column.to_string())
                    .or_else(|| default_generate_key_column.map(str::to_string));
                rule.key_generator_name = Some(name.to_string());
                rule.key_generator = Some(generator);
            }
            None => {
                rule.generate_key_column = default_generate_key_column.map(str::to_string);
            }
        }
        Ok(rule)
    }

    pub fn logic_table(&self) -> &str {
        &self.logic_table
    }

    pub fn actual_data_nodes(&self) -> &[DataNode] {
        &self.actual_data_nodes
    }

    /// Nodes grouped per datasource, datasources in first-appearance order.
    pub fn data_node_groups(&self) -> Vec<(String, Vec<DataNode>)> {
        let (order, mut groups) = group_by_data_source(&self.actual_data_nodes);
        order
            .into_iter()
            .filter_map(|ds| groups.remove(&ds).map(|nodes| (ds, nodes)))
            .collect()
    }

    pub fn actual_data_source_names(&self) -> &[String] {
        &self.actual_data_source_names
    }

    /// Actual tables on one datasource, in node order; empty for a foreign datasource.
    pub fn actual_table_names(&self, data_source_name: &str) -> &[String] {
        self.data_source_to_tables
            .get(data_source_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Position of `(ds, actual_table)` within [`Self::actual_data_nodes`].
    pub fn find_actual_table_index(&self, data_source_name: &str, actual_table: &str) -> Option<usize> {
        self.data_node_index
            .get(&(data_source_name.to_string(), actual_table.to_ascii_lowercase()))
            .copied()
    }

    pub fn is_existed(&self, actual_table: &str) -> bool {
        self.actual_tables.contains(&actual_table.to_ascii_lowercase())
    }

    pub fn database_sharding_strategy(&self) -> Option<&ShardingStrategy> {
        self.database_sharding_strategy.as_ref()
    }

    pub fn table_sharding_strategy(&self) -> Option<&ShardingStrategy> {
        self.table_sharding_strategy.as_ref()
    }

    pub fn generate_key_column(&self) -> Option<&str> {
        self.generate_key_column.as_deref()
    }

    pub fn key_generator_name(&self) -> Option<&str> {
        self.key_generator_name.as_deref()
    }

    pub fn key_generator(&self) -> Option<&Arc<dyn KeyGenerateAlgorithm>> {
        self.key_generator.as_ref()
    }
}

/// Logical tables that are always sharded identically.
#[derive(Clone, Debug)]
pub struct BindingTableRule {
    table_rules: Vec<Arc<TableRule>>,
}

impl BindingTableRule {
    pub(crate) fn new(table_rules: Vec<Arc<TableRule>>) -> Self {
        Self { table_rules }
    }

    pub fn table_rules(&self) -> &[Arc<TableRule>] {
        &self.table_rules
    }

    pub fn has_logic_table(&self, logic_table: &str) -> bool {
        self.find(logic_table).is_some()
    }

    pub fn logic_tables(&self) -> Vec<&str> {
        self.table_rules.iter().map(|rule| rule.logic_table()).collect()
    }

    /// Actual table of `logic_table` sitting at the same node position that
    /// `other_actual_table` occupies in `other_logic_table`.
    pub fn binding_actual_table(
        &self,
        data_source_name: &str,
        logic_table: &str,
        other_logic_table: &str,
        other_actual_table: &str,
    ) -> Result<String> {
        let other = self.find(other_logic_table).ok_or_else(|| {
            ShardingError::config(format!("`{other_logic_table}` is not part of this binding group"))
        })?;
        let target = self.find(logic_table).ok_or_else(|| {
            ShardingError::config(format!("`{logic_table}` is not part of this binding group"))
        })?;
        let index = other
            .find_actual_table_index(data_source_name, other_actual_table)
            .ok_or_else(|| {
                ShardingError::config(format!(
                    "actual table `{data_source_name}.{other_actual_table}` is not a node of `{other_logic_table}`"
                ))
            })?;
        target
            .actual_data_nodes()
            .get(index)
            .filter(|node| node.data_source_name == data_source_name)
            .map(|node| node.table_name.to_ascii_lowercase())
            .ok_or_else(|| {
                ShardingError::config(format!(
                    "`{logic_table}` has no binding actual table for `{data_source_name}.{other_actual_table}`"
                ))
            })
    }

    fn find(&self, logic_table: &str) -> Option<&Arc<TableRule>> {
        let canonical = logic_table.trim().to_ascii_lowercase();
        self.table_rules
            .iter()
            .find(|rule| rule.logic_table == canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_sources() -> Vec<String> {
        vec!["ds_0".to_string(), "ds_1".to_string()]
    }

    fn rule(logic: &str, nodes: &str) -> TableRule {
        TableRule::from_config(
            &TableRuleConfiguration::new(logic, nodes),
            &data_sources(),
            &ResolvedAlgorithms::default(),
            None,
        )
        .expect("table rule")
    }

    #[test]
    fn indexes_actual_nodes() {
        let rule = rule("T_Order", "ds_${0..1}.t_order_${0..1}");
        assert_eq!(rule.logic_table(), "t_order");
        assert_eq!(rule.actual_data_nodes().len(), 4);
        assert_eq!(rule.actual_data_source_names(), data_sources().as_slice());
        assert_eq!(rule.actual_table_names("ds_1"), ["t_order_0", "t_order_1"]);
        assert!(rule.actual_table_names("ds_9").is_empty());
        assert_eq!(rule.find_actual_table_index("ds_1", "T_ORDER_0"), Some(2));
        assert!(rule.is_existed("T_ORDER_1"));
        assert!(!rule.is_existed("t_order_2"));
        let groups = rule.data_node_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "ds_0");
    }

    #[test]
    fn empty_expression_spreads_over_every_datasource() {
        let rule = rule("t_config", "");
        assert_eq!(
            rule.actual_data_nodes(),
            [DataNode::new("ds_0", "t_config"), DataNode::new("ds_1", "t_config")]
        );
    }

    #[test]
    fn unknown_datasource_is_rejected() {
        let err = TableRule::from_config(
            &TableRuleConfiguration::new("t_order", "ds_${0..2}.t_order"),
            &data_sources(),
            &ResolvedAlgorithms::default(),
            None,
        )
        .expect_err("ds_2 is not configured");
        assert!(err.is_configuration());
    }

    #[test]
    fn binding_actual_table_uses_same_index() {
        let order = Arc::new(rule("t_order", "ds_${0..1}.t_order_${0..1}"));
        let item = Arc::new(rule("t_order_item", "ds_${0..1}.t_order_item_${0..1}"));
        let binding = BindingTableRule::new(vec![order, item]);
        assert!(binding.has_logic_table("T_ORDER_ITEM"));
        assert_eq!(
            binding
                .binding_actual_table("ds_1", "t_order_item", "t_order", "t_order_1")
                .expect("binding"),
            "t_order_item_1"
        );
        assert!(binding
            .binding_actual_table("ds_1", "t_order_item", "t_order", "t_order_7")
            .is_err());
        assert_eq!(binding.logic_tables(), vec!["t_order", "t_order_item"]);
    }
}
