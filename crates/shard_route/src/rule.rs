//! The routing authority: every table rule, binding group and broadcast table
//! of one configuration, plus rule-wide defaults.
//!
//! A [`ShardingRule`] is built once per configuration load and is read-only
//! afterwards, so it can be shared across query tasks behind an `Arc`.
//! Logical names are lower-cased at construction; every lookup afterwards is
//! an exact match on that canonical form through name-indexed maps.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::algorithm::{AlgorithmRegistry, KeyGenerateAlgorithm, KeyValue, StandardShardingAlgorithm};
use crate::config::{ShardingRuleConfiguration, ShardingStrategyConfiguration};
use crate::datanode::DataNode;
use crate::error::{Result, ShardingError};
use crate::sharding_value::ShardingValue;
use crate::strategy::ShardingStrategy;
use crate::table_rule::{BindingTableRule, TableRule};

/// Algorithm instances created from one configuration, keyed by configured name.
#[derive(Default)]
pub(crate) struct ResolvedAlgorithms {
    pub(crate) sharding: BTreeMap<String, Arc<dyn StandardShardingAlgorithm>>,
    pub(crate) key_generators: BTreeMap<String, Arc<dyn KeyGenerateAlgorithm>>,
}

impl ResolvedAlgorithms {
    fn create(config: &ShardingRuleConfiguration, registry: &AlgorithmRegistry) -> Result<Self> {
        let mut resolved = Self::default();
        for (name, algorithm) in &config.sharding_algorithms {
            resolved
                .sharding
                .insert(name.clone(), registry.create_sharding(name, algorithm)?);
        }
        for (name, generator) in &config.key_generators {
            resolved
                .key_generators
                .insert(name.clone(), registry.create_key_generator(name, generator)?);
        }
        Ok(resolved)
    }
}

#[derive(Debug)]
pub struct ShardingRule {
    data_source_names: Vec<String>,
    table_rules: Vec<Arc<TableRule>>,
    table_rule_index: HashMap<String, usize>,
    binding_table_rules: Vec<BindingTableRule>,
    binding_index: HashMap<String, usize>,
    broadcast_tables: Vec<String>,
    broadcast_index: HashSet<String>,
    default_database_strategy: ShardingStrategy,
    default_table_strategy: ShardingStrategy,
    default_generate_key_column: Option<String>,
    default_key_generator: Option<Arc<dyn KeyGenerateAlgorithm>>,
}

impl ShardingRule {
    /// Builds a rule with the built-in algorithms.
    pub fn new<I, S>(config: &ShardingRuleConfiguration, data_source_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_registry(config, data_source_names, &AlgorithmRegistry::default())
    }

    /// Builds a rule resolving algorithm types through `registry`.
    pub fn with_registry<I, S>(
        config: &ShardingRuleConfiguration,
        data_source_names: I,
        registry: &AlgorithmRegistry,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        for name in data_source_names {
            let name = name.into().trim().to_string();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Err(ShardingError::config("data source names must not be empty"));
        }

        let algorithms = ResolvedAlgorithms::create(config, registry)?;
        let resolve_default = |strategy: &Option<ShardingStrategyConfiguration>| match strategy {
            Some(strategy) => ShardingStrategy::from_config(strategy, &algorithms.sharding),
            None => Ok(ShardingStrategy::None),
        };
        let default_database_strategy = resolve_default(&config.default_database_strategy)?;
        let default_table_strategy = resolve_default(&config.default_table_strategy)?;

        let (default_generate_key_column, default_key_generator) =
            match &config.default_key_generate_strategy {
                Some(strategy) => {
                    let name = strategy.key_generator_name.trim();
                    let generator = algorithms.key_generators.get(name).cloned().ok_or_else(|| {
                        ShardingError::config(format!("default key generator `{name}` is not configured"))
                    })?;
                    let column = strategy.column.trim();
                    let column = (!column.is_empty()).then(|| column.to_string());
                    (column, Some(generator))
                }
                None => (None, None),
            };

        let mut table_rules = Vec::with_capacity(config.tables.len());
        let mut table_rule_index = HashMap::new();
        for table in &config.tables {
            let rule = TableRule::from_config(
                table,
                &names,
                &algorithms,
                default_generate_key_column.as_deref(),
            )?;
            let canonical = rule.logic_table().to_string();
            if table_rule_index.insert(canonical.clone(), table_rules.len()).is_some() {
                return Err(ShardingError::config(format!(
                    "logic table `{canonical}` is configured more than once"
                )));
            }
            table_rules.push(Arc::new(rule));
        }

        let mut broadcast_tables = Vec::new();
        let mut broadcast_index = HashSet::new();
        for table in &config.broadcast_tables {
            let canonical = table.trim().to_ascii_lowercase();
            if canonical.is_empty() || !broadcast_index.insert(canonical.clone()) {
                continue;
            }
            if table_rule_index.contains_key(&canonical) {
                return Err(ShardingError::config(format!(
                    "`{canonical}` cannot be both a sharded and a broadcast table"
                )));
            }
            broadcast_tables.push(canonical);
        }

        let mut binding_table_rules = Vec::new();
        let mut binding_index = HashMap::new();
        for group in &config.binding_tables {
            let mut members = Vec::new();
            for name in group.split(',').map(str::trim).filter(|name| !name.is_empty()) {
                let canonical = name.to_ascii_lowercase();
                let position = table_rule_index.get(&canonical).copied().ok_or_else(|| {
                    ShardingError::config(format!("binding table `{name}` has no table rule"))
                })?;
                if binding_index
                    .insert(canonical.clone(), binding_table_rules.len())
                    .is_some()
                {
                    return Err(ShardingError::config(format!(
                        "`{canonical}` belongs to more than one binding group"
                    )));
                }
                members.push(Arc::clone(&table_rules[position]));
            }
            if !members.is_empty() {
                binding_table_rules.push(BindingTableRule::new(members));
            }
        }

        tracing::info!(
            data_sources = names.len(),
            tables = table_rules.len(),
            binding_groups = binding_table_rules.len(),
            broadcast_tables = broadcast_tables.len(),
            "sharding rule built"
        );
        Ok(Self {
            data_source_names: names,
            table_rules,
            table_rule_index,
            binding_table_rules,
            binding_index,
            broadcast_tables,
            broadcast_index,
            default_database_strategy,
            default_table_strategy,
            default_generate_key_column,
            default_key_generator,
        })
    }

    pub fn data_source_names(&self) -> &[String] {
        &self.data_source_names
    }

    pub fn table_rules(&self) -> &[Arc<TableRule>] {
        &self.table_rules
    }

    pub fn binding_table_rules(&self) -> &[BindingTableRule] {
        &self.binding_table_rules
    }

    pub fn broadcast_tables(&self) -> &[String] {
        &self.broadcast_tables
    }

    pub fn default_key_generator(&self) -> Option<&Arc<dyn KeyGenerateAlgorithm>> {
        self.default_key_generator.as_ref()
    }

    pub fn default_generate_key_column(&self) -> Option<&str> {
        self.default_generate_key_column.as_deref()
    }

    pub fn find_table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.find_arc(logic_table).map(Arc::as_ref)
    }

    pub fn find_table_rule_by_actual_table(&self, actual_table: &str) -> Option<&TableRule> {
        self.table_rules
            .iter()
            .find(|rule| rule.is_existed(actual_table))
            .map(Arc::as_ref)
    }

    pub fn find_logic_table_by_actual_table(&self, actual_table: &str) -> Option<String> {
        self.find_table_rule_by_actual_table(actual_table)
            .map(|rule| rule.logic_table().to_string())
    }

    /// Sharded table rule, or a rule spread over every datasource for a
    /// broadcast table.
    pub fn get_table_rule(&self, logic_table: &str) -> Result<Arc<TableRule>> {
        if let Some(rule) = self.find_arc(logic_table) {
            return Ok(Arc::clone(rule));
        }
        if self.is_broadcast_table(logic_table) {
            return TableRule::broadcast(logic_table, &self.data_source_names).map(Arc::new);
        }
        Err(ShardingError::config(format!(
            "cannot find table rule and default data source with logic table `{logic_table}`"
        )))
    }

    pub fn database_sharding_strategy<'a>(&'a self, table_rule: &'a TableRule) -> &'a ShardingStrategy {
        table_rule
            .database_sharding_strategy()
            .unwrap_or(&self.default_database_strategy)
    }

    pub fn table_sharding_strategy<'a>(&'a self, table_rule: &'a TableRule) -> &'a ShardingStrategy {
        table_rule
            .table_sharding_strategy()
            .unwrap_or(&self.default_table_strategy)
    }

    /// Whether `column` drives either routing axis of `logic_table`.
    pub fn is_sharding_column(&self, column: &str, logic_table: &str) -> bool {
        let Some(rule) = self.find_table_rule(logic_table) else {
            return false;
        };
        self.database_sharding_strategy(rule).has_sharding_column(column)
            || self.table_sharding_strategy(rule).has_sharding_column(column)
    }

    /// True when every name is a sharded table and one binding group holds them all.
    pub fn is_all_binding_tables<S: AsRef<str>>(&self, logic_tables: &[S]) -> bool {
        let Some(first) = logic_tables.first() else {
            return false;
        };
        if logic_tables
            .iter()
            .any(|name| self.find_arc(name.as_ref()).is_none())
        {
            return false;
        }
        let Some(group) = self.binding_group_of(first.as_ref()) else {
            return false;
        };
        logic_tables
            .iter()
            .all(|name| self.binding_group_of(name.as_ref()) == Some(group))
    }

    pub fn is_all_broadcast_tables<S: AsRef<str>>(&self, logic_tables: &[S]) -> bool {
        !logic_tables.is_empty()
            && logic_tables
                .iter()
                .all(|name| self.is_broadcast_table(name.as_ref()))
    }

    pub fn is_broadcast_table(&self, logic_table: &str) -> bool {
        self.broadcast_index.contains(&canonical(logic_table))
    }

    pub fn find_binding_table_rule(&self, logic_table: &str) -> Option<&BindingTableRule> {
        self.binding_group_of(logic_table)
            .map(|index| &self.binding_table_rules[index])
    }

    /// Next key from the table's generator, falling back to the rule-wide default.
    pub fn generate_key(&self, logic_table: &str) -> Result<KeyValue> {
        let rule = self.find_table_rule(logic_table).ok_or_else(|| {
            ShardingError::config(format!("cannot find table rule with logic table `{logic_table}`"))
        })?;
        let generator = rule
            .key_generator()
            .or(self.default_key_generator.as_ref())
            .ok_or_else(|| {
                ShardingError::config(format!(
                    "logic table `{logic_table}` has no key generator and no default is configured"
                ))
            })?;
        Ok(generator.generate_key())
    }

    pub fn find_generate_key_column_name(&self, logic_table: &str) -> Option<String> {
        self.find_table_rule(logic_table)
            .and_then(TableRule::generate_key_column)
            .map(str::to_string)
    }

    /// First actual node of `logic_table`.
    pub fn data_node(&self, logic_table: &str) -> Result<DataNode> {
        let rule = self.get_table_rule(logic_table)?;
        rule.actual_data_nodes()
            .first()
            .cloned()
            .ok_or_else(|| ShardingError::config(format!("`{logic_table}` has no data node")))
    }

    /// First actual node of `logic_table` on `data_source_name`.
    pub fn data_node_in(&self, data_source_name: &str, logic_table: &str) -> Result<DataNode> {
        if !self.data_source_names.iter().any(|ds| ds == data_source_name) {
            return Err(ShardingError::config(format!(
                "data source `{data_source_name}` is not configured"
            )));
        }
        let rule = self.get_table_rule(logic_table)?;
        rule.actual_data_nodes()
            .iter()
            .find(|node| node.data_source_name == data_source_name)
            .cloned()
            .ok_or_else(|| {
                ShardingError::config(format!(
                    "`{logic_table}` has no data node on data source `{data_source_name}`"
                ))
            })
    }

    /// Names resolving to a sharded table rule, in input order and spelling.
    pub fn sharding_logic_table_names<S: AsRef<str>>(&self, logic_tables: &[S]) -> Vec<String> {
        logic_tables
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| self.find_arc(name).is_some())
            .map(str::to_string)
            .collect()
    }

    pub fn table_rule_exists<S: AsRef<str>>(&self, logic_tables: &[S]) -> bool {
        logic_tables
            .iter()
            .any(|name| self.find_arc(name.as_ref()).is_some())
    }

    /// Whether per-shard update counts should be summed. Broadcast writes hit
    /// every replica with the same statement, so their counts are not added up.
    pub fn is_need_accumulate<S: AsRef<str>>(&self, logic_tables: &[S]) -> bool {
        !self.is_all_broadcast_tables(logic_tables)
    }

    /// Applies the database then table strategy of `logic_table` and returns
    /// the routed nodes in actual-node order.
    pub fn route(&self, logic_table: &str, values: &[ShardingValue]) -> Result<Vec<DataNode>> {
        let rule = self.get_table_rule(logic_table)?;
        if self.is_broadcast_table(logic_table) {
            return Ok(rule.actual_data_nodes().to_vec());
        }
        let data_sources = self
            .database_sharding_strategy(&rule)
            .do_sharding(rule.actual_data_source_names(), values)?;
        let table_strategy = self.table_sharding_strategy(&rule);
        let mut routed = HashSet::new();
        for ds in &data_sources {
            for table in table_strategy.do_sharding(rule.actual_table_names(ds), values)? {
                routed.insert(DataNode::new(ds.clone(), table));
            }
        }
        tracing::debug!(
            logic_table = %rule.logic_table(),
            nodes = routed.len(),
            "routed logic table"
        );
        Ok(rule
            .actual_data_nodes()
            .iter()
            .filter(|node| routed.contains(*node))
            .cloned()
            .collect())
    }

    fn find_arc(&self, logic_table: &str) -> Option<&Arc<TableRule>> {
        self.table_rule_index
            .get(&canonical(logic_table))
            .map(|index| &self.table_rules[*index])
    }

    fn binding_group_of(&self, logic_table: &str) -> Option<usize> {
        self.binding_index.get(&canonical(logic_table)).copied()
    }
}

fn canonical(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlgorithmConfiguration, TableRuleConfiguration};

    #[test]
    fn empty_data_source_names_are_rejected() {
        let err = ShardingRule::new(&ShardingRuleConfiguration::default(), Vec::<String>::new())
            .expect_err("empty data sources");
        assert!(err.is_configuration());
    }

    #[test]
    fn duplicate_logic_tables_are_rejected() {
        let config = ShardingRuleConfiguration {
            tables: vec![
                TableRuleConfiguration::new("t_order", "ds_0.t_order"),
                TableRuleConfiguration::new("T_ORDER", "ds_0.t_order"),
            ],
            ..ShardingRuleConfiguration::default()
        };
        assert!(ShardingRule::new(&config, ["ds_0"]).is_err());
    }

    #[test]
    fn table_strategy_falls_back_to_default() {
        let config = ShardingRuleConfiguration {
            tables: vec![TableRuleConfiguration::new("t_order", "ds_0.t_order_${0..1}")],
            default_table_strategy: Some(ShardingStrategyConfiguration::standard("order_id", "t_mod")),
            sharding_algorithms: [(
                "t_mod".to_string(),
                AlgorithmConfiguration::new("MOD").with_prop("sharding-count", "2"),
            )]
            .into_iter()
            .collect(),
            ..ShardingRuleConfiguration::default()
        };
        let rule = ShardingRule::new(&config, ["ds_0"]).expect("rule");
        let table_rule = rule.find_table_rule("t_order").expect("t_order");
        assert!(rule.database_sharding_strategy(table_rule).is_none());
        assert_eq!(rule.table_sharding_strategy(table_rule).sharding_columns(), vec!["order_id"]);
        assert!(rule.is_sharding_column("ORDER_ID", "T_Order"));
        assert!(!rule.is_sharding_column("order_id", "t_unknown"));
    }
}
