//! Physical `(datasource, table)` addressing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, ShardingError};

/// Separator between datasource and table in the textual `ds.table` form.
const DELIMITER: char = '.';

/// One concrete shard location of a logical table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataNode {
    pub data_source_name: String,
    pub table_name: String,
}

impl DataNode {
    pub fn new(data_source_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            data_source_name: data_source_name.into(),
            table_name: table_name.into(),
        }
    }
}

impl FromStr for DataNode {
    type Err = ShardingError;

    /// Parses `ds.table`; anything other than exactly one delimiter is rejected.
    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let mut parts = trimmed.split(DELIMITER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ds), Some(table), None) if !ds.is_empty() && !table.is_empty() => {
                Ok(Self::new(ds, table))
            }
            _ => Err(ShardingError::config(format!(
                "invalid format for actual data node `{trimmed}`, expected `ds.table`"
            ))),
        }
    }
}

impl fmt::Display for DataNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.data_source_name, DELIMITER, self.table_name)
    }
}

/// Groups nodes by datasource, keeping each datasource's nodes in input order.
///
/// The returned map preserves datasource first-appearance order through the
/// accompanying key vector.
pub fn group_by_data_source(nodes: &[DataNode]) -> (Vec<String>, BTreeMap<String, Vec<DataNode>>) {
    let mut order = Vec::new();
    let mut groups: BTreeMap<String, Vec<DataNode>> = BTreeMap::new();
    for node in nodes {
        let entry = groups.entry(node.data_source_name.clone()).or_default();
        if entry.is_empty() {
            order.push(node.data_source_name.clone());
        }
        entry.push(node.clone());
    }
    (order, groups)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_data_node() {
        let node: DataNode = "ds_0.t_order_1".parse().expect("valid node");
        assert_eq!(node, DataNode::new("ds_0", "t_order_1"));
        assert_eq!(node.to_string(), "ds_0.t_order_1");
    }

    #[test]
    fn rejects_malformed_data_node() {
        assert!("ds_0".parse::<DataNode>().is_err());
        assert!("ds_0.a.b".parse::<DataNode>().is_err());
        assert!(".t_order".parse::<DataNode>().is_err());
    }

    #[test]
    fn groups_nodes_in_first_appearance_order() {
        let nodes = vec![
            DataNode::new("ds_1", "t_0"),
            DataNode::new("ds_0", "t_0"),
            DataNode::new("ds_1", "t_1"),
        ];
        let (order, groups) = group_by_data_source(&nodes);
        assert_eq!(order, vec!["ds_1".to_string(), "ds_0".to_string()]);
        assert_eq!(groups["ds_1"].len(), 2);
        assert_eq!(groups["ds_1"][1].table_name, "t_1");
    }
}
