//! Executor input: per-shard SQL units and their grouping.

use std::fmt;
use std::sync::Arc;

use shard_route::ShardingRule;

use crate::source::PhysicalStatement;
use crate::value::Value;

/// SQL text and parameters targeted at one datasource.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionUnit {
    pub data_source_name: String,
    pub sql: String,
    pub parameters: Vec<Value>,
}

impl ExecutionUnit {
    pub fn new(
        data_source_name: impl Into<String>,
        sql: impl Into<String>,
        parameters: Vec<Value>,
    ) -> Self {
        Self {
            data_source_name: data_source_name.into(),
            sql: sql.into(),
            parameters,
        }
    }
}

/// An execution unit bound to the statement that runs it.
#[derive(Clone)]
pub struct StatementExecuteUnit {
    pub execution_unit: ExecutionUnit,
    pub statement: Arc<dyn PhysicalStatement>,
}

impl StatementExecuteUnit {
    pub fn new(execution_unit: ExecutionUnit, statement: Arc<dyn PhysicalStatement>) -> Self {
        Self {
            execution_unit,
            statement,
        }
    }
}

impl fmt::Debug for StatementExecuteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementExecuteUnit")
            .field("execution_unit", &self.execution_unit)
            .finish_non_exhaustive()
    }
}

/// Ordered batch of inputs sharing dispatch context (usually one datasource).
#[derive(Clone, Debug)]
pub struct InputGroup<T> {
    pub inputs: Vec<T>,
}

impl<T> InputGroup<T> {
    pub fn new(inputs: Vec<T>) -> Self {
        Self { inputs }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// Statement-level facts the executor needs to merge per-unit outcomes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatementContext {
    /// Logical tables the statement touches.
    pub logic_tables: Vec<String>,
    /// Sum update counts across units; otherwise report the first unit's count.
    pub accumulate: bool,
}

impl StatementContext {
    pub fn new(logic_tables: Vec<String>, accumulate: bool) -> Self {
        Self {
            logic_tables,
            accumulate,
        }
    }

    /// Context for a statement over `logic_tables`, accumulating unless every
    /// table is a broadcast table.
    pub fn for_tables(rule: &ShardingRule, logic_tables: Vec<String>) -> Self {
        let accumulate = rule.is_need_accumulate(logic_tables.as_slice());
        Self::new(logic_tables, accumulate)
    }
}

impl Default for StatementContext {
    fn default() -> Self {
        Self::new(Vec::new(), true)
    }
}
