//! Fan-out/fan-in execution of per-shard statements.
//!
//! Every unit of a call runs as its own tokio task, bounded by a semaphore,
//! and the caller awaits all of them. Outcomes are written into slots indexed
//! by submission order (group-major, then within-group), so the merged result
//! never depends on completion order. Failed units are logged and then either
//! folded into a neutral contribution or, under fail-fast, reported as the
//! call's error once every dispatched unit has finished.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::Semaphore;

use crate::config::{ExecutorConfig, FailurePolicy};
use crate::error::{ExecError, Result};
use crate::query_result::MemoryQueryResult;
use crate::source::{GeneratedKeys, PhysicalStatement};
use crate::unit::{ExecutionUnit, InputGroup, StatementContext, StatementExecuteUnit};

/// Runs execution units against their bound physical statements.
#[derive(Clone, Debug, Default)]
pub struct StatementExecutor {
    config: ExecutorConfig,
}

impl StatementExecutor {
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        if config.max_inflight_units == 0 {
            return Err(ExecError::Configuration(
                "max_inflight_units must be at least 1".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.config.failure_policy
    }

    /// One materialized result per unit, in submission order; `None` marks a
    /// unit that failed under the tolerant policy.
    pub async fn execute_query(
        &self,
        groups: &[InputGroup<StatementExecuteUnit>],
    ) -> Result<Vec<Option<MemoryQueryResult>>> {
        self.run("query", groups, |statement, unit| async move {
            let raw = statement.execute_query(&unit.sql, &unit.parameters).await?;
            let result = MemoryQueryResult::new(raw)?;
            Ok::<_, anyhow::Error>(result)
        })
        .await
    }

    /// Affected rows: summed across units (saturating at `u64::MAX`), or the
    /// first successful unit's count when `context.accumulate` is false.
    pub async fn execute_update(
        &self,
        groups: &[InputGroup<StatementExecuteUnit>],
        context: &StatementContext,
        keys: &GeneratedKeys,
    ) -> Result<u64> {
        let counts = self
            .run("update", groups, |statement, unit| {
                let keys = keys.clone();
                async move {
                    statement
                        .execute_update(&unit.sql, &unit.parameters, &keys)
                        .await
                }
            })
            .await?;
        let mut succeeded = counts.into_iter().flatten();
        let total = if context.accumulate {
            succeeded.fold(0_u64, u64::saturating_add)
        } else {
            succeeded.next().unwrap_or(0)
        };
        tracing::debug!(
            tables = ?context.logic_tables,
            accumulate = context.accumulate,
            total,
            "update finished"
        );
        Ok(total)
    }

    /// Whether the first unit that did not fail produced a result set.
    pub async fn execute(
        &self,
        groups: &[InputGroup<StatementExecuteUnit>],
        context: &StatementContext,
        keys: &GeneratedKeys,
    ) -> Result<bool> {
        let outcomes = self
            .run("execute", groups, |statement, unit| {
                let keys = keys.clone();
                async move { statement.execute(&unit.sql, &unit.parameters, &keys).await }
            })
            .await?;
        let produced = outcomes.into_iter().flatten().next().unwrap_or(false);
        tracing::debug!(tables = ?context.logic_tables, produced, "execute finished");
        Ok(produced)
    }

    async fn run<T, F, Fut>(
        &self,
        kind: &'static str,
        groups: &[InputGroup<StatementExecuteUnit>],
        op: F,
    ) -> Result<Vec<Option<T>>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn PhysicalStatement>, ExecutionUnit) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let units: Vec<&StatementExecuteUnit> =
            groups.iter().flat_map(|group| group.inputs.iter()).collect();
        if units.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(
            kind,
            units = units.len(),
            groups = groups.len(),
            serial = self.config.serial,
            "dispatching execution units"
        );
        let outcomes = if self.config.serial {
            self.run_serial(&units, &op).await
        } else {
            self.run_concurrent(&units, &op).await
        };
        self.merge(kind, &units, outcomes)
    }

    /// Runs units one after another on the calling task. Under fail-fast the
    /// remaining units are not started once one fails.
    async fn run_serial<T, F, Fut>(
        &self,
        units: &[&StatementExecuteUnit],
        op: &F,
    ) -> Vec<Option<anyhow::Result<T>>>
    where
        F: Fn(Arc<dyn PhysicalStatement>, ExecutionUnit) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut outcomes = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            tracing::debug!(unit = index, ds = %unit.execution_unit.data_source_name, "executing unit");
            let fut = op(Arc::clone(&unit.statement), unit.execution_unit.clone());
            let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("execution unit panicked")),
            };
            let failed = outcome.is_err();
            outcomes.push(Some(outcome));
            if failed && self.config.failure_policy == FailurePolicy::FailFast {
                break;
            }
        }
        outcomes.resize_with(units.len(), || None);
        outcomes
    }

    async fn run_concurrent<T, F, Fut>(
        &self,
        units: &[&StatementExecuteUnit],
        op: &F,
    ) -> Vec<Option<anyhow::Result<T>>>
    where
        T: Send + 'static,
        F: Fn(Arc<dyn PhysicalStatement>, ExecutionUnit) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let inflight = Arc::new(Semaphore::new(self.config.max_inflight_units));
        let mut tasks = FuturesUnordered::new();
        for (index, unit) in units.iter().enumerate() {
            let permit = match Arc::clone(&inflight).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            tracing::debug!(unit = index, ds = %unit.execution_unit.data_source_name, "dispatching unit");
            let fut = op(Arc::clone(&unit.statement), unit.execution_unit.clone());
            let handle = tokio::spawn(async move {
                let _permit = permit;
                fut.await
            });
            tasks.push(async move { (index, handle.await) });
        }

        let mut outcomes: Vec<Option<anyhow::Result<T>>> = Vec::with_capacity(units.len());
        outcomes.resize_with(units.len(), || None);
        while let Some((index, joined)) = tasks.next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => Err(anyhow!("execution unit panicked")),
                Err(err) => Err(anyhow::Error::new(err).context("execution unit task cancelled")),
            };
            outcomes[index] = Some(outcome);
        }
        outcomes
    }

    /// Applies the failure policy to per-unit outcomes, keeping slot order.
    fn merge<T>(
        &self,
        kind: &'static str,
        units: &[&StatementExecuteUnit],
        outcomes: Vec<Option<anyhow::Result<T>>>,
    ) -> Result<Vec<Option<T>>> {
        let mut merged = Vec::with_capacity(outcomes.len());
        let mut first_failure = None;
        for (index, (unit, outcome)) in units.iter().zip(outcomes).enumerate() {
            match outcome {
                Some(Ok(value)) => merged.push(Some(value)),
                Some(Err(err)) => {
                    tracing::warn!(
                        kind,
                        unit = index,
                        ds = %unit.execution_unit.data_source_name,
                        error = ?err,
                        "execution unit failed"
                    );
                    if first_failure.is_none() {
                        first_failure = Some(ExecError::UnitFailure {
                            index,
                            data_source: unit.execution_unit.data_source_name.clone(),
                            sql: unit.execution_unit.sql.clone(),
                            source: err,
                        });
                    }
                    merged.push(None);
                }
                // Not started: serial fail-fast stopped before reaching it.
                None => merged.push(None),
            }
        }
        match (self.config.failure_policy, first_failure) {
            (FailurePolicy::FailFast, Some(failure)) => Err(failure),
            _ => Ok(merged),
        }
    }
}
