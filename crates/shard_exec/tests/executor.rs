use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use shard_exec::{
    ColumnMetaData, ExecError, ExecutionUnit, ExecutorConfig, FailurePolicy, GeneratedKeys,
    InputGroup, PhysicalStatement, RawResultSet, SqlType, StatementContext, StatementExecuteUnit,
    StatementExecutor, Value, ValueType,
};
use shard_route::{ShardingRule, ShardingRuleConfiguration, TableRuleConfiguration};

/// Records calls shared by every statement of one test.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    keys: Mutex<Vec<GeneratedKeys>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Recorder {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct ScriptedStatement {
    data_source: String,
    behavior: Behavior,
    update_count: u64,
    has_result_set: bool,
    rows: Vec<i64>,
    delay: Duration,
    recorder: Arc<Recorder>,
}

impl ScriptedStatement {
    fn new(data_source: &str, recorder: &Arc<Recorder>) -> Self {
        Self {
            data_source: data_source.to_string(),
            behavior: Behavior::Succeed,
            update_count: 0,
            has_result_set: false,
            rows: Vec::new(),
            delay: Duration::ZERO,
            recorder: Arc::clone(recorder),
        }
    }

    fn failing(mut self) -> Self {
        self.behavior = Behavior::Fail;
        self
    }

    fn panicking(mut self) -> Self {
        self.behavior = Behavior::Panic;
        self
    }

    fn updating(mut self, count: u64) -> Self {
        self.update_count = count;
        self
    }

    fn with_result_set(mut self, has_result_set: bool) -> Self {
        self.has_result_set = has_result_set;
        self
    }

    fn with_rows(mut self, rows: &[i64]) -> Self {
        self.rows = rows.to_vec();
        self
    }

    fn delayed(mut self, millis: u64) -> Self {
        self.delay = Duration::from_millis(millis);
        self
    }

    async fn enter(&self) -> anyhow::Result<()> {
        let running = self.recorder.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.peak.fetch_max(running, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.recorder
            .calls
            .lock()
            .expect("calls lock")
            .push(self.data_source.clone());
        self.recorder.running.fetch_sub(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => bail!("{} is unavailable", self.data_source),
            Behavior::Panic => panic!("driver bug on {}", self.data_source),
        }
    }
}

struct RowsResultSet {
    rows: Vec<i64>,
    cursor: Option<usize>,
}

impl RawResultSet for RowsResultSet {
    fn metadata(&self) -> anyhow::Result<Vec<ColumnMetaData>> {
        Ok(vec![ColumnMetaData::new("id", SqlType::BigInt)])
    }

    fn next(&mut self) -> anyhow::Result<bool> {
        let next = self.cursor.map_or(0, |cursor| cursor + 1);
        self.cursor = Some(next);
        Ok(next < self.rows.len())
    }

    fn value(&self, _index: usize) -> anyhow::Result<Value> {
        self.cursor
            .and_then(|cursor| self.rows.get(cursor))
            .map(|id| Value::Long(*id))
            .ok_or_else(|| anyhow!("no current row"))
    }
}

#[async_trait]
impl PhysicalStatement for ScriptedStatement {
    async fn execute_query(
        &self,
        _sql: &str,
        _parameters: &[Value],
    ) -> anyhow::Result<Box<dyn RawResultSet>> {
        self.enter().await?;
        Ok(Box::new(RowsResultSet {
            rows: self.rows.clone(),
            cursor: None,
        }))
    }

    async fn execute_update(
        &self,
        _sql: &str,
        _parameters: &[Value],
        keys: &GeneratedKeys,
    ) -> anyhow::Result<u64> {
        self.recorder.keys.lock().expect("keys lock").push(keys.clone());
        self.enter().await?;
        Ok(self.update_count)
    }

    async fn execute(
        &self,
        _sql: &str,
        _parameters: &[Value],
        _keys: &GeneratedKeys,
    ) -> anyhow::Result<bool> {
        self.enter().await?;
        Ok(self.has_result_set)
    }
}

fn unit(statement: ScriptedStatement) -> StatementExecuteUnit {
    let execution_unit = ExecutionUnit::new(
        statement.data_source.clone(),
        "SELECT id FROM t_order WHERE id = ?",
        vec![Value::Long(1)],
    );
    StatementExecuteUnit::new(execution_unit, Arc::new(statement))
}

fn one_group(statements: Vec<ScriptedStatement>) -> Vec<InputGroup<StatementExecuteUnit>> {
    vec![InputGroup::new(statements.into_iter().map(unit).collect())]
}

fn executor(config: ExecutorConfig) -> StatementExecutor {
    StatementExecutor::new(config).expect("executor")
}

fn fail_fast() -> ExecutorConfig {
    ExecutorConfig::default().with_failure_policy(FailurePolicy::FailFast)
}

#[tokio::test]
async fn empty_input_is_a_no_op() {
    let executor = StatementExecutor::default();
    let context = StatementContext::default();
    assert!(executor.execute_query(&[]).await.expect("query").is_empty());
    assert_eq!(
        executor
            .execute_update(&[], &context, &GeneratedKeys::None)
            .await
            .expect("update"),
        0
    );
    assert!(!executor
        .execute(&[InputGroup::new(Vec::new())], &context, &GeneratedKeys::None)
        .await
        .expect("execute"));
}

#[tokio::test]
async fn update_counts_are_summed() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).updating(10),
        ScriptedStatement::new("ds_1", &recorder).updating(20),
    ]);
    let total = StatementExecutor::default()
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::AutoGenerated(true))
        .await
        .expect("update");
    assert_eq!(total, 30);
    let keys = recorder.keys.lock().expect("keys lock").clone();
    assert_eq!(keys, vec![GeneratedKeys::AutoGenerated(true); 2]);
}

#[tokio::test]
async fn summed_update_counts_saturate() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).updating(u64::MAX - 1),
        ScriptedStatement::new("ds_1", &recorder).updating(5),
    ]);
    let total = StatementExecutor::default()
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("update");
    assert_eq!(total, u64::MAX);
}

#[tokio::test]
async fn tolerant_update_skips_failed_units() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).updating(10),
        ScriptedStatement::new("ds_1", &recorder).updating(20).failing(),
    ]);
    let total = StatementExecutor::default()
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("tolerant update");
    assert_eq!(total, 10);
    assert_eq!(recorder.calls().len(), 2);
}

#[tokio::test]
async fn broadcast_update_reports_first_count() {
    let config = ShardingRuleConfiguration {
        tables: vec![TableRuleConfiguration::new("t_order", "ds_${0..1}.t_order")],
        broadcast_tables: vec!["t_config".to_string()],
        ..ShardingRuleConfiguration::default()
    };
    let rule = ShardingRule::new(&config, ["ds_0", "ds_1"]).expect("rule");
    let context = StatementContext::for_tables(&rule, vec!["T_CONFIG".to_string()]);
    assert!(!context.accumulate);
    assert!(StatementContext::for_tables(&rule, vec!["t_order".to_string()]).accumulate);

    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).updating(3),
        ScriptedStatement::new("ds_1", &recorder).updating(3),
    ]);
    let total = StatementExecutor::default()
        .execute_update(&groups, &context, &GeneratedKeys::ColumnNames(vec!["id".to_string()]))
        .await
        .expect("update");
    assert_eq!(total, 3);
}

#[tokio::test]
async fn fail_fast_surfaces_first_failure_after_all_units_finish() {
    let recorder = Arc::new(Recorder::default());
    let groups = vec![
        InputGroup::new(vec![unit(ScriptedStatement::new("ds_0", &recorder).updating(1))]),
        InputGroup::new(vec![
            unit(ScriptedStatement::new("ds_1", &recorder).failing()),
            unit(ScriptedStatement::new("ds_2", &recorder).failing().delayed(20)),
            unit(ScriptedStatement::new("ds_3", &recorder).updating(1).delayed(30)),
        ]),
    ];
    let err = executor(fail_fast())
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect_err("fail-fast");
    match err {
        ExecError::UnitFailure {
            index, data_source, ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(data_source, "ds_1");
        }
        other => panic!("unexpected error: {other}"),
    }
    // Siblings are never cancelled.
    assert_eq!(recorder.calls().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn query_results_keep_submission_order() {
    let recorder = Arc::new(Recorder::default());
    let groups = vec![
        InputGroup::new(vec![unit(
            ScriptedStatement::new("ds_0", &recorder)
                .with_rows(&[1, 2])
                .delayed(40),
        )]),
        InputGroup::new(vec![
            unit(ScriptedStatement::new("ds_1", &recorder).failing()),
            unit(ScriptedStatement::new("ds_2", &recorder).with_rows(&[7])),
        ]),
    ];
    let mut results = StatementExecutor::default()
        .execute_query(&groups)
        .await
        .expect("query");
    assert_eq!(results.len(), 3);
    assert!(results[1].is_none());

    let first = results[0].as_mut().expect("ds_0 result");
    assert!(first.next());
    assert_eq!(first.get_value(1, ValueType::Long).expect("id"), Value::Long(1));
    assert!(first.next());
    assert_eq!(first.get_value(1, ValueType::Long).expect("id"), Value::Long(2));
    assert!(!first.next());

    let third = results[2].as_mut().expect("ds_2 result");
    assert!(third.next());
    assert_eq!(third.get_value(1, ValueType::Long).expect("id"), Value::Long(7));
    assert!(!third.next());

    // The delayed first unit finishes last but still occupies slot 0.
    assert_eq!(recorder.calls().last().map(String::as_str), Some("ds_0"));
}

#[tokio::test]
async fn fail_fast_query_reports_failure() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).with_rows(&[1]),
        ScriptedStatement::new("ds_1", &recorder).failing(),
    ]);
    let err = executor(fail_fast())
        .execute_query(&groups)
        .await
        .expect_err("fail-fast");
    assert!(matches!(err, ExecError::UnitFailure { index: 1, .. }));
}

#[tokio::test]
async fn execute_mirrors_first_successful_unit() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).failing(),
        ScriptedStatement::new("ds_1", &recorder).with_result_set(true),
        ScriptedStatement::new("ds_2", &recorder).with_result_set(false),
    ]);
    assert!(StatementExecutor::default()
        .execute(&groups, &StatementContext::default(), &GeneratedKeys::ColumnIndexes(vec![1]))
        .await
        .expect("execute"));

    let all_failed = one_group(vec![ScriptedStatement::new("ds_0", &recorder).failing()]);
    assert!(!StatementExecutor::default()
        .execute(&all_failed, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("tolerant execute"));
}

#[tokio::test]
async fn panicking_unit_counts_as_failure() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).updating(5),
        ScriptedStatement::new("ds_1", &recorder).updating(5).panicking(),
    ]);
    let total = StatementExecutor::default()
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("tolerant update");
    assert_eq!(total, 5);

    let serial = executor(ExecutorConfig::default().with_serial(true));
    let total = serial
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("serial tolerant update");
    assert_eq!(total, 5);
}

#[tokio::test]
async fn serial_mode_runs_in_submission_order() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).updating(1).delayed(20),
        ScriptedStatement::new("ds_1", &recorder).updating(1),
        ScriptedStatement::new("ds_2", &recorder).updating(1).delayed(5),
    ]);
    let total = executor(ExecutorConfig::default().with_serial(true))
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("serial update");
    assert_eq!(total, 3);
    assert_eq!(recorder.calls(), vec!["ds_0", "ds_1", "ds_2"]);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn serial_fail_fast_stops_at_first_failure() {
    let recorder = Arc::new(Recorder::default());
    let groups = one_group(vec![
        ScriptedStatement::new("ds_0", &recorder).failing(),
        ScriptedStatement::new("ds_1", &recorder).updating(1),
    ]);
    let err = executor(fail_fast().with_serial(true))
        .execute_update(&groups, &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect_err("fail-fast");
    assert!(matches!(err, ExecError::UnitFailure { index: 0, .. }));
    assert_eq!(recorder.calls(), vec!["ds_0"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inflight_units_are_bounded() {
    let recorder = Arc::new(Recorder::default());
    let statements = (0..6)
        .map(|idx| {
            ScriptedStatement::new(&format!("ds_{idx}"), &recorder)
                .updating(1)
                .delayed(10)
        })
        .collect();
    let total = executor(ExecutorConfig::default().with_max_inflight_units(2))
        .execute_update(&one_group(statements), &StatementContext::default(), &GeneratedKeys::None)
        .await
        .expect("update");
    assert_eq!(total, 6);
    assert!(recorder.peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn zero_inflight_units_is_a_configuration_error() {
    let err = StatementExecutor::new(ExecutorConfig::default().with_max_inflight_units(0))
        .expect_err("invalid config");
    assert!(matches!(err, ExecError::Configuration(_)));
}
