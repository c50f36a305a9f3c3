//! Test-only stages with shared, inspectable state.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bulkhaul_engine::config::parser::parse_pipeline_str;
use bulkhaul_engine::plugin::{
    InputControl, InputPlugin, OutputControl, OutputPlugin, TransactionalPageOutput,
};
use bulkhaul_engine::{ExecSession, PipelineConfig, PluginRegistry};
use bulkhaul_page::{Page, PageOutput, PageReader};
use bulkhaul_types::{
    ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource, Type, Value,
};

/// How a stage should fail for one partition.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail this many attempts with a retryable error, then succeed.
    Transient(usize),
    /// Fail every attempt.
    Permanent,
}

#[derive(Debug, Default)]
pub struct Faults {
    faults: Mutex<HashMap<usize, Fault>>,
}

impl Faults {
    pub fn set(&self, partition: usize, fault: Fault) {
        self.faults.lock().unwrap().insert(partition, fault);
    }

    pub fn clear(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn check(&self, partition: usize, code: &str) -> Result<(), StageError> {
        let mut faults = self.faults.lock().unwrap();
        match faults.get_mut(&partition) {
            None => Ok(()),
            Some(Fault::Permanent) => Err(StageError::task(
                code,
                format!("partition {partition} failed"),
            )),
            Some(Fault::Transient(0)) => Ok(()),
            Some(Fault::Transient(left)) => {
                *left -= 1;
                Err(StageError::retryable_task(
                    code,
                    format!("partition {partition} failed transiently"),
                    Some(1),
                ))
            }
        }
    }
}

pub fn numbers_schema() -> Schema {
    Schema::builder()
        .add("partition", Type::Long)
        .add("n", Type::Long)
        .add("label", Type::String)
        .build()
}

/// Input with `partitions` partitions of `rows_per_partition` rows each.
/// Counts how often every partition ran and fails on request.
#[derive(Debug, Default)]
pub struct CountingInput {
    pub runs: Mutex<BTreeMap<usize, usize>>,
    pub faults: Faults,
    pub cleanups: AtomicUsize,
}

impl CountingInput {
    pub fn runs_of(&self, partition: usize) -> usize {
        self.runs
            .lock()
            .unwrap()
            .get(&partition)
            .copied()
            .unwrap_or(0)
    }
}

impl InputPlugin for CountingInput {
    fn transaction(
        &self,
        _session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError> {
        let partitions: usize = config.get_or("partitions", 4).unwrap();
        let rows: i64 = config.get_or("rows_per_partition", 3).unwrap();
        let mut task = TaskSource::new();
        task.set("rows_per_partition", rows);
        let reports = control.run(task, numbers_schema(), partitions)?;
        let mut diff = ConfigDiff::new();
        diff.set("completed_partitions", reports.len());
        Ok(diff)
    }

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError> {
        let reports = control.run(task.clone(), schema.clone(), partition_count)?;
        let mut diff = ConfigDiff::new();
        diff.set("completed_partitions", reports.len());
        Ok(diff)
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
        _partition_count: usize,
        _successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        output: &mut dyn PageOutput,
    ) -> Result<TaskReport, StageError> {
        *self.runs.lock().unwrap().entry(partition).or_default() += 1;
        let rows: i64 = task.get_or("rows_per_partition", 3).unwrap();

        let mut builder = session.page_builder(schema, output);
        let partition_value = i64::try_from(partition).unwrap();
        for n in 0..rows {
            builder.add_values(&[
                Value::Long(partition_value),
                Value::Long(n),
                Value::from(format!("p{partition}-{n}")),
            ])?;
        }
        self.faults.check(partition, "READ_FAILED")?;
        builder.finish()?;

        let mut report = TaskReport::new();
        report.set("records", rows);
        Ok(report)
    }
}

/// Output that decodes every committed partition into memory.
#[derive(Debug, Default)]
pub struct CollectingOutput {
    pub committed: Arc<Mutex<BTreeMap<usize, Vec<Vec<Value>>>>>,
    pub opens: Mutex<BTreeMap<usize, usize>>,
    pub faults: Arc<Faults>,
    pub cleanups: AtomicUsize,
    pub cleanup_reports: Mutex<Vec<usize>>,
}

impl CollectingOutput {
    pub fn opens_of(&self, partition: usize) -> usize {
        self.opens
            .lock()
            .unwrap()
            .get(&partition)
            .copied()
            .unwrap_or(0)
    }

    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.committed
            .lock()
            .unwrap()
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn committed_partitions(&self) -> Vec<usize> {
        self.committed.lock().unwrap().keys().copied().collect()
    }
}

struct CollectingPageOutput {
    partition: usize,
    reader: PageReader,
    rows: Vec<Vec<Value>>,
    committed: Arc<Mutex<BTreeMap<usize, Vec<Vec<Value>>>>>,
    faults: Arc<Faults>,
}

impl PageOutput for CollectingPageOutput {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.reader.reset(page);
        while self.reader.next_record() {
            self.rows.push(self.reader.record());
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StageError> {
        self.faults.check(self.partition, "WRITE_FAILED")
    }

    fn close(&mut self) {
        self.reader.release();
    }
}

impl TransactionalPageOutput for CollectingPageOutput {
    fn abort(&mut self) {
        self.rows.clear();
    }

    fn commit(&mut self) -> Result<TaskReport, StageError> {
        let rows = std::mem::take(&mut self.rows);
        let mut report = TaskReport::new();
        report.set("records", rows.len());
        self.committed.lock().unwrap().insert(self.partition, rows);
        Ok(report)
    }
}

impl OutputPlugin for CollectingOutput {
    fn transaction(
        &self,
        _session: &ExecSession,
        config: &ConfigSource,
        _schema: &Schema,
        _partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError> {
        let mut task = TaskSource::new();
        task.set("table", config.get_or("table", "t".to_string()).unwrap());
        let reports = control.run(task)?;
        let mut diff = ConfigDiff::new();
        diff.set("last_batch_partitions", reports.len());
        Ok(diff)
    }

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        _schema: &Schema,
        _partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError> {
        let reports = control.run(task.clone())?;
        let mut diff = ConfigDiff::new();
        diff.set("last_batch_partitions", reports.len());
        Ok(diff)
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
        _partition_count: usize,
        successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        self.cleanup_reports
            .lock()
            .unwrap()
            .push(successful_reports.len());
        Ok(())
    }

    fn open(
        &self,
        session: &ExecSession,
        _task: &TaskSource,
        schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn TransactionalPageOutput>, StageError> {
        *self.opens.lock().unwrap().entry(partition).or_default() += 1;
        Ok(Box::new(CollectingPageOutput {
            partition,
            reader: session.page_reader(schema),
            rows: Vec::new(),
            committed: Arc::clone(&self.committed),
            faults: Arc::clone(&self.faults),
        }))
    }
}

/// Registry with the built-ins plus `counting` and `collect`.
pub fn registry(input: &Arc<CountingInput>, output: &Arc<CollectingOutput>) -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    let input = Arc::clone(input);
    let output = Arc::clone(output);
    registry
        .register_input("counting", move || Arc::clone(&input) as Arc<dyn InputPlugin>)
        .register_output("collect", move || Arc::clone(&output) as Arc<dyn OutputPlugin>);
    registry
}

/// Pipeline over the counting input and collecting output.
pub fn counting_pipeline(name: &str, partitions: usize, exec: &str) -> PipelineConfig {
    parse_pipeline_str(&format!(
        r#"
pipeline: {name}
exec:
{exec}
in:
  type: counting
  partitions: {partitions}
  rows_per_partition: 3
out:
  type: collect
  table: users
state:
  backend: memory
"#
    ))
    .unwrap()
}

pub fn fixture_path(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/pipelines")
        .join(name)
}
