//! Checkpoint captured once a job's setup phase finishes.

use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::task::{TaskReport, TaskSource};

/// Everything needed to replay a job while skipping finished partitions.
///
/// A partition counts as finished only when both its input and output
/// reports are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub exec_task: TaskSource,
    pub input_task: TaskSource,
    #[serde(default)]
    pub filter_tasks: Vec<TaskSource>,
    /// Output schema of each filter, in chain order.
    #[serde(default)]
    pub filter_schemas: Vec<Schema>,
    pub output_task: TaskSource,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub input_reports: Vec<Option<TaskReport>>,
    pub output_reports: Vec<Option<TaskReport>>,
}

impl ResumeState {
    /// Fresh state with no partition reports recorded.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exec_task: TaskSource,
        input_task: TaskSource,
        filter_tasks: Vec<TaskSource>,
        filter_schemas: Vec<Schema>,
        output_task: TaskSource,
        input_schema: Schema,
        output_schema: Schema,
        partition_count: usize,
    ) -> Self {
        Self {
            exec_task,
            input_task,
            filter_tasks,
            filter_schemas,
            output_task,
            input_schema,
            output_schema,
            input_reports: vec![None; partition_count],
            output_reports: vec![None; partition_count],
        }
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.input_reports.len()
    }

    #[must_use]
    pub fn is_partition_complete(&self, partition: usize) -> bool {
        matches!(
            (self.input_reports.get(partition), self.output_reports.get(partition)),
            (Some(Some(_)), Some(Some(_)))
        )
    }

    /// Partitions that still need to run.
    #[must_use]
    pub fn pending_partitions(&self) -> Vec<usize> {
        (0..self.partition_count())
            .filter(|&i| !self.is_partition_complete(i))
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending_partitions().is_empty()
    }

    /// Record both reports of a finished partition.
    pub fn record_partition(&mut self, partition: usize, input: TaskReport, output: TaskReport) {
        self.input_reports[partition] = Some(input);
        self.output_reports[partition] = Some(output);
    }

    /// Input reports of every finished partition, in partition order.
    #[must_use]
    pub fn successful_input_reports(&self) -> Vec<TaskReport> {
        self.complete_reports(&self.input_reports)
    }

    /// Output reports of every finished partition, in partition order.
    #[must_use]
    pub fn successful_output_reports(&self) -> Vec<TaskReport> {
        self.complete_reports(&self.output_reports)
    }

    fn complete_reports(&self, reports: &[Option<TaskReport>]) -> Vec<TaskReport> {
        reports
            .iter()
            .enumerate()
            .filter(|(i, _)| self.is_partition_complete(*i))
            .filter_map(|(_, r)| r.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Type;

    fn state(partitions: usize) -> ResumeState {
        let schema = Schema::builder().add("id", Type::Long).build();
        ResumeState::new(
            TaskSource::new(),
            TaskSource::new(),
            Vec::new(),
            Vec::new(),
            TaskSource::new(),
            schema.clone(),
            schema,
            partitions,
        )
    }

    fn report(n: u64) -> TaskReport {
        let mut r = TaskReport::new();
        r.set("records", n);
        r
    }

    #[test]
    fn pending_excludes_recorded_partitions() {
        let mut s = state(4);
        s.record_partition(0, report(1), report(1));
        s.record_partition(2, report(3), report(3));
        assert_eq!(s.pending_partitions(), vec![1, 3]);
        assert!(!s.is_complete());
        assert_eq!(s.successful_output_reports(), vec![report(1), report(3)]);
    }

    #[test]
    fn half_recorded_partition_is_pending() {
        let mut s = state(2);
        s.input_reports[1] = Some(report(5));
        assert!(!s.is_partition_complete(1));
        assert!(s.successful_input_reports().is_empty());
    }

    #[test]
    fn json_roundtrip() {
        let mut s = state(2);
        s.record_partition(1, report(2), report(2));
        let text = serde_json::to_string(&s).unwrap();
        let back: ResumeState = serde_json::from_str(&text).unwrap();
        assert_eq!(back, s);
        assert_eq!(back.pending_partitions(), vec![0]);
    }
}
