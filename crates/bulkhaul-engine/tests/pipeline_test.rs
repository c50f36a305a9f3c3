//! End-to-end job tests over test stages: failure policies, resume,
//! retry and skip.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bulkhaul_engine::{BulkLoader, ExecutionOptions, PipelineError, PipelineOutcome};
use bulkhaul_types::Value;
use common::{counting_pipeline, registry, CollectingOutput, CountingInput, Fault};

fn loader() -> (Arc<CountingInput>, Arc<CollectingOutput>, BulkLoader) {
    let input = Arc::new(CountingInput::default());
    let output = Arc::new(CollectingOutput::default());
    let loader = BulkLoader::new(registry(&input, &output));
    (input, output, loader)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_partitions_commit() {
    let (input, output, loader) = loader();
    let config = counting_pipeline("all_ok", 4, "  max_threads: 2");

    let outcome = loader.run(&config, &ExecutionOptions::default()).await.unwrap();
    let PipelineOutcome::Run(result) = outcome else {
        panic!("expected run outcome");
    };

    assert_eq!(result.partition_count, 4);
    assert_eq!(result.records, 12);
    assert!(result.is_complete());
    assert!(!result.skipped);
    assert_eq!(output.committed_partitions(), vec![0, 1, 2, 3]);
    assert_eq!(output.rows().len(), 12);
    assert!(output.rows().contains(&vec![
        Value::Long(2),
        Value::Long(1),
        Value::from("p2-1"),
    ]));
    for p in 0..4 {
        assert_eq!(input.runs_of(p), 1);
    }

    // Diffs land under in/out and merge into the next config.
    assert_eq!(
        result.config_diff.get_nested("in").raw("completed_partitions"),
        Some(&serde_json::json!(4))
    );
    let next = result.next_config.clone().into_json();
    assert_eq!(next["out"]["last_batch_partitions"], 4);
    assert_eq!(next["out"]["table"], "users");

    // Cleanup runs once the job is done.
    assert_eq!(input.cleanups.load(Ordering::SeqCst), 1);
    assert_eq!(output.cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abort_policy_fails_job_and_keeps_resume_state() {
    let (_input, output, loader) = loader();
    output.faults.set(1, Fault::Permanent);
    let config = counting_pipeline("abort", 3, "  failure_policy: abort");

    let err = loader
        .run(&config, &ExecutionOptions::default())
        .await
        .unwrap_err();

    let PipelineError::Partial {
        resume_state,
        cause,
        records,
    } = &err
    else {
        panic!("expected partial failure, got {err}");
    };
    assert_eq!(cause.code, "WRITE_FAILED");
    assert_eq!(cause.details, Some(serde_json::json!({"partition": 1})));
    assert_eq!(resume_state.pending_partitions(), vec![1]);
    assert_eq!(*records, 6);
    assert!(resume_state.is_partition_complete(0));
    assert!(resume_state.is_partition_complete(2));
    assert!(!err.is_retryable());
    assert!(err.to_string().starts_with("1 of 3 partitions incomplete"));
    assert_eq!(output.cleanups.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allow_partial_reports_ignored_errors() {
    let (_input, output, loader) = loader();
    output.faults.set(0, Fault::Permanent);
    output.faults.set(2, Fault::Permanent);
    let config = counting_pipeline("partial", 4, "  failure_policy: allow_partial");

    let outcome = loader.run(&config, &ExecutionOptions::default()).await.unwrap();
    let PipelineOutcome::Run(result) = outcome else {
        panic!("expected run outcome");
    };

    assert_eq!(result.ignored_errors.len(), 2);
    assert!(result.ignored_errors.iter().all(|e| e.code == "WRITE_FAILED"));
    assert!(!result.is_complete());
    assert_eq!(result.records, 6);
    assert_eq!(output.committed_partitions(), vec![1, 3]);
    // Cleanup sees only the partitions that succeeded.
    assert_eq!(*output.cleanup_reports.lock().unwrap(), vec![2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_runs_only_pending_partitions() {
    let (input, output, loader) = loader();
    input.faults.set(1, Fault::Permanent);
    output.faults.set(3, Fault::Permanent);
    let config = counting_pipeline("resume", 4, "  max_retries: 0");

    let err = loader
        .run(&config, &ExecutionOptions::default())
        .await
        .unwrap_err();
    let resume_state = err.resume_state().cloned().unwrap();
    assert_eq!(resume_state.pending_partitions(), vec![1, 3]);
    assert_eq!(output.committed_partitions(), vec![0, 2]);

    input.faults.clear();
    output.faults.clear();
    let result = loader.resume(&config, resume_state).await.unwrap();

    assert!(result.is_complete());
    assert_eq!(result.partition_count, 4);
    assert_eq!(result.records, 6);
    assert_eq!(input.runs_of(0), 1);
    assert_eq!(input.runs_of(2), 1);
    assert_eq!(input.runs_of(1), 2);
    assert_eq!(input.runs_of(3), 2);
    assert_eq!(output.opens_of(0), 1);
    assert_eq!(output.committed_partitions(), vec![0, 1, 2, 3]);
    assert!(result.resume_state.unwrap().is_complete());
    // Every partition report reaches the diffs after a resume.
    assert_eq!(
        result.config_diff.get_nested("out").raw("last_batch_partitions"),
        Some(&serde_json::json!(4))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_input_failure_is_attributed_over_close() {
    let (input, _output, loader) = loader();
    input.faults.set(0, Fault::Permanent);
    let config = counting_pipeline("attribution", 1, "  max_retries: 0");

    let err = loader
        .run(&config, &ExecutionOptions::default())
        .await
        .unwrap_err();
    let cause = err.as_stage_error().unwrap();
    assert_eq!(cause.code, "READ_FAILED");
    assert!(cause.suppressed.iter().all(|s| s.is_close_induced()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retry_resumes_failed_partitions_only() {
    let (input, output, loader) = loader();
    input.faults.set(2, Fault::Transient(1));
    let config = counting_pipeline("retry", 4, "  max_retries: 2");

    let outcome = loader.run(&config, &ExecutionOptions::default()).await.unwrap();
    let PipelineOutcome::Run(result) = outcome else {
        panic!("expected run outcome");
    };

    assert_eq!(result.retry_count, 1);
    assert!(result.is_complete());
    assert_eq!(input.runs_of(0), 1);
    assert_eq!(input.runs_of(2), 2);
    assert_eq!(output.committed_partitions(), vec![0, 1, 2, 3]);
    // Totals cover both attempts, not just the resumed one.
    assert_eq!(result.records, 12);
    assert_eq!(result.records, output.rows().len() as u64);
    assert_eq!(result.retried_errors.len(), 1);
    assert_eq!(result.retried_errors[0].code, "READ_FAILED");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_retries_exhausted_returns_partial() {
    let (input, _output, loader) = loader();
    input.faults.set(0, Fault::Transient(5));
    let config = counting_pipeline("exhausted", 2, "  max_retries: 1");

    let err = loader
        .run(&config, &ExecutionOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.resume_state().unwrap().pending_partitions(), vec![0]);
    // Partition 1 committed on the first attempt.
    let PipelineError::Partial { records, .. } = &err else {
        panic!("expected partial failure, got {err}");
    };
    assert_eq!(*records, 3);
    assert_eq!(input.runs_of(0), 2);
    assert_eq!(input.runs_of(1), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zero_partitions_skips_execution() {
    let (input, output, loader) = loader();
    let config = counting_pipeline("skip", 0, "  max_retries: 0");

    let outcome = loader.run(&config, &ExecutionOptions::default()).await.unwrap();
    let PipelineOutcome::Run(result) = outcome else {
        panic!("expected run outcome");
    };

    assert!(result.skipped);
    assert_eq!(result.partition_count, 0);
    assert_eq!(result.records, 0);
    assert!(input.runs.lock().unwrap().is_empty());
    assert!(output.committed_partitions().is_empty());
    // Stage transactions still ran and produced their diffs.
    assert_eq!(
        result.config_diff.get_nested("out").raw("last_batch_partitions"),
        Some(&serde_json::json!(0))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_plugin_fails_before_execution() {
    let (input, _output, loader) = loader();
    let mut config = counting_pipeline("unknown", 2, "  max_retries: 0");
    config.output = bulkhaul_engine::config::StageConfig::new(
        bulkhaul_types::ConfigSource::from_json(serde_json::json!({"type": "nowhere"})),
    );

    let err = loader
        .run(&config, &ExecutionOptions::default())
        .await
        .unwrap_err();
    let PipelineError::Stage(cause) = err else {
        panic!("expected stage error");
    };
    assert_eq!(cause.code, "UNKNOWN_PLUGIN");
    assert!(input.runs.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remove_columns_projects_committed_rows() {
    let (_input, output, loader) = loader();
    let config = bulkhaul_engine::config::parser::parse_pipeline_str(
        r#"
pipeline: projected
in:
  type: counting
  partitions: 2
  rows_per_partition: 3
filters:
  - type: remove_columns
    columns: [n]
  - type: rename
    columns:
      label: tag
out:
  type: collect
  table: users
state:
  backend: memory
"#,
    )
    .unwrap();

    let outcome = loader.run(&config, &ExecutionOptions::default()).await.unwrap();
    let PipelineOutcome::Run(result) = outcome else {
        panic!("expected run outcome");
    };

    assert_eq!(result.records, 6);
    let output_schema = &result.resume_state.as_ref().unwrap().output_schema;
    assert_eq!(output_schema.column_count(), 2);
    assert_eq!(output_schema.column(0).name(), "partition");
    assert_eq!(output_schema.column(1).name(), "tag");

    let rows = output.rows();
    assert_eq!(rows.len(), 6);
    assert!(rows.iter().all(|row| row.len() == 2));
    assert_eq!(
        output.committed.lock().unwrap()[&1],
        vec![
            vec![Value::Long(1), Value::from("p1-0")],
            vec![Value::Long(1), Value::from("p1-1")],
            vec![Value::Long(1), Value::from("p1-2")],
        ]
    );
}
