//! Partition execution.
//!
//! Every pending partition gets a fresh [`PageChannel`] and two blocking
//! threads: the input side runs the source through the filter chain into
//! the channel's producer, the output side drains the consumer into the
//! sink. Partitions run concurrently, optionally bounded by
//! `exec.max_threads`.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use bulkhaul_page::{PageChannel, PageConsumer, PageProducer};
use bulkhaul_types::{ResumeState, StageError, TaskReport};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::errors::attribute_failure;
use crate::filters;
use crate::resolve::ResolvedPlugins;
use crate::session::ExecSession;

/// What happened to one partition.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    pub partition: usize,
    pub input: Result<TaskReport, StageError>,
    pub output: Result<TaskReport, StageError>,
    /// Records that crossed the partition's channel.
    pub records: u64,
}

impl PartitionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.input.is_ok() && self.output.is_ok()
    }

    /// The partition's attributed failure, `None` if it succeeded.
    #[must_use]
    pub fn failure(&self) -> Option<StageError> {
        let errors: Vec<StageError> = [&self.input, &self.output]
            .into_iter()
            .filter_map(|r| r.as_ref().err().cloned())
            .collect();
        attribute_failure(errors).map(|mut err| {
            if err.details.is_none() {
                err.details = Some(serde_json::json!({ "partition": self.partition }));
            }
            err
        })
    }

    fn lost(partition: usize) -> Self {
        let err = StageError::internal("PARTITION_LOST", "partition task ended without a result");
        Self {
            partition,
            input: Err(err.clone()),
            output: Err(err),
            records: 0,
        }
    }
}

/// Runs a job's partitions on the session's runtime.
pub struct LocalExecutor {
    session: Arc<ExecSession>,
}

impl LocalExecutor {
    #[must_use]
    pub fn new(session: Arc<ExecSession>) -> Self {
        Self { session }
    }

    /// Run every pending partition of `state`, record the ones that
    /// succeeded, and return all outcomes in partition order.
    ///
    /// Blocks the calling thread; must not be called from async context.
    pub fn execute(
        &self,
        plugins: &ResolvedPlugins,
        state: &mut ResumeState,
    ) -> Vec<PartitionOutcome> {
        let pending = state.pending_partitions();
        if pending.is_empty() {
            return Vec::new();
        }
        info!(
            pipeline = %self.session.pipeline(),
            pending = pending.len(),
            partitions = state.partition_count(),
            "Running partitions"
        );

        let frozen = Arc::new(state.clone());
        let outcomes = self.session.runtime().block_on(run_partitions(
            Arc::clone(&self.session),
            plugins.clone(),
            frozen,
            pending,
        ));

        for outcome in &outcomes {
            if let (Ok(input), Ok(output)) = (&outcome.input, &outcome.output) {
                state.record_partition(outcome.partition, input.clone(), output.clone());
            }
        }
        outcomes
    }
}

async fn run_partitions(
    session: Arc<ExecSession>,
    plugins: ResolvedPlugins,
    state: Arc<ResumeState>,
    pending: Vec<usize>,
) -> Vec<PartitionOutcome> {
    let limit = session.exec().max_threads.map(|n| Arc::new(Semaphore::new(n)));
    let mut join_set = JoinSet::new();

    for &partition in &pending {
        let session = Arc::clone(&session);
        let plugins = plugins.clone();
        let state = Arc::clone(&state);
        let limit = limit.clone();
        join_set.spawn(async move {
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };
            run_partition(session, plugins, state, partition).await
        });
    }

    let mut outcomes = Vec::with_capacity(pending.len());
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!("Partition task failed: {e}"),
        }
    }

    let finished: BTreeSet<usize> = outcomes.iter().map(|o| o.partition).collect();
    outcomes.extend(
        pending
            .into_iter()
            .filter(|p| !finished.contains(p))
            .map(PartitionOutcome::lost),
    );
    outcomes.sort_by_key(|o| o.partition);
    outcomes
}

async fn run_partition(
    session: Arc<ExecSession>,
    plugins: ResolvedPlugins,
    state: Arc<ResumeState>,
    partition: usize,
) -> PartitionOutcome {
    let channel = PageChannel::new(session.exec().max_queued_pages);
    let producer = channel.producer();
    let consumer = channel.consumer();
    debug!(partition, "Partition started");

    let input_side = {
        let session = Arc::clone(&session);
        let plugins = plugins.clone();
        let state = Arc::clone(&state);
        tokio::task::spawn_blocking(move || {
            run_input_side(&session, &plugins, &state, partition, producer)
        })
    };
    let output_side = tokio::task::spawn_blocking(move || {
        run_output_side(&session, &plugins, &state, partition, consumer)
    });

    let input = joined(input_side.await, "input");
    let output = joined(output_side.await, "output");
    let records = channel.records_transferred();

    match (&input, &output) {
        (Ok(_), Ok(_)) => info!(partition, records, "Partition completed"),
        _ => warn!(partition, records, "Partition failed"),
    }

    PartitionOutcome {
        partition,
        input,
        output,
        records,
    }
}

fn run_input_side(
    session: &ExecSession,
    plugins: &ResolvedPlugins,
    state: &ResumeState,
    partition: usize,
    mut producer: PageProducer,
) -> Result<TaskReport, StageError> {
    let result = produce(session, plugins, state, partition, &mut producer);
    match &result {
        Ok(_) => producer.complete_producer(),
        Err(e) => {
            if !e.is_close_induced() {
                warn!(partition, code = %e.code, "Input side failed: {}", e.message);
            }
            producer.fail();
        }
    }
    result
}

fn produce(
    session: &ExecSession,
    plugins: &ResolvedPlugins,
    state: &ResumeState,
    partition: usize,
    producer: &mut PageProducer,
) -> Result<TaskReport, StageError> {
    let mut output = filters::open(
        session,
        &plugins.filters,
        &state.filter_tasks,
        &state.input_schema,
        &state.filter_schemas,
        Box::new(producer),
    )?;
    let result = plugins.input.run(
        session,
        &state.input_task,
        &state.input_schema,
        partition,
        output.as_mut(),
    );
    output.close();
    result
}

fn run_output_side(
    session: &ExecSession,
    plugins: &ResolvedPlugins,
    state: &ResumeState,
    partition: usize,
    mut consumer: PageConsumer,
) -> Result<TaskReport, StageError> {
    let result = plugins.output.run(
        session,
        &state.output_task,
        &state.output_schema,
        partition,
        &mut consumer,
    );
    match &result {
        Ok(_) => consumer.complete_consumer(),
        Err(e) => {
            if !e.is_close_induced() {
                warn!(partition, code = %e.code, "Output side failed: {}", e.message);
            }
            consumer.fail();
        }
    }
    result
}

fn joined(
    result: Result<Result<TaskReport, StageError>, JoinError>,
    side: &str,
) -> Result<TaskReport, StageError> {
    match result {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(StageError::internal(
            "PANIC",
            format!("{side} thread panicked: {}", panic_message(e.into_panic())),
        )),
        Err(e) => Err(StageError::internal(
            "CANCELLED",
            format!("{side} thread cancelled: {e}"),
        )),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
