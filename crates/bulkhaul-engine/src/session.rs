//! Per-job execution context shared by every stage.

use std::sync::Arc;

use anyhow::{Context, Result};
use bulkhaul_page::{PageAllocator, PageBuilder, PageOutput, PageReader, PooledPageAllocator};
use bulkhaul_types::state::PipelineId;
use bulkhaul_types::{Schema, TaskSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;

use crate::config::ExecConfig;
use crate::plugin::PluginRegistry;

/// Frozen executor settings stored as the exec task of a resume state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ExecTask {
    transaction_time: DateTime<Utc>,
    page_size: usize,
}

/// Everything a stage may need that is not its own configuration: the
/// plugin registry, the shared page allocator, executor settings and the
/// job's transaction time.
///
/// One session lives for one job. Stages receive it by reference; the
/// executor shares it between partition threads through an `Arc`.
pub struct ExecSession {
    pipeline: PipelineId,
    registry: Arc<PluginRegistry>,
    allocator: Arc<dyn PageAllocator>,
    exec: ExecConfig,
    transaction_time: DateTime<Utc>,
    runtime: Handle,
    preview: bool,
}

impl std::fmt::Debug for ExecSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecSession")
            .field("pipeline", &self.pipeline)
            .field("exec", &self.exec)
            .field("transaction_time", &self.transaction_time)
            .field("preview", &self.preview)
            .finish_non_exhaustive()
    }
}

impl ExecSession {
    /// New session stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if `exec.page_size` is invalid.
    pub fn new(
        pipeline: PipelineId,
        registry: Arc<PluginRegistry>,
        exec: ExecConfig,
        runtime: Handle,
    ) -> Result<Self> {
        let page_size = exec.page_size_bytes()?;
        Ok(Self {
            pipeline,
            registry,
            allocator: Arc::new(PooledPageAllocator::new(page_size)),
            exec,
            transaction_time: Utc::now(),
            runtime,
            preview: false,
        })
    }

    /// Session that replays the transaction time and page size frozen in
    /// `exec_task`.
    ///
    /// # Errors
    ///
    /// Returns an error if `exec_task` was not produced by [`exec_task`](Self::exec_task).
    pub fn from_exec_task(
        pipeline: PipelineId,
        registry: Arc<PluginRegistry>,
        mut exec: ExecConfig,
        runtime: Handle,
        exec_task: &TaskSource,
    ) -> Result<Self> {
        let frozen: ExecTask = exec_task
            .load_config()
            .context("Invalid exec task in resume state")?;
        exec.page_size = frozen.page_size.to_string();
        Ok(Self {
            pipeline,
            registry,
            allocator: Arc::new(PooledPageAllocator::new(frozen.page_size)),
            exec,
            transaction_time: frozen.transaction_time,
            runtime,
            preview: false,
        })
    }

    #[must_use]
    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    /// Frozen settings to store in a resume state.
    #[must_use]
    pub fn exec_task(&self) -> TaskSource {
        let mut task = TaskSource::new();
        task.set("transaction_time", self.transaction_time)
            .set("page_size", self.allocator.page_size());
        task
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineId {
        &self.pipeline
    }

    #[must_use]
    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    #[must_use]
    pub fn allocator(&self) -> &Arc<dyn PageAllocator> {
        &self.allocator
    }

    #[must_use]
    pub fn exec(&self) -> &ExecConfig {
        &self.exec
    }

    #[must_use]
    pub fn transaction_time(&self) -> DateTime<Utc> {
        self.transaction_time
    }

    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Whether the job only samples the source.
    #[must_use]
    pub fn is_preview(&self) -> bool {
        self.preview
    }

    /// Builder writing pages of `schema` from this session's allocator.
    pub fn page_builder<O: PageOutput>(&self, schema: &Schema, output: O) -> PageBuilder<O> {
        PageBuilder::new(Arc::clone(&self.allocator), schema.clone(), output)
    }

    /// Reader that returns exhausted pages to this session's allocator.
    #[must_use]
    pub fn page_reader(&self, schema: &Schema) -> PageReader {
        PageReader::with_allocator(schema.clone(), Arc::clone(&self.allocator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_task_roundtrip_freezes_time_and_page_size() {
        let exec = ExecConfig {
            page_size: "4kb".into(),
            ..ExecConfig::default()
        };
        let session = ExecSession::new(
            PipelineId::new("p"),
            Arc::new(PluginRegistry::new()),
            exec,
            Handle::current(),
        )
        .unwrap();
        let task = session.exec_task();

        let resumed = ExecSession::from_exec_task(
            PipelineId::new("p"),
            Arc::new(PluginRegistry::new()),
            ExecConfig::default(),
            Handle::current(),
            &task,
        )
        .unwrap();
        assert_eq!(resumed.transaction_time(), session.transaction_time());
        assert_eq!(resumed.allocator().page_size(), 4096);
        assert_eq!(resumed.exec().page_size_bytes().unwrap(), 4096);
        assert!(!resumed.is_preview());
    }

    #[tokio::test]
    async fn test_invalid_exec_task_rejected() {
        let err = ExecSession::from_exec_task(
            PipelineId::new("p"),
            Arc::new(PluginRegistry::new()),
            ExecConfig::default(),
            Handle::current(),
            &TaskSource::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid exec task"));
    }
}
