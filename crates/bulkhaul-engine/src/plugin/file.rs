//! Byte-stream stage protocols.
//!
//! A file input produces byte buffers grouped into files; decoders wrap that
//! stream (decompression and the like) and a parser turns it into pages. On
//! the way out a formatter turns pages into bytes, encoders wrap the byte
//! stream and a file output writes it. The composed chains are exposed as
//! ordinary input and output stages by the runners in
//! [`file_runner`](crate::file_runner).

use bytes::Bytes;

use bulkhaul_page::PageOutput;
use bulkhaul_types::{ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource};

use crate::session::ExecSession;

/// Pull-based stream of byte buffers split into files.
pub trait FileInput: Send {
    /// Advance to the next file. Returns `false` when there are none left.
    fn next_file(&mut self) -> Result<bool, StageError>;

    /// Next buffer of the current file, `None` at end of file.
    fn poll(&mut self) -> Result<Option<Bytes>, StageError>;

    fn close(&mut self);
}

impl<T: FileInput + ?Sized> FileInput for &mut T {
    fn next_file(&mut self) -> Result<bool, StageError> {
        (**self).next_file()
    }

    fn poll(&mut self) -> Result<Option<Bytes>, StageError> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

impl<T: FileInput + ?Sized> FileInput for Box<T> {
    fn next_file(&mut self) -> Result<bool, StageError> {
        (**self).next_file()
    }

    fn poll(&mut self) -> Result<Option<Bytes>, StageError> {
        (**self).poll()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

/// Per-partition file input that is committed once parsing succeeds.
pub trait TransactionalFileInput: FileInput {
    fn abort(&mut self);

    fn commit(&mut self) -> Result<TaskReport, StageError>;
}

/// Push-based sink of byte buffers split into files.
pub trait FileOutput: Send {
    fn next_file(&mut self) -> Result<(), StageError>;

    fn add(&mut self, buffer: Bytes) -> Result<(), StageError>;

    fn finish(&mut self) -> Result<(), StageError>;

    fn close(&mut self);
}

impl<T: FileOutput + ?Sized> FileOutput for Box<T> {
    fn next_file(&mut self) -> Result<(), StageError> {
        (**self).next_file()
    }

    fn add(&mut self, buffer: Bytes) -> Result<(), StageError> {
        (**self).add(buffer)
    }

    fn finish(&mut self) -> Result<(), StageError> {
        (**self).finish()
    }

    fn close(&mut self) {
        (**self).close();
    }
}

pub trait TransactionalFileOutput: FileOutput {
    fn abort(&mut self);

    fn commit(&mut self) -> Result<TaskReport, StageError>;
}

/// Continuation for [`FileInputPlugin::transaction`].
pub trait FileInputControl {
    fn run(
        &mut self,
        task: TaskSource,
        partition_count: usize,
    ) -> Result<Vec<TaskReport>, StageError>;
}

impl<F> FileInputControl for F
where
    F: FnMut(TaskSource, usize) -> Result<Vec<TaskReport>, StageError>,
{
    fn run(
        &mut self,
        task: TaskSource,
        partition_count: usize,
    ) -> Result<Vec<TaskReport>, StageError> {
        self(task, partition_count)
    }
}

pub trait FileInputPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn FileInputControl,
    ) -> Result<ConfigDiff, StageError>;

    fn resume(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        partition_count: usize,
        control: &mut dyn FileInputControl,
    ) -> Result<ConfigDiff, StageError>;

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _partition_count: usize,
        _successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        Ok(())
    }

    fn open(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        partition: usize,
    ) -> Result<Box<dyn TransactionalFileInput>, StageError>;
}

/// Continuation for decoder and encoder transactions.
pub trait CodecControl {
    fn run(&mut self, task: TaskSource) -> Result<(), StageError>;
}

impl<F> CodecControl for F
where
    F: FnMut(TaskSource) -> Result<(), StageError>,
{
    fn run(&mut self, task: TaskSource) -> Result<(), StageError> {
        self(task)
    }
}

pub trait DecoderPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn CodecControl,
    ) -> Result<(), StageError>;

    /// Reacquire what `transaction` held for a job continuing from `task`.
    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        control: &mut dyn CodecControl,
    ) -> Result<(), StageError> {
        control.run(task.clone())
    }

    fn cleanup(&self, _session: &ExecSession, _task: &TaskSource) -> Result<(), StageError> {
        Ok(())
    }

    /// Wrap `input` with a decoding stream.
    fn open<'a>(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        input: Box<dyn FileInput + 'a>,
    ) -> Result<Box<dyn FileInput + 'a>, StageError>;
}

/// Continuation for [`ParserPlugin::transaction`].
pub trait ParserControl {
    fn run(&mut self, task: TaskSource, schema: Schema) -> Result<(), StageError>;
}

impl<F> ParserControl for F
where
    F: FnMut(TaskSource, Schema) -> Result<(), StageError>,
{
    fn run(&mut self, task: TaskSource, schema: Schema) -> Result<(), StageError> {
        self(task, schema)
    }
}

pub trait ParserPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn ParserControl,
    ) -> Result<(), StageError>;

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        control: &mut dyn ParserControl,
    ) -> Result<(), StageError> {
        control.run(task.clone(), schema.clone())
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
    ) -> Result<(), StageError> {
        Ok(())
    }

    /// Parse every file of `input` into pages and finish `output`.
    fn run(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        input: &mut dyn FileInput,
        output: &mut dyn PageOutput,
    ) -> Result<(), StageError>;
}

/// Continuation for [`FileOutputPlugin::transaction`].
pub trait FileOutputControl {
    fn run(&mut self, task: TaskSource) -> Result<Vec<TaskReport>, StageError>;
}

impl<F> FileOutputControl for F
where
    F: FnMut(TaskSource) -> Result<Vec<TaskReport>, StageError>,
{
    fn run(&mut self, task: TaskSource) -> Result<Vec<TaskReport>, StageError> {
        self(task)
    }
}

pub trait FileOutputPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        partition_count: usize,
        control: &mut dyn FileOutputControl,
    ) -> Result<ConfigDiff, StageError>;

    fn resume(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        partition_count: usize,
        control: &mut dyn FileOutputControl,
    ) -> Result<ConfigDiff, StageError>;

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _partition_count: usize,
        _successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        Ok(())
    }

    fn open(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        partition: usize,
    ) -> Result<Box<dyn TransactionalFileOutput>, StageError>;
}

pub trait EncoderPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn CodecControl,
    ) -> Result<(), StageError>;

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        control: &mut dyn CodecControl,
    ) -> Result<(), StageError> {
        control.run(task.clone())
    }

    fn cleanup(&self, _session: &ExecSession, _task: &TaskSource) -> Result<(), StageError> {
        Ok(())
    }

    /// Wrap `output` with an encoding stream.
    fn open<'a>(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        output: Box<dyn FileOutput + 'a>,
    ) -> Result<Box<dyn FileOutput + 'a>, StageError>;
}

/// Continuation for [`FormatterPlugin::transaction`].
pub trait FormatterControl {
    fn run(&mut self, task: TaskSource) -> Result<(), StageError>;
}

impl<F> FormatterControl for F
where
    F: FnMut(TaskSource) -> Result<(), StageError>,
{
    fn run(&mut self, task: TaskSource) -> Result<(), StageError> {
        self(task)
    }
}

pub trait FormatterPlugin: Send + Sync {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        schema: &Schema,
        control: &mut dyn FormatterControl,
    ) -> Result<(), StageError>;

    fn resume(
        &self,
        _session: &ExecSession,
        task: &TaskSource,
        _schema: &Schema,
        control: &mut dyn FormatterControl,
    ) -> Result<(), StageError> {
        control.run(task.clone())
    }

    fn cleanup(
        &self,
        _session: &ExecSession,
        _task: &TaskSource,
        _schema: &Schema,
    ) -> Result<(), StageError> {
        Ok(())
    }

    /// Page sink that writes formatted bytes to `output`.
    fn open<'a>(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        output: Box<dyn FileOutput + 'a>,
    ) -> Result<Box<dyn PageOutput + 'a>, StageError>;
}
