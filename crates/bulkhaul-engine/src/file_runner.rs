//! Input and output stages composed from byte-stream plugins.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use bulkhaul_page::{Page, PageOutput};
use bulkhaul_types::{ConfigDiff, ConfigSource, Schema, StageError, TaskReport, TaskSource};

use crate::plugin::file::{
    CodecControl, DecoderPlugin, EncoderPlugin, FileInput, FileInputPlugin, FileOutput,
    FileOutputPlugin, FormatterPlugin, ParserPlugin, TransactionalFileOutput,
};
use crate::plugin::registry::nested_configs;
use crate::plugin::{InputControl, InputPlugin, OutputControl, OutputPlugin, TransactionalPageOutput};
use crate::session::ExecSession;

/// Task sources of every component, nested under one stage task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileInputTask {
    file_input: TaskSource,
    decoders: Vec<TaskSource>,
    parser: TaskSource,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileOutputTask {
    file_output: TaskSource,
    encoders: Vec<TaskSource>,
    formatter: TaskSource,
}

fn to_task<T: Serialize>(task: &T) -> Result<TaskSource, StageError> {
    TaskSource::from_serializable(task)
        .map_err(|e| StageError::internal("TASK_ENCODE", e.to_string()))
}

fn from_task<T: for<'de> Deserialize<'de>>(task: &TaskSource) -> Result<T, StageError> {
    task.load_config()
        .map_err(|e| StageError::config("INVALID_TASK", e.to_string()))
}

/// Nest the transactions (or resumes) of `len` codecs: `step(i, ..)` runs
/// codec `i` with a control that descends to codec `i + 1`. The innermost
/// control receives every codec task in order.
fn codec_chain(
    index: usize,
    len: usize,
    tasks: Vec<TaskSource>,
    step: &dyn Fn(usize, &mut dyn CodecControl) -> Result<(), StageError>,
    control: &mut dyn FnMut(Vec<TaskSource>) -> Result<(), StageError>,
) -> Result<(), StageError> {
    if index == len {
        return control(tasks);
    }
    step(index, &mut |task: TaskSource| -> Result<(), StageError> {
        let mut tasks = tasks.clone();
        tasks.push(task);
        codec_chain(index + 1, len, tasks, step, control)
    })
}

/// First failure among component cleanups; every failure is logged.
fn cleanup_all(results: Vec<Result<(), StageError>>) -> Result<(), StageError> {
    let mut first_error = None;
    for result in results {
        if let Err(e) = result {
            tracing::warn!(code = %e.code, "File stage cleanup failed: {}", e.message);
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn check_count(kind: &str, configs: &[ConfigSource], plugins: usize) -> Result<(), StageError> {
    if configs.len() == plugins {
        Ok(())
    } else {
        Err(StageError::config(
            "PLUGIN_MISMATCH",
            format!("{} {kind} configured but {plugins} resolved", configs.len()),
        ))
    }
}

fn check_frozen(kind: &str, frozen: usize, plugins: usize) -> Result<(), StageError> {
    if frozen == plugins {
        Ok(())
    } else {
        Err(StageError::config(
            "RESUME_MISMATCH",
            format!("checkpoint has {frozen} {kind} but {plugins} resolved"),
        ))
    }
}

/// Input stage built from a file input, its decoders and a parser.
pub struct FileInputRunner {
    file_input: Arc<dyn FileInputPlugin>,
    decoders: Vec<Arc<dyn DecoderPlugin>>,
    parser: Arc<dyn ParserPlugin>,
}

impl FileInputRunner {
    #[must_use]
    pub fn new(
        file_input: Arc<dyn FileInputPlugin>,
        decoders: Vec<Arc<dyn DecoderPlugin>>,
        parser: Arc<dyn ParserPlugin>,
    ) -> Self {
        Self {
            file_input,
            decoders,
            parser,
        }
    }

    fn parse_partition(
        &self,
        session: &ExecSession,
        task: &FileInputTask,
        schema: &Schema,
        input: &mut dyn FileInput,
        output: &mut dyn PageOutput,
    ) -> Result<(), StageError> {
        let mut stream: Box<dyn FileInput + '_> = Box::new(input);
        for (decoder, decoder_task) in self.decoders.iter().zip(&task.decoders) {
            stream = decoder.open(session, decoder_task, stream)?;
        }
        let result = self
            .parser
            .run(session, &task.parser, schema, stream.as_mut(), output);
        stream.close();
        result
    }

    /// Nest the component transactions and hand the combined task to
    /// `control` once the parser has announced its schema.
    fn nested_transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        file_input_task: TaskSource,
        partition_count: usize,
        control: &mut dyn InputControl,
    ) -> Result<Vec<TaskReport>, StageError> {
        let decoder_configs = nested_configs(config, "decoders")?;
        check_count("decoders", &decoder_configs, self.decoders.len())?;
        let parser_config = config.get_nested("parser");

        let mut reports = Vec::new();
        codec_chain(
            0,
            self.decoders.len(),
            Vec::new(),
            &|i: usize, control: &mut dyn CodecControl| {
                self.decoders[i].transaction(session, &decoder_configs[i], control)
            },
            &mut |decoder_tasks: Vec<TaskSource>| -> Result<(), StageError> {
                self.parser.transaction(
                    session,
                    &parser_config,
                    &mut |parser_task: TaskSource, schema: Schema| -> Result<(), StageError> {
                        let task = to_task(&FileInputTask {
                            file_input: file_input_task.clone(),
                            decoders: decoder_tasks.clone(),
                            parser: parser_task,
                        })?;
                        reports = control.run(task, schema, partition_count)?;
                        Ok(())
                    },
                )
            },
        )?;
        Ok(reports)
    }

    /// Replay the decoder and parser resumes from their frozen tasks.
    fn nested_resume(
        &self,
        session: &ExecSession,
        frozen: &FileInputTask,
        schema: &Schema,
        file_input_task: TaskSource,
        partition_count: usize,
        control: &mut dyn InputControl,
    ) -> Result<Vec<TaskReport>, StageError> {
        check_frozen("decoders", frozen.decoders.len(), self.decoders.len())?;

        let mut reports = Vec::new();
        codec_chain(
            0,
            self.decoders.len(),
            Vec::new(),
            &|i: usize, control: &mut dyn CodecControl| {
                self.decoders[i].resume(session, &frozen.decoders[i], control)
            },
            &mut |decoder_tasks: Vec<TaskSource>| -> Result<(), StageError> {
                self.parser.resume(
                    session,
                    &frozen.parser,
                    schema,
                    &mut |parser_task: TaskSource, schema: Schema| -> Result<(), StageError> {
                        let task = to_task(&FileInputTask {
                            file_input: file_input_task.clone(),
                            decoders: decoder_tasks.clone(),
                            parser: parser_task,
                        })?;
                        reports = control.run(task, schema, partition_count)?;
                        Ok(())
                    },
                )
            },
        )?;
        Ok(reports)
    }
}

impl InputPlugin for FileInputRunner {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError> {
        self.file_input.transaction(
            session,
            config,
            &mut |file_input_task: TaskSource, partition_count: usize| {
                self.nested_transaction(session, config, file_input_task, partition_count, control)
            },
        )
    }

    fn resume(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn InputControl,
    ) -> Result<ConfigDiff, StageError> {
        let nested: FileInputTask = from_task(task)?;
        self.file_input.resume(
            session,
            &nested.file_input,
            partition_count,
            &mut |file_input_task: TaskSource, count: usize| -> Result<Vec<TaskReport>, StageError> {
                self.nested_resume(session, &nested, schema, file_input_task, count, control)
            },
        )
    }

    fn cleanup(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        let nested: FileInputTask = from_task(task)?;
        let mut results: Vec<_> = self
            .decoders
            .iter()
            .zip(&nested.decoders)
            .map(|(decoder, decoder_task)| decoder.cleanup(session, decoder_task))
            .collect();
        results.push(self.parser.cleanup(session, &nested.parser, schema));
        results.push(self.file_input.cleanup(
            session,
            &nested.file_input,
            partition_count,
            successful_reports,
        ));
        cleanup_all(results)
    }

    fn run(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
        output: &mut dyn PageOutput,
    ) -> Result<TaskReport, StageError> {
        let nested: FileInputTask = from_task(task)?;
        let mut input = self.file_input.open(session, &nested.file_input, partition)?;
        let result = self
            .parse_partition(session, &nested, schema, &mut input, output)
            .and_then(|()| input.commit());
        if result.is_err() {
            input.abort();
        }
        input.close();
        result
    }
}

/// Transactional file output shared between the encoder chain, which
/// writes to it, and the page output handle, which commits it.
struct SharedFileOutput(Arc<Mutex<Box<dyn TransactionalFileOutput>>>);

impl SharedFileOutput {
    fn lock(&self) -> MutexGuard<'_, Box<dyn TransactionalFileOutput>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FileOutput for SharedFileOutput {
    fn next_file(&mut self) -> Result<(), StageError> {
        self.lock().next_file()
    }

    fn add(&mut self, buffer: Bytes) -> Result<(), StageError> {
        self.lock().add(buffer)
    }

    fn finish(&mut self) -> Result<(), StageError> {
        self.lock().finish()
    }

    fn close(&mut self) {
        self.lock().close();
    }
}

struct FilePageOutput {
    formatted: Box<dyn PageOutput>,
    file_output: SharedFileOutput,
}

impl PageOutput for FilePageOutput {
    fn add(&mut self, page: Page) -> Result<(), StageError> {
        self.formatted.add(page)
    }

    fn finish(&mut self) -> Result<(), StageError> {
        self.formatted.finish()
    }

    fn close(&mut self) {
        self.formatted.close();
        self.file_output.close();
    }
}

impl TransactionalPageOutput for FilePageOutput {
    fn abort(&mut self) {
        self.file_output.lock().abort();
    }

    fn commit(&mut self) -> Result<TaskReport, StageError> {
        self.file_output.lock().commit()
    }
}

/// Output stage built from a formatter, its encoders and a file output.
pub struct FileOutputRunner {
    formatter: Arc<dyn FormatterPlugin>,
    encoders: Vec<Arc<dyn EncoderPlugin>>,
    file_output: Arc<dyn FileOutputPlugin>,
}

impl FileOutputRunner {
    #[must_use]
    pub fn new(
        formatter: Arc<dyn FormatterPlugin>,
        encoders: Vec<Arc<dyn EncoderPlugin>>,
        file_output: Arc<dyn FileOutputPlugin>,
    ) -> Self {
        Self {
            formatter,
            encoders,
            file_output,
        }
    }

    /// Formatter writing through the encoder chain into `shared`.
    fn open_chain(
        &self,
        session: &ExecSession,
        task: &FileOutputTask,
        schema: &Schema,
        shared: &Arc<Mutex<Box<dyn TransactionalFileOutput>>>,
    ) -> Result<Box<dyn PageOutput>, StageError> {
        let mut stream: Box<dyn FileOutput> = Box::new(SharedFileOutput(Arc::clone(shared)));
        for (encoder, encoder_task) in self.encoders.iter().zip(&task.encoders) {
            stream = encoder.open(session, encoder_task, stream)?;
        }
        self.formatter.open(session, &task.formatter, schema, stream)
    }

    fn nested_transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        schema: &Schema,
        file_output_task: TaskSource,
        control: &mut dyn OutputControl,
    ) -> Result<Vec<TaskReport>, StageError> {
        let encoder_configs = nested_configs(config, "encoders")?;
        check_count("encoders", &encoder_configs, self.encoders.len())?;
        let formatter_config = config.get_nested("formatter");

        let mut reports = Vec::new();
        codec_chain(
            0,
            self.encoders.len(),
            Vec::new(),
            &|i: usize, control: &mut dyn CodecControl| {
                self.encoders[i].transaction(session, &encoder_configs[i], control)
            },
            &mut |encoder_tasks: Vec<TaskSource>| -> Result<(), StageError> {
                self.formatter.transaction(
                    session,
                    &formatter_config,
                    schema,
                    &mut |formatter_task: TaskSource| -> Result<(), StageError> {
                        let task = to_task(&FileOutputTask {
                            file_output: file_output_task.clone(),
                            encoders: encoder_tasks.clone(),
                            formatter: formatter_task,
                        })?;
                        reports = control.run(task)?;
                        Ok(())
                    },
                )
            },
        )?;
        Ok(reports)
    }

    /// Replay the encoder and formatter resumes from their frozen tasks.
    fn nested_resume(
        &self,
        session: &ExecSession,
        frozen: &FileOutputTask,
        schema: &Schema,
        file_output_task: TaskSource,
        control: &mut dyn OutputControl,
    ) -> Result<Vec<TaskReport>, StageError> {
        check_frozen("encoders", frozen.encoders.len(), self.encoders.len())?;

        let mut reports = Vec::new();
        codec_chain(
            0,
            self.encoders.len(),
            Vec::new(),
            &|i: usize, control: &mut dyn CodecControl| {
                self.encoders[i].resume(session, &frozen.encoders[i], control)
            },
            &mut |encoder_tasks: Vec<TaskSource>| -> Result<(), StageError> {
                self.formatter.resume(
                    session,
                    &frozen.formatter,
                    schema,
                    &mut |formatter_task: TaskSource| -> Result<(), StageError> {
                        let task = to_task(&FileOutputTask {
                            file_output: file_output_task.clone(),
                            encoders: encoder_tasks.clone(),
                            formatter: formatter_task,
                        })?;
                        reports = control.run(task)?;
                        Ok(())
                    },
                )
            },
        )?;
        Ok(reports)
    }
}

impl OutputPlugin for FileOutputRunner {
    fn transaction(
        &self,
        session: &ExecSession,
        config: &ConfigSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError> {
        self.file_output.transaction(
            session,
            config,
            partition_count,
            &mut |file_output_task: TaskSource| {
                self.nested_transaction(session, config, schema, file_output_task, control)
            },
        )
    }

    fn resume(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        control: &mut dyn OutputControl,
    ) -> Result<ConfigDiff, StageError> {
        let nested: FileOutputTask = from_task(task)?;
        self.file_output.resume(
            session,
            &nested.file_output,
            partition_count,
            &mut |file_output_task: TaskSource| -> Result<Vec<TaskReport>, StageError> {
                self.nested_resume(session, &nested, schema, file_output_task, control)
            },
        )
    }

    fn cleanup(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition_count: usize,
        successful_reports: &[TaskReport],
    ) -> Result<(), StageError> {
        let nested: FileOutputTask = from_task(task)?;
        let mut results = vec![self.formatter.cleanup(session, &nested.formatter, schema)];
        results.extend(
            self.encoders
                .iter()
                .zip(&nested.encoders)
                .map(|(encoder, encoder_task)| encoder.cleanup(session, encoder_task)),
        );
        results.push(self.file_output.cleanup(
            session,
            &nested.file_output,
            partition_count,
            successful_reports,
        ));
        cleanup_all(results)
    }

    fn open(
        &self,
        session: &ExecSession,
        task: &TaskSource,
        schema: &Schema,
        partition: usize,
    ) -> Result<Box<dyn TransactionalPageOutput>, StageError> {
        let nested: FileOutputTask = from_task(task)?;
        let shared = Arc::new(Mutex::new(
            self.file_output.open(session, &nested.file_output, partition)?,
        ));

        let opened = self.open_chain(session, &nested, schema, &shared);

        let mut file_output = SharedFileOutput(shared);
        match opened {
            Ok(formatted) => Ok(Box::new(FilePageOutput {
                formatted,
                file_output,
            })),
            Err(e) => {
                file_output.lock().abort();
                file_output.close();
                Err(e)
            }
        }
    }
}
