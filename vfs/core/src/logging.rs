//! Tracing-based operation logging.
//!
//! Every operation can emit a start event (`^open(fd=3, a.txt)`) and an end
//! event (`open(): OK. Inputs: … Outputs: fd=4 Duration: 12µs`). How much of
//! each is printed is chosen per operation.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Instant;

use tracing::Level;

use crate::error::FsResult;
use crate::interceptor::{Chain, FileSystemInterceptor};
use crate::op::{FsOutput, Operation, OperationTag};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OperationLoggingLevel {
    None,
    /// Operation name only.
    Name,
    /// fds and paths.
    #[default]
    Basic,
    /// Full `Debug` rendering.
    Verbose,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StartEvent {
    pub inputs: OperationLoggingLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndEvent {
    pub inputs: OperationLoggingLevel,
    pub outputs: OperationLoggingLevel,
    pub track_duration: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoggingEvents {
    pub start: Option<StartEvent>,
    pub end: Option<EndEvent>,
}

impl LoggingEvents {
    pub const SILENT: LoggingEvents = LoggingEvents {
        start: None,
        end: None,
    };
}

impl Default for LoggingEvents {
    fn default() -> Self {
        Self {
            start: None,
            end: Some(EndEvent {
                inputs: OperationLoggingLevel::Basic,
                outputs: OperationLoggingLevel::Basic,
                track_duration: false,
            }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingFileSystemInterceptor {
    level: Level,
    default_events: LoggingEvents,
    overrides: HashMap<OperationTag, LoggingEvents>,
}

impl Default for LoggingFileSystemInterceptor {
    fn default() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl LoggingFileSystemInterceptor {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            default_events: LoggingEvents::default(),
            overrides: HashMap::new(),
        }
    }

    pub fn with_default_events(mut self, events: LoggingEvents) -> Self {
        self.default_events = events;
        self
    }

    pub fn with_operation(mut self, tag: OperationTag, events: LoggingEvents) -> Self {
        self.overrides.insert(tag, events);
        self
    }

    fn events_for(&self, tag: OperationTag) -> LoggingEvents {
        self.overrides
            .get(&tag)
            .copied()
            .unwrap_or(self.default_events)
    }

    fn emit(&self, tag: OperationTag, message: &str) {
        let operation = tag.name();
        match self.level {
            Level::ERROR => tracing::error!(operation, "{message}"),
            Level::WARN => tracing::warn!(operation, "{message}"),
            Level::INFO => tracing::info!(operation, "{message}"),
            Level::DEBUG => tracing::debug!(operation, "{message}"),
            _ => tracing::trace!(operation, "{message}"),
        }
    }
}

fn format_inputs(operation: &Operation, level: OperationLoggingLevel) -> String {
    match level {
        OperationLoggingLevel::None | OperationLoggingLevel::Name => String::new(),
        OperationLoggingLevel::Basic => operation.summary(),
        OperationLoggingLevel::Verbose => format!("{operation:?}"),
    }
}

fn format_outputs(output: &FsOutput, level: OperationLoggingLevel) -> String {
    match level {
        OperationLoggingLevel::None | OperationLoggingLevel::Name => String::new(),
        OperationLoggingLevel::Basic => output.summary(),
        OperationLoggingLevel::Verbose => format!("{output:?}"),
    }
}

impl FileSystemInterceptor for LoggingFileSystemInterceptor {
    fn intercept(&self, operation: Operation, chain: Chain<'_>) -> FsResult<FsOutput> {
        let tag = operation.tag();
        let events = self.events_for(tag);

        if let Some(start) = events.start.filter(|s| s.inputs != OperationLoggingLevel::None) {
            let inputs = format_inputs(&operation, start.inputs);
            self.emit(tag, &format!("^{tag}({inputs})"));
        }

        let Some(end) = events.end else {
            return chain.proceed(operation);
        };
        let inputs = format_inputs(&operation, end.inputs);
        let started = end.track_duration.then(Instant::now);

        let result = chain.proceed(operation);

        let mut message = match &result {
            Ok(_) => format!("{tag}(): OK."),
            Err(err) => format!("{tag}(): {:?}({err}).", err.errno()),
        };
        if !inputs.is_empty() {
            let _ = write!(message, " Inputs: {inputs}.");
        }
        if let Ok(output) = &result {
            let outputs = format_outputs(output, end.outputs);
            if !outputs.is_empty() {
                let _ = write!(message, " Outputs: {outputs}.");
            }
        }
        if let Some(started) = started {
            let _ = write!(message, " Duration: {:?}.", started.elapsed());
        }
        self.emit(tag, &message);
        result
    }
}
