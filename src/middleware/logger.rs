//! Access logging.
//!
//! [`Logger`] records a `start` event when a request reaches it and an `end`
//! event once the response is final. Events go to `tracing` under the
//! `relais::access` target; an optional sink sees them too. The stage never
//! sets a response, but leaves a handle in [`State::logger`] so handlers can
//! record through the same sink.
//!
//! [`State::logger`]: crate::State::logger

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;

use crate::context::Context;
use crate::middleware::{BoxFuture, Completion, Middleware};

/// Which end of the request an event describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    End,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::End => "end",
        })
    }
}

/// One access record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub phase: Phase,
    pub method: String,
    pub path: String,
    pub status: Option<StatusCode>,
    pub duration: Option<Duration>,
}

type Sink = Arc<dyn Fn(&LogEvent) + Send + Sync>;

/// Observational stage emitting [`LogEvent`]s.
#[derive(Clone, Default)]
pub struct Logger {
    sink: Option<Sink>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also hands every event to `sink`, after it has been traced.
    pub fn with_sink<F>(sink: F) -> Self
    where
        F: Fn(&LogEvent) + Send + Sync + 'static,
    {
        Self { sink: Some(Arc::new(sink)) }
    }

    pub fn record(&self, event: &LogEvent) {
        match event.phase {
            Phase::Start => tracing::info!(
                target: "relais::access",
                phase = %event.phase,
                method = %event.method,
                path = %event.path,
                "request started",
            ),
            Phase::End => tracing::info!(
                target: "relais::access",
                phase = %event.phase,
                method = %event.method,
                path = %event.path,
                status = event.status.map(|s| s.as_u16()),
                duration_ms = event.duration.map(|d| d.as_millis() as u64),
                "request completed",
            ),
        }
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }
}

impl Middleware for Logger {
    fn process(&self, mut ctx: Context) -> BoxFuture<'_, Context> {
        self.record(&LogEvent {
            phase: Phase::Start,
            method: ctx.request().method().to_owned(),
            path: ctx.request().path().to_owned(),
            status: None,
            duration: None,
        });
        ctx.state_mut().set_logger(self.clone());
        Box::pin(async move { ctx })
    }

    fn finish(&self, completion: &Completion<'_>) {
        self.record(&LogEvent {
            phase: Phase::End,
            method: completion.method.to_owned(),
            path: completion.path.to_owned(),
            status: Some(completion.status),
            duration: Some(completion.elapsed),
        });
    }
}
