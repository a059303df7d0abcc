use std::sync::Arc;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::debounce::Debouncer;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

/// A change notification, one JSON object per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Opened { number: u64 },
    #[serde(alias = "synchronize")]
    Updated { number: u64 },
    ChecklistEdited { number: u64 },
}

impl Event {
    pub fn number(&self) -> u64 {
        match *self {
            Event::Opened { number }
            | Event::Updated { number }
            | Event::ChecklistEdited { number } => number,
        }
    }
}

/// Parse one line of the event stream. Blank lines yield `None`.
pub fn parse_event(line: &str) -> Result<Option<Event>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| Error::Event(format!("malformed event {line:?}: {e}")))
}

/// Debounce key for a change.
pub fn change_key(number: u64) -> String {
    format!("pr-{number}")
}

/// Routes events: new commits go through the debouncer, checklist edits
/// are evaluated straight away.
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    debouncer: Debouncer,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, debouncer: Debouncer) -> Self {
        Self {
            pipeline,
            debouncer,
        }
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    /// Handle one event. Returns the handle of work started immediately.
    pub fn dispatch(&self, event: Event) -> Option<JoinHandle<()>> {
        let number = event.number();
        let pipeline = Arc::clone(&self.pipeline);
        match event {
            Event::Opened { .. } | Event::Updated { .. } => {
                info!(number, ?event, "scheduling analysis");
                self.debouncer.schedule(&change_key(number), move || async move {
                    tokio::task::spawn_blocking(move || pipeline.analyze(number))
                        .await
                        .map_err(|e| Error::Debounce(format!("analysis of #{number} aborted: {e}")))?
                        .map(|_| ())
                });
                None
            }
            Event::ChecklistEdited { .. } => {
                info!(number, "checklist edited, re-evaluating");
                Some(tokio::task::spawn_blocking(move || {
                    if let Err(e) = pipeline.refresh_decision(number) {
                        error!(number, error = %e, "failed to re-evaluate checklist");
                    }
                }))
            }
        }
    }

    /// Consume an event stream until EOF, then wait for outstanding work.
    /// Returns the number of events dispatched.
    pub async fn run<R>(&self, reader: R) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut immediate = Vec::new();
        let mut dispatched = 0;

        while let Some(line) = lines.next_line().await? {
            match parse_event(&line) {
                Ok(Some(event)) => {
                    dispatched += 1;
                    if let Some(handle) = self.dispatch(event) {
                        immediate.push(handle);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping event"),
            }
        }

        info!(
            dispatched,
            pending = self.debouncer.pending_count(),
            "event stream closed, draining"
        );
        for handle in immediate {
            if let Err(e) = handle.await {
                error!(error = %e, "checklist re-evaluation panicked");
            }
        }
        self.debouncer.idle().await;
        Ok(dispatched)
    }
}
