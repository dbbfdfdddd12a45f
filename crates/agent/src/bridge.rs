//! Event bridge: turns the loop's step callbacks into a pull-based stream.
//!
//! A producer task runs the loop and pushes events into an unbounded
//! channel as steps complete, then a single `Finished` message with the
//! loop's outcome. `ResearchStream` yields events in production order; on
//! `Finished` it extracts sources, yields `sources` (when there are any),
//! then exactly one terminal `done` or `error`, and ends.
//!
//! Dropping the stream cancels the producer's token.

use futures::Stream;
use quarry_core::error::Error;
use quarry_core::event::{DomainEvent, EventBus};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;
use crate::citation;
use crate::loop_runner::{LoopOutcome, StepReport};
use crate::sources::extract_sources;
use crate::stream_event::ResearchEvent;

enum BridgeMessage {
    Event(ResearchEvent),
    Finished(Result<LoopOutcome, Error>),
}

/// Producer handle: converts step reports into stream events.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<BridgeMessage>,
    verbose: bool,
}

impl EventSink {
    /// Push one event. A closed stream drops it silently.
    pub fn send(&self, event: ResearchEvent) {
        let _ = self.tx.send(BridgeMessage::Event(event));
    }

    /// Events for one completed step: a `tool_start`/`tool_result` pair
    /// per invocation when verbose, then a `delta` for any step text.
    pub fn push_step(&self, report: &StepReport<'_>) {
        for event in step_events(report, self.verbose) {
            self.send(event);
        }
    }
}

fn step_events(report: &StepReport<'_>, verbose: bool) -> Vec<ResearchEvent> {
    let mut events = Vec::new();
    if verbose {
        for record in report.records {
            events.push(ResearchEvent::ToolStart {
                tool: record.name.clone(),
                tool_input: record.input.clone(),
                status: "running".into(),
            });
            events.push(ResearchEvent::ToolResult {
                tool: record.name.clone(),
                tool_input: record.input.clone(),
                tool_result: record.result.to_payload(),
            });
        }
    }
    if !report.text.is_empty() {
        events.push(ResearchEvent::Delta {
            content: report.text.to_string(),
        });
    }
    events
}

/// Observability hooks for the end of a streamed run.
struct Completion {
    run_id: String,
    events: Option<Arc<EventBus>>,
}

/// The consumer side of a research run.
pub struct ResearchStream {
    rx: mpsc::UnboundedReceiver<BridgeMessage>,
    pending: VecDeque<ResearchEvent>,
    finished: bool,
    completion: Completion,
    _cancel_on_drop: DropGuard,
}

impl ResearchStream {
    /// Spawn `run` as the producer. The stream opens with a `status` event.
    pub fn spawn<F, Fut>(status: impl Into<String>, verbose: bool, cancel: CancellationToken, run: F) -> Self
    where
        F: FnOnce(EventSink) -> Fut,
        Fut: Future<Output = Result<LoopOutcome, Error>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink {
            tx: tx.clone(),
            verbose,
        };
        let producer = run(sink);

        tokio::spawn(async move {
            let outcome = producer.await;
            let _ = tx.send(BridgeMessage::Finished(outcome));
        });

        Self {
            rx,
            pending: VecDeque::from([ResearchEvent::Status {
                status: status.into(),
            }]),
            finished: false,
            completion: Completion {
                run_id: String::new(),
                events: None,
            },
            _cancel_on_drop: cancel.drop_guard(),
        }
    }

    /// Publish `ResearchCompleted` / `ErrorOccurred` for this run.
    pub fn with_events(mut self, run_id: impl Into<String>, events: Arc<EventBus>) -> Self {
        self.completion = Completion {
            run_id: run_id.into(),
            events: Some(events),
        };
        self
    }

    fn finish(&mut self, outcome: Result<LoopOutcome, Error>) {
        self.finished = true;
        self.rx.close();

        match outcome {
            Ok(outcome) => {
                let mut sources = extract_sources(&outcome.records);
                citation::mark_used(&mut sources, &outcome.text);
                debug!(run_id = %self.completion.run_id, steps = outcome.steps, sources = sources.len(), "Stream finished");

                if let Some(bus) = &self.completion.events {
                    bus.publish(DomainEvent::ResearchCompleted {
                        run_id: self.completion.run_id.clone(),
                        steps: outcome.steps,
                        tool_calls: outcome.records.len(),
                        sources: sources.len(),
                        timestamp: chrono::Utc::now(),
                    });
                }

                let sources = (!sources.is_empty()).then_some(sources);
                if let Some(sources) = &sources {
                    self.pending.push_back(ResearchEvent::Sources {
                        sources: sources.clone(),
                    });
                }
                self.pending.push_back(ResearchEvent::Done {
                    response: outcome.text,
                    sources,
                    steps: outcome.steps,
                });
            }
            Err(e) => {
                if let Some(bus) = &self.completion.events {
                    bus.publish(DomainEvent::ErrorOccurred {
                        context: format!("research_stream:{}", self.completion.run_id),
                        error_message: e.to_string(),
                        timestamp: chrono::Utc::now(),
                    });
                }
                self.pending.push_back(ResearchEvent::Error {
                    error: user_facing(&e),
                });
            }
        }
    }
}

/// The message an end user sees for a failed run.
pub fn user_facing(error: &Error) -> String {
    match error {
        Error::Generation(e) => e.user_message(),
        other => other.to_string(),
    }
}

impl Stream for ResearchStream {
    type Item = ResearchEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ResearchEvent>> {
        let this = self.get_mut();
        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            match ready!(this.rx.poll_recv(cx)) {
                Some(BridgeMessage::Event(event)) => return Poll::Ready(Some(event)),
                Some(BridgeMessage::Finished(outcome)) => this.finish(outcome),
                // The producer task died without reporting
                None => this.finish(Err(Error::Internal("research task ended unexpectedly".into()))),
            }
        }
    }
}
