//! Progress events emitted while a run executes

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use super::run::{RunId, RunReport};
use crate::router::RouteDecision;
use crate::stages::StageKind;
use crate::state::StateUpdate;

/// One observable step of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        run_id: RunId,
        task: String,
    },
    StageStarted {
        run_id: RunId,
        stage: StageKind,
        iteration: u32,
    },
    StageRetrying {
        run_id: RunId,
        stage: StageKind,
        attempt: u32,
        error: String,
    },
    /// Carries exactly the update that was merged into the state
    StageCompleted {
        run_id: RunId,
        stage: StageKind,
        iteration: u32,
        update: StateUpdate,
    },
    Routed {
        run_id: RunId,
        decision: RouteDecision,
    },
    Finished {
        report: RunReport,
    },
}

/// Stream of `RunEvent`s; ends after `RunEvent::Finished`
pub struct RunEventStream {
    inner: Pin<Box<dyn Stream<Item = RunEvent> + Send>>,
}

impl RunEventStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = RunEvent> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    pub(crate) fn from_receiver(receiver: mpsc::UnboundedReceiver<RunEvent>) -> Self {
        Self::new(futures::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }
}

impl Stream for RunEventStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Sends events if anyone is listening
#[derive(Clone, Default)]
pub(crate) struct EventSink {
    sender: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub(crate) fn none() -> Self {
        Self::default()
    }

    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { sender: Some(tx) }, rx)
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        if let Some(sender) = &self.sender {
            // A dropped receiver only means nobody is watching
            let _ = sender.send(event);
        }
    }
}
