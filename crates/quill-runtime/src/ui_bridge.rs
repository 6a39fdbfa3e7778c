//! Background bridge for synchronous callers.
//!
//! [`spawn_feedback`] runs one feedback request on its own worker thread with
//! a private current-thread runtime. Chunks come back over a channel that a
//! UI timer drains with [`FeedbackTask::try_recv`]; nothing blocks the
//! caller's thread.

use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use quill_core::PromptKind;

use crate::adapters::error_chunk;
use crate::manager::BackendManager;
use crate::providers::ErrorCategory;

/// What the worker hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Chunk(String),
    /// The request finished or was stopped. Always the last event.
    Done,
}

/// Handle to one in-flight background request.
pub struct FeedbackTask {
    rx: mpsc::UnboundedReceiver<BridgeEvent>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

impl FeedbackTask {
    /// Next event if one is ready.
    ///
    /// A worker that disappears without reporting is surfaced as
    /// [`BridgeEvent::Done`], so a polling caller always sees the end. After
    /// `Done` this returns `None`.
    pub fn try_recv(&mut self) -> Option<BridgeEvent> {
        if self.finished {
            return None;
        }
        let event = match self.rx.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("Feedback worker exited without finishing");
                BridgeEvent::Done
            }
        };
        if event == BridgeEvent::Done {
            self.finished = true;
        }
        Some(event)
    }

    /// Whether [`BridgeEvent::Done`] has been handed out by `try_recv`.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Block until the next event. `None` once the worker is gone.
    pub fn blocking_recv(&mut self) -> Option<BridgeEvent> {
        self.rx.blocking_recv()
    }

    /// Ask the worker to stop delivering chunks.
    ///
    /// The flag is checked before each chunk; work already in flight on the
    /// backend is not aborted.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("Feedback worker panicked");
            }
        }
    }
}

/// Start `manager.get_feedback(text, prompt)` on a background thread.
pub fn spawn_feedback(manager: &BackendManager, text: &str, prompt: PromptKind) -> FeedbackTask {
    let (tx, rx) = mpsc::unbounded_channel();
    let stop = Arc::new(AtomicBool::new(false));

    let manager = manager.clone();
    let text = text.to_string();
    let flag = stop.clone();
    let on_spawn_error = tx.clone();

    let worker = std::thread::Builder::new()
        .name("quill-feedback".to_string())
        .spawn(move || run_worker(manager, text, prompt, flag, tx));

    let worker = match worker {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(error = %e, "Failed to spawn feedback worker");
            finish_with_error(&on_spawn_error, &format!("could not start feedback worker: {}", e));
            None
        }
    };

    FeedbackTask {
        rx,
        stop,
        worker,
        finished: false,
    }
}

/// Report `reason` as the only chunk and end the request.
fn finish_with_error(tx: &mpsc::UnboundedSender<BridgeEvent>, reason: &str) {
    let _ = tx.send(BridgeEvent::Chunk(error_chunk(ErrorCategory::Unexpected, reason)));
    let _ = tx.send(BridgeEvent::Done);
}

fn run_worker(
    manager: BackendManager,
    text: String,
    prompt: PromptKind,
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<BridgeEvent>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            finish_with_error(&tx, &format!("could not start worker runtime: {}", e));
            return;
        }
    };

    runtime.block_on(async {
        let mut chunks = manager.get_feedback(&text, prompt);
        while let Some(chunk) = chunks.next().await {
            if stop.load(Ordering::SeqCst) {
                tracing::debug!("Feedback stopped by caller");
                break;
            }
            if tx.send(BridgeEvent::Chunk(chunk)).is_err() {
                break;
            }
        }
    });

    let _ = tx.send(BridgeEvent::Done);
}
