//! Debounced autosave for one open mind map.
//!
//! The scheduler runs as a single task per sync session and moves through
//! `Idle -> Armed -> Flushing -> Idle`. Every local mutation restarts the debounce
//! timer; when the timer fires the latest snapshot is written through the session's
//! [`SaveTarget`]. At most one write is in flight, and an in-flight write is never
//! cancelled.

use std::future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::error::{LibError, Result};
use crate::sync::{SaveTarget, Snapshot};

pub const DEFAULT_AUTOSAVE_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Quiet period that must pass after the last mutation before a write starts.
    pub delay: Duration,
}

impl AutosaveConfig {
    pub const fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_AUTOSAVE_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Idle,
    Armed,
    Flushing,
    Closed,
}

/// Passive save indicator for the editing UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveStatus {
    pub state: SaveState,
    /// The open snapshot differs from the last durable write.
    pub dirty: bool,
    pub last_saved_revision: u64,
    pub last_saved_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SaveStatus {
    pub(crate) fn opened(revision: u64, saved_at: DateTime<Utc>) -> Self {
        Self {
            state: SaveState::Idle,
            dirty: false,
            last_saved_revision: revision,
            last_saved_at: Some(saved_at),
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Saved { revision: u64 },
    NothingPending,
    AlreadyFlushing,
}

pub(crate) type FlushReply = oneshot::Sender<Result<FlushOutcome>>;

pub(crate) struct AutosaveScheduler<T> {
    target: Arc<T>,
    snapshots: watch::Receiver<Snapshot>,
    flush_requests: mpsc::Receiver<FlushReply>,
    close_request: oneshot::Receiver<FlushReply>,
    status: watch::Sender<SaveStatus>,
    config: AutosaveConfig,
    deadline: Option<Instant>,
    baseline_revision: u64,
}

impl<T: SaveTarget> AutosaveScheduler<T> {
    pub(crate) fn new(
        target: Arc<T>,
        snapshots: watch::Receiver<Snapshot>,
        flush_requests: mpsc::Receiver<FlushReply>,
        close_request: oneshot::Receiver<FlushReply>,
        status: watch::Sender<SaveStatus>,
        config: AutosaveConfig,
    ) -> Self {
        let baseline_revision = snapshots.borrow().revision;
        Self {
            target,
            snapshots,
            flush_requests,
            close_request,
            status,
            config,
            deadline: None,
            baseline_revision,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        self.shutdown(None).await;
                        return;
                    }
                    self.arm();
                }
                reply = &mut self.close_request => {
                    self.shutdown(reply.ok()).await;
                    return;
                }
                Some(reply) = self.flush_requests.recv() => {
                    let outcome = self.manual_flush().await;
                    let _ = reply.send(outcome);
                }
                _ = sleep_until(deadline) => {
                    self.deadline = None;
                    if self.is_dirty() {
                        // Failures are recorded in the status; the next mutation re-arms.
                        let _ = self.flush_now().await;
                    } else {
                        self.publish(SaveState::Idle, |_| {});
                    }
                }
            }
        }
    }

    fn current_revision(&self) -> u64 {
        self.snapshots.borrow().revision
    }

    fn is_dirty(&self) -> bool {
        self.current_revision() != self.baseline_revision
    }

    fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.config.delay);
        tracing::debug!(
            revision = self.current_revision(),
            delay_ms = self.config.delay.as_millis() as u64,
            "autosave armed"
        );
        self.publish(SaveState::Armed, |_| {});
    }

    /// A manual flush writes only when something is pending: an armed timer or a
    /// snapshot that differs from the last durable write.
    async fn manual_flush(&mut self) -> Result<FlushOutcome> {
        let armed = self.deadline.take().is_some();
        if !armed && !self.is_dirty() {
            return Ok(FlushOutcome::NothingPending);
        }
        if !self.is_dirty() {
            self.publish(SaveState::Idle, |_| {});
            return Ok(FlushOutcome::NothingPending);
        }
        self.flush_now().await
    }

    async fn flush_now(&mut self) -> Result<FlushOutcome> {
        let snapshot = self.snapshots.borrow_and_update().clone();
        let revision = snapshot.revision;
        let mind_map_id = snapshot.mind_map_id;
        self.publish(SaveState::Flushing, |_| {});
        tracing::debug!(mind_map_id = %mind_map_id, revision, "autosave flushing");

        let target = Arc::clone(&self.target);
        let save = target.save(mind_map_id, snapshot.into_payload());
        tokio::pin!(save);
        let result = loop {
            tokio::select! {
                result = &mut save => break result,
                Some(reply) = self.flush_requests.recv() => {
                    let _ = reply.send(Ok(FlushOutcome::AlreadyFlushing));
                }
            }
        };

        match result {
            Ok(saved) => {
                self.baseline_revision = revision;
                tracing::info!(mind_map_id = %mind_map_id, revision, "mind map saved");
                self.publish(SaveState::Idle, |status| {
                    status.last_saved_revision = revision;
                    status.last_saved_at = Some(saved.updated_at);
                    status.last_error = None;
                });
                Ok(FlushOutcome::Saved { revision })
            }
            Err(err) => {
                tracing::warn!(
                    mind_map_id = %mind_map_id,
                    revision,
                    kind = ?err.kind,
                    error = %err.source,
                    "mind map save failed; changes kept locally"
                );
                let public = err.public.to_string();
                self.publish(SaveState::Idle, |status| {
                    status.last_error = Some(public);
                });
                Err(err)
            }
        }
    }

    /// Cancels any armed timer and writes the document once more if it changed since the
    /// last durable write.
    async fn shutdown(&mut self, reply: Option<FlushReply>) {
        self.deadline = None;
        let outcome = if self.is_dirty() {
            self.flush_now().await
        } else {
            Ok(FlushOutcome::NothingPending)
        };
        if let Err(err) = &outcome {
            tracing::warn!(error = %err, "final save before close failed");
        }
        self.publish(SaveState::Closed, |_| {});
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn publish(&self, state: SaveState, update: impl FnOnce(&mut SaveStatus)) {
        let dirty = self.is_dirty();
        self.status.send_modify(|status| {
            status.state = state;
            status.dirty = dirty;
            update(status);
        });
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

pub(crate) fn session_closed() -> LibError {
    LibError::message("Sync session is closed")
}
