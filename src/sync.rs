//! Client-side editing session for one mind map.
//!
//! A [`SyncEngine`] owns the in-memory snapshot of an open mind map. Local edits are
//! applied synchronously, validated against the whole graph, and published as a new
//! snapshot with a higher revision. Observers only ever see complete snapshots. Writes
//! to durable storage are delegated to the autosave scheduler spawned by
//! [`SyncEngine::open`].

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::auth::Identity;
use crate::autosave::{
    AutosaveConfig, AutosaveScheduler, FlushOutcome, FlushReply, SaveStatus, session_closed,
};
use crate::error::{LibError, Result};
use crate::models::{
    Edge, EdgeId, GraphViolation, MindMap, MindMapId, Node, NodeId, Position,
    ReplaceGraphPayload,
};
use crate::operations::MindMapOperations;
use crate::validation;

/// Where an editing session writes its snapshots.
#[async_trait]
pub trait SaveTarget: Send + Sync + 'static {
    /// Replaces the stored graph of `id` with `payload`.
    async fn save(&self, id: MindMapId, payload: ReplaceGraphPayload) -> Result<MindMap>;
}

#[async_trait]
impl<T: SaveTarget + ?Sized> SaveTarget for Arc<T> {
    async fn save(&self, id: MindMapId, payload: ReplaceGraphPayload) -> Result<MindMap> {
        (**self).save(id, payload).await
    }
}

/// Saves straight into a store on behalf of an already authenticated identity.
#[derive(Clone)]
pub struct StoreTarget {
    operations: MindMapOperations,
    identity: Identity,
}

impl StoreTarget {
    pub fn new(operations: MindMapOperations, identity: Identity) -> Self {
        Self {
            operations,
            identity,
        }
    }
}

#[async_trait]
impl SaveTarget for StoreTarget {
    async fn save(&self, id: MindMapId, payload: ReplaceGraphPayload) -> Result<MindMap> {
        self.operations
            .replace_mind_map_graph(&self.identity, id, payload)
            .await
    }
}

/// Complete in-memory state of an open mind map.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub mind_map_id: MindMapId,
    /// Increases by one with every accepted local mutation.
    pub revision: u64,
    pub title: String,
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Snapshot {
    pub fn from_mind_map(mind_map: MindMap) -> Self {
        Self {
            mind_map_id: mind_map.id,
            revision: 0,
            title: mind_map.title,
            description: mind_map.description,
            nodes: mind_map.nodes,
            edges: mind_map.edges,
        }
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id == *id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.iter().find(|edge| edge.id == *id)
    }

    pub fn into_payload(self) -> ReplaceGraphPayload {
        ReplaceGraphPayload {
            title: self.title,
            description: self.description,
            nodes: self.nodes,
            edges: self.edges,
        }
    }

    fn check(&self) -> Result<()> {
        let mut violations = Vec::new();
        if self.title.trim().is_empty() {
            violations.push(GraphViolation::EmptyTitle);
        }
        violations.extend(validation::graph_violations(&self.nodes, &self.edges));
        if violations.is_empty() {
            Ok(())
        } else {
            Err(LibError::invalid_graph(violations))
        }
    }
}

pub struct SyncEngine {
    snapshot: watch::Sender<Snapshot>,
    status: watch::Receiver<SaveStatus>,
    flush_requests: mpsc::Sender<FlushReply>,
    close_request: oneshot::Sender<FlushReply>,
    scheduler: JoinHandle<()>,
}

impl SyncEngine {
    /// Opens an editing session on a loaded mind map and spawns its autosave task.
    ///
    /// Must be called from within a Tokio runtime. Dropping the engine without calling
    /// [`SyncEngine::close`] still lets the scheduler attempt a final save.
    pub fn open<T: SaveTarget>(target: T, mind_map: MindMap, config: AutosaveConfig) -> Self {
        let saved_at = mind_map.updated_at;
        let snapshot = Snapshot::from_mind_map(mind_map);
        let mind_map_id = snapshot.mind_map_id;
        let (snapshot_tx, snapshot_rx) = watch::channel(snapshot);
        let (status_tx, status_rx) = watch::channel(SaveStatus::opened(0, saved_at));
        let (flush_tx, flush_rx) = mpsc::channel(8);
        let (close_tx, close_rx) = oneshot::channel();

        let scheduler = AutosaveScheduler::new(
            Arc::new(target),
            snapshot_rx,
            flush_rx,
            close_rx,
            status_tx,
            config,
        );
        tracing::debug!(mind_map_id = %mind_map_id, "sync session opened");

        Self {
            snapshot: snapshot_tx,
            status: status_rx,
            flush_requests: flush_tx,
            close_request: close_tx,
            scheduler: tokio::spawn(scheduler.run()),
        }
    }

    pub fn mind_map_id(&self) -> MindMapId {
        self.snapshot.borrow().mind_map_id
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn revision(&self) -> u64 {
        self.snapshot.borrow().revision
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub fn status(&self) -> SaveStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SaveStatus> {
        self.status.clone()
    }

    /// Whether the open snapshot differs from the last durable write.
    pub fn has_unsaved_changes(&self) -> bool {
        self.revision() != self.status.borrow().last_saved_revision
    }

    pub fn add_node(&self, node: Node) -> Result<u64> {
        self.mutate(|snapshot| {
            snapshot.nodes.push(node);
            Ok(())
        })
    }

    /// Replaces the node with the same id, keeping its place in the node order.
    pub fn update_node(&self, node: Node) -> Result<u64> {
        self.mutate(|snapshot| {
            let slot = node_mut(snapshot, &node.id)?;
            *slot = node;
            Ok(())
        })
    }

    pub fn move_node(&self, id: &NodeId, position: Position) -> Result<u64> {
        self.mutate(|snapshot| {
            node_mut(snapshot, id)?.position = position;
            Ok(())
        })
    }

    /// Removes a node together with every edge that references it.
    pub fn remove_node(&self, id: &NodeId) -> Result<u64> {
        self.mutate(|snapshot| {
            let before = snapshot.nodes.len();
            snapshot.nodes.retain(|node| node.id != *id);
            if snapshot.nodes.len() == before {
                return Err(missing_node(id));
            }
            snapshot.edges.retain(|edge| !edge.touches(id));
            Ok(())
        })
    }

    pub fn add_edge(&self, edge: Edge) -> Result<u64> {
        self.mutate(|snapshot| {
            snapshot.edges.push(edge);
            Ok(())
        })
    }

    pub fn remove_edge(&self, id: &EdgeId) -> Result<u64> {
        self.mutate(|snapshot| {
            let before = snapshot.edges.len();
            snapshot.edges.retain(|edge| edge.id != *id);
            if snapshot.edges.len() == before {
                return Err(LibError::not_found(
                    "Edge not found",
                    anyhow!("edge {} not found", id),
                ));
            }
            Ok(())
        })
    }

    pub fn set_title(&self, title: impl Into<String>) -> Result<u64> {
        let title = title.into();
        self.mutate(|snapshot| {
            snapshot.title = title;
            Ok(())
        })
    }

    pub fn set_description(&self, description: Option<String>) -> Result<u64> {
        self.mutate(|snapshot| {
            snapshot.description = description;
            Ok(())
        })
    }

    /// Replaces the whole local graph at once, as a canvas does after a batch of edits.
    pub fn replace_graph(&self, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<u64> {
        self.mutate(|snapshot| {
            snapshot.nodes = nodes;
            snapshot.edges = edges;
            Ok(())
        })
    }

    /// Writes pending changes now instead of waiting for the debounce timer.
    pub async fn flush(&self) -> Result<FlushOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.flush_requests
            .send(reply)
            .await
            .map_err(|_| session_closed())?;
        outcome.await.map_err(|_| session_closed())?
    }

    /// Ends the session, writing any unsaved changes one last time.
    pub async fn close(self) -> Result<FlushOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.close_request
            .send(reply)
            .map_err(|_| session_closed())?;
        let outcome = outcome.await.map_err(|_| session_closed())?;
        if let Err(err) = self.scheduler.await {
            tracing::error!(error = %err, "autosave task ended abnormally");
        }
        outcome
    }

    /// Applies `change` to a copy of the current snapshot and publishes it only if the
    /// resulting graph is valid. Rejected changes leave the snapshot and revision as
    /// they were.
    fn mutate(&self, change: impl FnOnce(&mut Snapshot) -> Result<()>) -> Result<u64> {
        let mut outcome = Err(session_closed());
        self.snapshot.send_if_modified(|current| {
            let mut next = current.clone();
            if let Err(err) = change(&mut next).and_then(|()| next.check()) {
                outcome = Err(err);
                return false;
            }
            next.revision = current.revision + 1;
            outcome = Ok(next.revision);
            *current = next;
            true
        });
        outcome
    }
}

fn node_mut<'a>(snapshot: &'a mut Snapshot, id: &NodeId) -> Result<&'a mut Node> {
    snapshot
        .nodes
        .iter_mut()
        .find(|node| node.id == *id)
        .ok_or_else(|| missing_node(id))
}

fn missing_node(id: &NodeId) -> LibError {
    LibError::not_found("Node not found", anyhow!("node {} not found", id))
}
