use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::auth::UserId;
use crate::error::Result;
use crate::models::{
    CreateMindMapPayload, MindMap, MindMapId, MindMapSummary, ReplaceGraphPayload,
    missing_mind_map,
};

/// Durable, owner-scoped storage of mind maps.
///
/// Every operation that names a mind map reports `NotFound` both when the id does not
/// exist and when it belongs to someone else.
#[async_trait]
pub trait MindMapStore: Send + Sync {
    /// Summaries for `owner`, most recently updated first. Node and edge bodies are not loaded.
    async fn list_mind_maps(&self, owner: UserId) -> Result<Vec<MindMapSummary>>;

    async fn get_mind_map(&self, id: MindMapId, owner: UserId) -> Result<MindMap>;

    /// Creates an empty mind map with a fresh id.
    async fn create_mind_map(&self, owner: UserId, payload: CreateMindMapPayload)
    -> Result<MindMap>;

    /// Validates `payload`, then atomically replaces title, description and the whole
    /// node/edge set. Nothing is written when validation fails.
    async fn replace_mind_map_graph(
        &self,
        id: MindMapId,
        owner: UserId,
        payload: ReplaceGraphPayload,
    ) -> Result<MindMap>;

    /// Removes the mind map together with all of its nodes and edges.
    async fn delete_mind_map(&self, id: MindMapId, owner: UserId) -> Result<()>;
}

#[async_trait]
impl<T: MindMapStore + ?Sized> MindMapStore for Arc<T> {
    async fn list_mind_maps(&self, owner: UserId) -> Result<Vec<MindMapSummary>> {
        (**self).list_mind_maps(owner).await
    }

    async fn get_mind_map(&self, id: MindMapId, owner: UserId) -> Result<MindMap> {
        (**self).get_mind_map(id, owner).await
    }

    async fn create_mind_map(
        &self,
        owner: UserId,
        payload: CreateMindMapPayload,
    ) -> Result<MindMap> {
        (**self).create_mind_map(owner, payload).await
    }

    async fn replace_mind_map_graph(
        &self,
        id: MindMapId,
        owner: UserId,
        payload: ReplaceGraphPayload,
    ) -> Result<MindMap> {
        (**self).replace_mind_map_graph(id, owner, payload).await
    }

    async fn delete_mind_map(&self, id: MindMapId, owner: UserId) -> Result<()> {
        (**self).delete_mind_map(id, owner).await
    }
}

/// Next `updated_at` for a write: the current time, bumped past `previous` when the clock
/// has not moved.
pub(crate) fn advance_timestamp(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Process-local store for standalone mode and tests.
///
/// A single lock guards all mind maps, so every replace or delete is atomic and writes to
/// the same id never interleave.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    mind_maps: Arc<RwLock<HashMap<MindMapId, MindMap>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.mind_maps.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mind_maps.read().await.is_empty()
    }

    /// Total node and edge rows still held for `id`, regardless of owner.
    pub async fn row_counts(&self, id: MindMapId) -> (usize, usize) {
        self.mind_maps
            .read()
            .await
            .get(&id)
            .map(|map| (map.nodes.len(), map.edges.len()))
            .unwrap_or((0, 0))
    }
}

#[async_trait]
impl MindMapStore for MemoryStore {
    async fn list_mind_maps(&self, owner: UserId) -> Result<Vec<MindMapSummary>> {
        let mind_maps = self.mind_maps.read().await;
        let mut summaries: Vec<MindMapSummary> = mind_maps
            .values()
            .filter(|map| map.owner_id == owner)
            .map(|map| MindMapSummary {
                id: map.id,
                title: map.title.clone(),
                description: map.description.clone(),
                created_at: map.created_at,
                updated_at: map.updated_at,
                node_count: map.nodes.len() as i64,
                edge_count: map.edges.len() as i64,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| b.id.0.cmp(&a.id.0))
        });
        Ok(summaries)
    }

    async fn get_mind_map(&self, id: MindMapId, owner: UserId) -> Result<MindMap> {
        let mind_maps = self.mind_maps.read().await;
        mind_maps
            .get(&id)
            .filter(|map| map.owner_id == owner)
            .cloned()
            .ok_or_else(|| missing_mind_map(id))
    }

    async fn create_mind_map(
        &self,
        owner: UserId,
        payload: CreateMindMapPayload,
    ) -> Result<MindMap> {
        let new = payload.normalize()?;
        let now = Utc::now();
        let mind_map = MindMap {
            id: MindMapId::new_random(),
            owner_id: owner,
            title: new.title,
            description: new.description,
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.mind_maps
            .write()
            .await
            .insert(mind_map.id, mind_map.clone());
        tracing::info!(mind_map_id = %mind_map.id, owner = %owner, "created mind map");
        Ok(mind_map)
    }

    async fn replace_mind_map_graph(
        &self,
        id: MindMapId,
        owner: UserId,
        payload: ReplaceGraphPayload,
    ) -> Result<MindMap> {
        let definition = payload.normalize()?;

        let mut mind_maps = self.mind_maps.write().await;
        let Some(existing) = mind_maps.get_mut(&id).filter(|map| map.owner_id == owner) else {
            return Err(missing_mind_map(id));
        };

        existing.title = definition.title;
        existing.description = definition.description;
        existing.updated_at = advance_timestamp(existing.updated_at, Utc::now());
        existing.nodes = definition.nodes;
        existing.edges = definition.edges;

        tracing::info!(
            mind_map_id = %id,
            nodes = existing.nodes.len(),
            edges = existing.edges.len(),
            "replaced mind map graph"
        );
        Ok(existing.clone())
    }

    async fn delete_mind_map(&self, id: MindMapId, owner: UserId) -> Result<()> {
        let mut mind_maps = self.mind_maps.write().await;
        if !mind_maps.get(&id).is_some_and(|map| map.owner_id == owner) {
            return Err(missing_mind_map(id));
        }
        mind_maps.remove(&id);
        tracing::info!(mind_map_id = %id, "deleted mind map");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;
    use crate::error::ErrorKind;
    use crate::models::{Edge, EdgeStyle, Node, NodeStyle, Position};

    fn user() -> UserId {
        UserId(Uuid::new_v4())
    }

    fn create(title: &str) -> CreateMindMapPayload {
        CreateMindMapPayload {
            title: title.to_string(),
            description: None,
        }
    }

    fn styled_graph() -> ReplaceGraphPayload {
        let mut root = Node::new("n1", "Root", Position::new(0.0, 0.0));
        root.kind = Some("root".to_string());
        root.description = Some("center".to_string());
        root.style = Some(NodeStyle {
            background: Some("#fff".to_string()),
            color: None,
            border: Some("1px solid".to_string()),
            border_radius: Some("8px".to_string()),
        });
        let child = Node::new("n2", "Child", Position::new(100.0, -25.5));
        let mut link = Edge::new("e1", "n1", "n2");
        link.kind = Some("smoothstep".to_string());
        link.style = Some(EdgeStyle {
            stroke: Some("#333".to_string()),
            stroke_width: Some(2.0),
        });

        ReplaceGraphPayload {
            title: "Plan".to_string(),
            description: Some("q3".to_string()),
            nodes: vec![root, child],
            edges: vec![link, Edge::new("e2", "n2", "n2")],
        }
    }

    #[tokio::test]
    async fn replace_then_get_round_trips_the_graph() {
        let store = MemoryStore::new();
        let owner = user();
        let created = store
            .create_mind_map(owner, create("Plan"))
            .await
            .expect("create should succeed");
        assert!(created.nodes.is_empty() && created.edges.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let graph = styled_graph();
        store
            .replace_mind_map_graph(created.id, owner, graph.clone())
            .await
            .expect("replace should succeed");

        let loaded = store
            .get_mind_map(created.id, owner)
            .await
            .expect("get should succeed");
        assert_eq!(loaded.nodes, graph.nodes);
        assert_eq!(loaded.edges, graph.edges);
        assert_eq!(loaded.description.as_deref(), Some("q3"));
        assert!(loaded.updated_at > created.updated_at);
    }

    #[tokio::test]
    async fn invalid_graph_leaves_storage_untouched() {
        let store = MemoryStore::new();
        let owner = user();
        let created = store
            .create_mind_map(owner, create("Plan"))
            .await
            .expect("create should succeed");
        let before = store
            .replace_mind_map_graph(created.id, owner, styled_graph())
            .await
            .expect("replace should succeed");

        let mut broken = styled_graph();
        broken.nodes.truncate(1);
        let err = store
            .replace_mind_map_graph(created.id, owner, broken)
            .await
            .expect_err("dangling edge should fail");
        assert_eq!(err.kind, ErrorKind::Validation);

        let after = store
            .get_mind_map(created.id, owner)
            .await
            .expect("get should succeed");
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn other_owners_see_not_found() {
        let store = MemoryStore::new();
        let owner = user();
        let intruder = user();
        let created = store
            .create_mind_map(owner, create("Plan"))
            .await
            .expect("create should succeed");

        let get = store.get_mind_map(created.id, intruder).await;
        let replace = store
            .replace_mind_map_graph(created.id, intruder, styled_graph())
            .await;
        let delete = store.delete_mind_map(created.id, intruder).await;
        for result in [get.map(|_| ()), replace.map(|_| ()), delete] {
            let err = result.expect_err("intruder must be rejected");
            assert_eq!(err.kind, ErrorKind::NotFound);
        }

        let missing = store
            .get_mind_map(MindMapId::new_random(), owner)
            .await
            .expect_err("unknown id should be missing");
        assert_eq!(missing.public, "Mind map not found");

        assert!(
            store
                .list_mind_maps(intruder)
                .await
                .expect("list should succeed")
                .is_empty()
        );
        assert_eq!(store.row_counts(created.id).await, (0, 0));
    }

    #[tokio::test]
    async fn delete_removes_map_with_its_nodes_and_edges() {
        let store = MemoryStore::new();
        let owner = user();
        let created = store
            .create_mind_map(owner, create("Plan"))
            .await
            .expect("create should succeed");
        store
            .replace_mind_map_graph(created.id, owner, styled_graph())
            .await
            .expect("replace should succeed");
        assert_eq!(store.row_counts(created.id).await, (2, 2));

        store
            .delete_mind_map(created.id, owner)
            .await
            .expect("delete should succeed");

        assert_eq!(store.row_counts(created.id).await, (0, 0));
        let err = store
            .get_mind_map(created.id, owner)
            .await
            .expect_err("deleted map should be gone");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn list_orders_by_most_recent_update_with_counts() {
        let store = MemoryStore::new();
        let owner = user();
        let first = store
            .create_mind_map(owner, create("First"))
            .await
            .expect("create should succeed");
        let second = store
            .create_mind_map(owner, create("Second"))
            .await
            .expect("create should succeed");
        store
            .create_mind_map(user(), create("Someone else"))
            .await
            .expect("create should succeed");

        store
            .replace_mind_map_graph(first.id, owner, styled_graph())
            .await
            .expect("replace should succeed");

        let summaries = store
            .list_mind_maps(owner)
            .await
            .expect("list should succeed");
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].id, first.id);
        assert_eq!(summaries[0].title, "Plan");
        assert_eq!((summaries[0].node_count, summaries[0].edge_count), (2, 2));
        assert_eq!(summaries[1].id, second.id);
        assert_eq!((summaries[1].node_count, summaries[1].edge_count), (0, 0));
    }

    #[tokio::test]
    async fn updated_at_strictly_advances_on_every_write() {
        let store = MemoryStore::new();
        let owner = user();
        let created = store
            .create_mind_map(owner, create("Plan"))
            .await
            .expect("create should succeed");

        let mut last = created.updated_at;
        for _ in 0..5 {
            let written = store
                .replace_mind_map_graph(created.id, owner, styled_graph())
                .await
                .expect("replace should succeed");
            assert!(written.updated_at > last);
            last = written.updated_at;
        }
    }

    #[test]
    fn advance_timestamp_bumps_stalled_clock() {
        let now = Utc::now();
        assert_eq!(advance_timestamp(now, now), now + Duration::microseconds(1));
        let later = now + Duration::seconds(1);
        assert_eq!(advance_timestamp(now, later), later);
    }
}
